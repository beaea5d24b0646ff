//! Local index of downloaded archives, keyed by gene

use crate::service::ARCHIVE_EXTENSION;
use crate::types::SectionPlane;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Parts of an archive file name `<key>_<variant>_<time_point>_<dataset_id>.zip`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub key: String,
    pub variant: String,
    pub time_point: Option<String>,
    pub dataset_id: Option<u64>,
}

impl ArchiveName {
    /// Parse a file name. Names without the archive extension or without at
    /// least a key and a variant are not archives.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))?;
        let mut parts = stem.split('_');
        let key = parts.next().filter(|k| !k.is_empty())?;
        let variant = parts.next().filter(|v| !v.is_empty())?;
        let time_point = parts.next().map(str::to_string);
        let dataset_id = parts.next().and_then(|id| id.parse().ok());
        Some(Self {
            key: key.to_string(),
            variant: variant.to_string(),
            time_point,
            dataset_id,
        })
    }

    pub fn matches(&self, plane: SectionPlane) -> bool {
        self.variant == plane.tag()
    }
}

/// Map from gene to the archive that serves it
#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    entries: HashMap<String, PathBuf>,
    duplicates: Vec<String>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` once. Variants are applied from lowest to highest priority
    /// so that the highest priority archive of a key wins. Several archives
    /// of one key within one variant are recorded as duplicates; the first
    /// by file name is kept.
    pub async fn build(root: &Path, priority: &[SectionPlane]) -> io::Result<Self> {
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().and_then(ArchiveName::parse) else {
                continue;
            };
            files.push((name, entry.path()));
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let index = Self::from_files(files, priority);
        debug!(
            root = %root.display(),
            entries = index.len(),
            duplicates = index.duplicates.len(),
            "built local index"
        );
        Ok(index)
    }

    /// Build from already listed archives, in the given order
    pub fn from_files(files: Vec<(ArchiveName, PathBuf)>, priority: &[SectionPlane]) -> Self {
        let mut index = Self::new();
        for &plane in priority.iter().rev() {
            let mut seen = HashSet::new();
            for (name, path) in files.iter().filter(|(name, _)| name.matches(plane)) {
                if !seen.insert(name.key.as_str()) {
                    index.duplicates.push(name.key.clone());
                    continue;
                }
                index.entries.insert(name.key.clone(), path.clone());
            }
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Point `key` at `path`, returning the previous path
    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.entries.insert(key.into(), path.into())
    }

    /// Keys that had more than one archive for the same variant
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
