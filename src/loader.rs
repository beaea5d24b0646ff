//! Dataset loader: local index, decode cache and remote fetch
//!
//! A [`DatasetLoader`] manages one directory of archives. Resolving a key
//! goes through three tiers:
//!
//! 1. the in-memory cache of decoded volumes,
//! 2. the local index of archives already on disk,
//! 3. the remote [`DatasetService`], trying each section plane in priority
//!    order until one experiment can be downloaded.
//!
//! Concurrent resolutions of one key share a single fetch. The cache and the
//! index sit behind one lock so a key is never cached without being indexed.

use crate::cache::BoundedCache;
use crate::codec::{self, DecodeOptions};
use crate::error::{DecodeError, Error, LoaderError, Result, ServiceError};
use crate::index::LocalIndex;
use crate::service::{DatasetQuery, DatasetService, Fetcher};
use crate::taxonomy::Taxonomy;
use crate::types::{ProductFamily, SectionPlane};
use crate::volume::LabeledVolume;
use bytes::Bytes;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Default number of decoded volumes kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 300;

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Managed directory holding the archives
    pub root: PathBuf,
    pub product: ProductFamily,
    pub time_point: String,
    /// Section planes from most to least preferred
    pub priority: Vec<SectionPlane>,
    /// `None` or `Some(0)` keeps every decoded volume
    pub cache_capacity: Option<usize>,
    pub clamp_negative: bool,
    /// Limit on a single download attempt
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            product: ProductFamily::Adult,
            time_point: "P56".to_string(),
            priority: vec![SectionPlane::Coronal, SectionPlane::Sagittal],
            cache_capacity: Some(DEFAULT_CACHE_CAPACITY),
            clamp_negative: false,
            fetch_timeout_secs: None,
        }
    }
}

impl LoaderConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn with_product(mut self, product: ProductFamily) -> Self {
        self.product = product;
        self
    }

    pub fn with_time_point(mut self, time_point: impl Into<String>) -> Self {
        self.time_point = time_point.into();
        self
    }

    pub fn with_priority(mut self, priority: Vec<SectionPlane>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_clamp_negative(mut self, clamp: bool) -> Self {
        self.clamp_negative = clamp;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default().with_clamp_negative(self.clamp_negative)
    }

    /// Reject settings under which no query could ever succeed
    pub fn validate(&self) -> Result<()> {
        if self.priority.is_empty() {
            return Err(Error::Configuration(
                "at least one section plane is required".to_string(),
            ));
        }
        for &plane in &self.priority {
            self.query("gene", plane)
                .validate()
                .map_err(|e| Error::Configuration(e.to_string()))?;
        }
        Ok(())
    }

    fn query(&self, key: &str, plane: SectionPlane) -> DatasetQuery {
        DatasetQuery::new(key)
            .with_plane(Some(plane))
            .with_product(self.product)
            .with_time_point(self.time_point.clone())
    }
}

struct LoaderState {
    index: LocalIndex,
    cache: BoundedCache<String, Arc<LabeledVolume>>,
}

/// Resolves gene keys to decoded, colored volumes
pub struct DatasetLoader {
    config: LoaderConfig,
    state: Mutex<LoaderState>,
    fetcher: Fetcher<dyn DatasetService>,
    taxonomy: Option<Arc<Taxonomy>>,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive right to load one key. Dropping it, on completion or when the
/// owning future is cancelled, frees the key's inflight slot.
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    lock: Option<OwnedMutexGuard<()>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.lock.take();
        // Slots only the map still references have no holder and no waiter
        self.inflight
            .lock()
            .retain(|_, gate| Arc::strong_count(gate) > 1);
    }
}

/// Keys become file names inside the managed directory, and the part before
/// the first `_` is what a directory scan indexes.
pub fn validate_key(key: &str) -> std::result::Result<(), LoaderError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.contains(['/', '\\']) {
        "key contains a path separator"
    } else if key.contains("..") {
        "key contains '..'"
    } else if key.contains('_') {
        "key contains '_', which separates file name fields"
    } else {
        return Ok(());
    };
    Err(LoaderError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}

impl DatasetLoader {
    /// Open the managed directory and index the archives already in it
    pub async fn open(
        config: LoaderConfig,
        service: Arc<dyn DatasetService>,
        taxonomy: Option<Arc<Taxonomy>>,
    ) -> std::result::Result<Self, LoaderError> {
        let is_dir = fs::metadata(&config.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(LoaderError::NotADirectory(config.root.clone()));
        }
        config
            .validate()
            .map_err(|e| LoaderError::InvalidConfig(e.to_string()))?;

        let index = LocalIndex::build(&config.root, &config.priority).await?;
        for key in index.duplicates() {
            warn!(key = %key, "several archives for one section plane, keeping the first");
        }
        info!(
            root = %config.root.display(),
            indexed = index.len(),
            "opened dataset directory"
        );

        Ok(Self {
            state: Mutex::new(LoaderState {
                index,
                cache: BoundedCache::new(config.cache_capacity),
            }),
            fetcher: Fetcher::new(service),
            taxonomy,
            inflight: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> Option<&Taxonomy> {
        self.taxonomy.as_deref()
    }

    /// Whether an archive for `key` is on disk
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().index.contains(key)
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.state.lock().cache.contains_key(key)
    }

    pub fn cached_len(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Keys that had several archives for one section plane at open time
    pub fn duplicates(&self) -> Vec<String> {
        self.state.lock().index.duplicates().to_vec()
    }

    pub fn indexed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().index.keys().map(str::to_string).collect();
        keys.sort();
        keys
    }

    pub fn archive_path(&self, key: &str) -> Option<PathBuf> {
        self.state.lock().index.get(key).map(Path::to_path_buf)
    }

    /// Resolve `key` from the cache, the local index or the remote service
    pub async fn resolve(&self, key: &str) -> std::result::Result<Arc<LabeledVolume>, LoaderError> {
        validate_key(key)?;
        if let Some(volume) = self.cached(key) {
            debug!(key, "cache hit");
            return Ok(volume);
        }

        debug!(key, "cache miss");
        let _guard = self.acquire(key).await;
        // Another caller may have finished while we waited
        match self.cached(key) {
            Some(volume) => Ok(volume),
            None => self.load(key).await,
        }
    }

    /// Decode the indexed archive again, replacing any cached copy
    pub async fn reload(&self, key: &str) -> std::result::Result<Arc<LabeledVolume>, LoaderError> {
        validate_key(key)?;
        let _guard = self.acquire(key).await;
        match self.archive_path(key) {
            Some(path) => self.decode_and_cache(key, &path, local_decode_error).await,
            None => Err(LoaderError::Unavailable(key.to_string())),
        }
    }

    /// Resolve several keys concurrently; fails on the first error
    pub async fn resolve_many<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> std::result::Result<Vec<Arc<LabeledVolume>>, LoaderError> {
        try_join_all(keys.iter().map(|key| self.resolve(key.as_ref()))).await
    }

    fn cached(&self, key: &str) -> Option<Arc<LabeledVolume>> {
        self.state.lock().cache.get(key).cloned()
    }

    /// Number of keys with a load in progress or waiting to start
    pub fn pending_loads(&self) -> usize {
        self.inflight.lock().len()
    }

    async fn acquire(&self, key: &str) -> InflightGuard<'_> {
        // Declared first so a cancelled wait drops the gate before the guard sweeps
        let mut guard = InflightGuard {
            inflight: &self.inflight,
            lock: None,
        };
        let gate = Arc::clone(
            self.inflight
                .lock()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        guard.lock = Some(gate.lock_owned().await);
        guard
    }

    async fn load(&self, key: &str) -> std::result::Result<Arc<LabeledVolume>, LoaderError> {
        if let Some(path) = self.archive_path(key) {
            debug!(key, path = %path.display(), "decoding local archive");
            return self.decode_and_cache(key, &path, local_decode_error).await;
        }

        let path = self.fetch(key).await?;
        // Indexed before decoding so a bad download can be inspected and reloaded
        self.state.lock().index.insert(key, path.clone());
        info!(key, path = %path.display(), "downloaded archive");

        self.decode_and_cache(key, &path, |key, source| {
            warn!(key = %key, error = %source, "downloaded archive could not be decoded");
            LoaderError::DecodeAfterFetch { key, source }
        })
        .await
    }

    /// Try every section plane in priority order; the first download wins.
    /// A stalled plane counts as a failed one. If no plane succeeds and at
    /// least one stalled, the resolve reports a timeout rather than a
    /// missing dataset. Queries the service rejects outright are not retried.
    async fn fetch(&self, key: &str) -> std::result::Result<PathBuf, LoaderError> {
        let mut timed_out = false;
        for &plane in &self.config.priority {
            let query = self.config.query(key, plane);
            let attempt = self.fetcher.download_recent(&query, &self.config.root);
            let outcome = match self.config.fetch_timeout() {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or_else(|_| Err(ServiceError::TimedOut(format!("{} after {:?}", plane, limit)))),
                None => attempt.await,
            };
            match outcome {
                Ok(Some(path)) => return Ok(path),
                Ok(None) => debug!(key, plane = %plane, "no experiment for section plane"),
                Err(e @ ServiceError::InvalidQuery(_)) => return Err(LoaderError::Service(e)),
                Err(e) => {
                    timed_out |= matches!(e, ServiceError::TimedOut(_));
                    warn!(key, plane = %plane, error = %e, "download failed, trying next plane");
                }
            }
        }
        if timed_out {
            Err(LoaderError::TimedOut(key.to_string()))
        } else {
            Err(LoaderError::Unavailable(key.to_string()))
        }
    }

    /// Decode off the async runtime, attach the taxonomy and cache the result
    /// if the key is still indexed. `wrap` classifies decode failures.
    async fn decode_and_cache<F>(
        &self,
        key: &str,
        path: &Path,
        wrap: F,
    ) -> std::result::Result<Arc<LabeledVolume>, LoaderError>
    where
        F: FnOnce(String, DecodeError) -> LoaderError,
    {
        let data = match fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => return Err(wrap(key.to_string(), DecodeError::Io(e))),
        };
        let options = self.config.decode_options();
        let decoded = tokio::task::spawn_blocking(move || codec::decode_with(&data, options))
            .await
            .map_err(|e| LoaderError::Task(e.to_string()))?
            .map_err(|source| wrap(key.to_string(), source))?;

        let volume = Arc::new(LabeledVolume::with_taxonomy(decoded, self.taxonomy()));
        let mut state = self.state.lock();
        if state.index.contains(key) {
            for (evicted, _) in state.cache.put(key.to_string(), Arc::clone(&volume)) {
                debug!(key = %evicted, "evicted from cache");
            }
        }
        Ok(volume)
    }
}

fn local_decode_error(key: String, source: DecodeError) -> LoaderError {
    LoaderError::Decode { key, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::VolumeHeader;
    use crate::service::SectionDataSet;
    use crate::types::ElementType;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoService;

    #[async_trait]
    impl DatasetService for NoService {
        async fn find_datasets(
            &self,
            _query: &DatasetQuery,
        ) -> std::result::Result<Vec<SectionDataSet>, ServiceError> {
            Err(ServiceError::Network("offline".to_string()))
        }

        async fn materialize(
            &self,
            dataset_id: u64,
            _destination: &Path,
        ) -> std::result::Result<(), ServiceError> {
            Err(ServiceError::Materialize(dataset_id, "offline".to_string()))
        }
    }

    fn archive(labels: &[u8]) -> Vec<u8> {
        let header = VolumeHeader::new([labels.len(), 1, 1], ElementType::UChar);
        codec::encode_raw("volume", &header, labels).unwrap()
    }

    async fn open(config: LoaderConfig) -> DatasetLoader {
        DatasetLoader::open(config, Arc::new(NoService), None).await.unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = LoaderConfig::new("/data");
        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.product, ProductFamily::Adult);
        assert_eq!(config.time_point, "P56");
        assert_eq!(config.priority, vec![SectionPlane::Coronal, SectionPlane::Sagittal]);
        assert_eq!(config.cache_capacity, Some(300));
        assert!(!config.clamp_negative);
        assert_eq!(config.fetch_timeout(), None);

        let config = config.with_fetch_timeout(Some(Duration::from_secs(30)));
        assert_eq!(config.fetch_timeout_secs, Some(30));
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loader.json");
        std::fs::write(
            &path,
            r#"{"root": "/atlas", "priority": ["sagittal"], "cache_capacity": null}"#,
        )
        .unwrap();

        let config = LoaderConfig::from_json_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/atlas"));
        assert_eq!(config.priority, vec![SectionPlane::Sagittal]);
        assert_eq!(config.cache_capacity, None);
        assert_eq!(config.time_point, "P56");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LoaderConfig::from_json_file(&path),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_config_validate() {
        assert!(LoaderConfig::new("/data").validate().is_ok());
        assert!(matches!(
            LoaderConfig::new("/data").with_priority(Vec::new()).validate(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            LoaderConfig::new("/data").with_time_point("E13.5").validate(),
            Err(Error::Configuration(_))
        ));
        let dev = LoaderConfig::new("/data")
            .with_product(ProductFamily::Development)
            .with_time_point("E13.5");
        assert!(dev.validate().is_ok());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("Sst").is_ok());
        assert!(validate_key("Tbr1.2").is_ok());
        for key in ["", "../Sst", "a/b", "a\\b", "..", "Gene_A"] {
            assert!(
                matches!(validate_key(key), Err(LoaderError::InvalidKey { key: k, .. }) if k == key),
                "{:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_open_rejects_unusable_config() {
        let dir = TempDir::new().unwrap();
        for config in [
            LoaderConfig::new(dir.path()).with_time_point("E13.5"),
            LoaderConfig::new(dir.path()).with_priority(Vec::new()),
        ] {
            let result = DatasetLoader::open(config, Arc::new(NoService), None).await;
            assert!(matches!(result, Err(LoaderError::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_invalid_keys() {
        let dir = TempDir::new().unwrap();
        let loader = open(LoaderConfig::new(dir.path())).await;
        for key in ["../Escape", "Gene_A", ""] {
            assert!(matches!(
                loader.resolve(key).await,
                Err(LoaderError::InvalidKey { .. })
            ));
            assert!(matches!(
                loader.reload(key).await,
                Err(LoaderError::InvalidKey { .. })
            ));
        }
        assert_eq!(loader.pending_loads(), 0);
        assert_eq!(loader.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_open_requires_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, b"").await.unwrap();

        for root in [file, dir.path().join("missing")] {
            let result = DatasetLoader::open(LoaderConfig::new(&root), Arc::new(NoService), None).await;
            assert!(matches!(result, Err(LoaderError::NotADirectory(p)) if p == root));
        }
    }

    #[tokio::test]
    async fn test_resolve_local_archive_then_cache() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Sst_coronal_P56_1.zip"), archive(&[0, 5, 5]))
            .await
            .unwrap();
        let loader = open(LoaderConfig::new(dir.path())).await;
        assert!(loader.contains("Sst"));
        assert!(!loader.is_cached("Sst"));

        let first = loader.resolve("Sst").await.unwrap();
        assert_eq!(first.volume().label_ids(), &[0, 5]);
        assert!(loader.is_cached("Sst"));

        // The cached copy survives the archive going away
        fs::remove_file(dir.path().join("Sst_coronal_P56_1.zip")).await.unwrap();
        let second = loader.resolve("Sst").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_unknown_key_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let loader = open(LoaderConfig::new(dir.path())).await;
        assert!(matches!(
            loader.resolve("Nope").await,
            Err(LoaderError::Unavailable(key)) if key == "Nope"
        ));
        assert_eq!(loader.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_local_archive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Sst_coronal_P56_1.zip"), b"not a zip")
            .await
            .unwrap();
        let loader = open(LoaderConfig::new(dir.path())).await;
        assert!(matches!(
            loader.resolve("Sst").await,
            Err(LoaderError::Decode { key, .. }) if key == "Sst"
        ));
        assert!(!loader.is_cached("Sst"));
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        for (i, key) in ["Gad1", "Pvalb", "Sst"].iter().enumerate() {
            fs::write(
                dir.path().join(format!("{}_sagittal_P56_{}.zip", key, i)),
                archive(&[i as u8]),
            )
            .await
            .unwrap();
        }
        let config = LoaderConfig::new(dir.path()).with_cache_capacity(Some(2));
        let loader = open(config).await;
        assert_eq!(loader.indexed_keys(), vec!["Gad1", "Pvalb", "Sst"]);

        let volumes = loader.resolve_many(&["Gad1", "Pvalb"]).await.unwrap();
        assert_eq!(volumes.len(), 2);
        loader.resolve("Sst").await.unwrap();
        assert_eq!(loader.cached_len(), 2);
        assert!(!loader.is_cached("Gad1"));
        assert!(loader.contains("Gad1"));
    }

    #[tokio::test]
    async fn test_reload_replaces_cached_copy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Sst_coronal_P56_1.zip");
        fs::write(&path, archive(&[1])).await.unwrap();
        let loader = open(LoaderConfig::new(dir.path())).await;

        let before = loader.resolve("Sst").await.unwrap();
        fs::write(&path, archive(&[2])).await.unwrap();
        let after = loader.reload("Sst").await.unwrap();
        assert_eq!(before.volume().label_ids(), &[1]);
        assert_eq!(after.volume().label_ids(), &[2]);
        assert!(Arc::ptr_eq(&after, &loader.resolve("Sst").await.unwrap()));

        assert!(matches!(
            loader.reload("Vip").await,
            Err(LoaderError::Unavailable(_))
        ));
    }
}
