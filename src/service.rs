//! Interfaces to the remote dataset and ontology services
//!
//! The loader only needs two things from the outside world: the ids of the
//! experiments matching a query, and a way to write one of them to disk.
//! Implement [`DatasetService`] and [`TaxonomySource`] for your backend; the
//! `http-client` feature provides one for the Allen Brain Atlas API.

use crate::error::ServiceError;
use crate::taxonomy::StructureRecord;
use crate::types::{GraphSelector, ProductFamily, SectionPlane};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// Extension of downloaded archives
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Suffix of archives still being written
pub const PARTIAL_SUFFIX: &str = "part";

/// Search for the expression experiments of one gene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetQuery {
    pub gene: String,
    /// `None` matches any plane of section
    pub plane: Option<SectionPlane>,
    pub product: ProductFamily,
    /// Age such as `P56`, `E13` or just `P`; matched as a substring
    pub time_point: String,
}

impl DatasetQuery {
    /// Adult sagittal P56 query, the service defaults
    pub fn new(gene: impl Into<String>) -> Self {
        Self {
            gene: gene.into(),
            plane: Some(SectionPlane::Sagittal),
            product: ProductFamily::Adult,
            time_point: "P56".to_string(),
        }
    }

    pub fn with_plane(mut self, plane: Option<SectionPlane>) -> Self {
        self.plane = plane;
        self
    }

    pub fn with_product(mut self, product: ProductFamily) -> Self {
        self.product = product;
        self
    }

    pub fn with_time_point(mut self, time_point: impl Into<String>) -> Self {
        self.time_point = time_point.into();
        self
    }

    /// Reject combinations no experiment can satisfy
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.gene.is_empty() {
            return Err(ServiceError::InvalidQuery("gene must not be empty".to_string()));
        }
        if self.gene.contains(['/', '\\']) || self.gene.contains("..") {
            return Err(ServiceError::InvalidQuery(format!(
                "gene '{}' cannot be used in a file name",
                self.gene
            )));
        }
        if self.product == ProductFamily::Adult && self.time_point.contains('E') {
            return Err(ServiceError::InvalidQuery(format!(
                "there is no adult with age {}",
                self.time_point
            )));
        }
        Ok(())
    }

    /// Plane tag used in queries (`*` when any plane matches)
    pub fn plane_pattern(&self) -> &'static str {
        self.plane.map(|p| p.tag()).unwrap_or("*")
    }

    /// RMA criteria selecting non-failed section data sets for this query
    pub fn rma_criteria(&self) -> String {
        [
            "[failed$eq'false']".to_string(),
            format!("reference_space[name$li'*{}*']", self.time_point),
            format!("products[abbreviation$li'{}']", self.product.abbreviation()),
            format!("plane_of_section[name$li'{}']", self.plane_pattern()),
            format!("genes[acronym$eq'{}']", self.gene),
        ]
        .join(",")
    }

    /// File name for one dataset of this query:
    /// `<gene>_<plane>_<time_point>_<dataset_id>.zip`
    pub fn archive_file_name(&self, dataset_id: u64) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            self.gene,
            self.plane.map(|p| p.tag()).unwrap_or("any"),
            self.time_point,
            dataset_id,
            ARCHIVE_EXTENSION
        )
    }
}

/// A section data set (one gene experiment) as listed by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDataSet {
    pub id: u64,
    /// Quality-control timestamp; `None` sorts as the oldest
    pub qc_date: Option<DateTime<Utc>>,
}

impl SectionDataSet {
    pub fn new(id: u64, qc_date: Option<DateTime<Utc>>) -> Self {
        Self { id, qc_date }
    }
}

/// Parse the qc timestamps the service emits (RFC 3339, naive date-times or bare dates)
pub fn parse_qc_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Dataset ids, most recently quality-controlled first. Missing qc dates
/// sort last; ties keep the service order.
pub fn rank_by_qc_date(datasets: &[SectionDataSet]) -> Vec<u64> {
    let mut ranked: Vec<&SectionDataSet> = datasets.iter().collect();
    ranked.sort_by(|a, b| b.qc_date.cmp(&a.qc_date));
    ranked.into_iter().map(|d| d.id).collect()
}

/// Remote source of expression grid datasets
#[async_trait]
pub trait DatasetService: Send + Sync {
    /// All datasets matching `query`, in any order
    async fn find_datasets(&self, query: &DatasetQuery) -> Result<Vec<SectionDataSet>, ServiceError>;

    /// Write the archive of `dataset_id` to `destination`
    async fn materialize(&self, dataset_id: u64, destination: &Path) -> Result<(), ServiceError>;

    /// Matching dataset ids, most recently quality-controlled first
    async fn find_latest(&self, query: &DatasetQuery) -> Result<Vec<u64>, ServiceError> {
        query.validate()?;
        let datasets = self.find_datasets(query).await?;
        Ok(rank_by_qc_date(&datasets))
    }
}

/// Source of structure records for building a taxonomy
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    async fn fetch_structures(&self, graph: GraphSelector) -> Result<Vec<StructureRecord>, ServiceError>;
}

/// Structure records stored as JSON on the local file system, one file per
/// graph. Accepts a bare array of records or a service response envelope
/// with the records under `msg`.
pub struct StructureFileSource {
    base_path: PathBuf,
}

impl StructureFileSource {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// `<base>/structures_<graph>.json`
    pub fn path_for(&self, graph: GraphSelector) -> PathBuf {
        let name = match graph {
            GraphSelector::Adult => "adult",
            GraphSelector::Development => "development",
        };
        self.base_path.join(format!("structures_{}.json", name))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StructureDocument {
    Records(Vec<StructureRecord>),
    Envelope { msg: Vec<StructureRecord> },
}

#[async_trait]
impl TaxonomySource for StructureFileSource {
    async fn fetch_structures(&self, graph: GraphSelector) -> Result<Vec<StructureRecord>, ServiceError> {
        let data = fs::read(self.path_for(graph)).await?;
        let records = match serde_json::from_slice::<StructureDocument>(&data)? {
            StructureDocument::Records(records) => records,
            StructureDocument::Envelope { msg } => msg,
        };
        Ok(records)
    }
}

/// Downloads archives from a [`DatasetService`] into a folder
pub struct Fetcher<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> Clone for Fetcher<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S> Fetcher<S>
where
    S: DatasetService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Download the most recently quality-controlled dataset matching `query`.
    /// Returns `None` when the experiment was never performed.
    pub async fn download_recent(
        &self,
        query: &DatasetQuery,
        folder: &Path,
    ) -> Result<Option<PathBuf>, ServiceError> {
        let ids = self.service.find_latest(query).await?;
        let Some(&dataset_id) = ids.first() else {
            warn!(gene = %query.gene, plane = query.plane_pattern(), "experiment was never performed");
            return Ok(None);
        };
        let path = self.download(query, dataset_id, folder).await?;
        Ok(Some(path))
    }

    /// Download every dataset matching `query`
    pub async fn download_all(&self, query: &DatasetQuery, folder: &Path) -> Result<Vec<PathBuf>, ServiceError> {
        let ids = self.service.find_latest(query).await?;
        let mut paths = Vec::with_capacity(ids.len());
        for dataset_id in ids {
            paths.push(self.download(query, dataset_id, folder).await?);
        }
        Ok(paths)
    }

    /// Materialize one dataset. The archive is written under a temporary
    /// name and renamed into place once complete, so an interrupted download
    /// never leaves a file that looks like a finished archive.
    pub async fn download(&self, query: &DatasetQuery, dataset_id: u64, folder: &Path) -> Result<PathBuf, ServiceError> {
        let final_path = folder.join(query.archive_file_name(dataset_id));
        if final_path.parent() != Some(folder) {
            return Err(ServiceError::InvalidQuery(format!(
                "archive for gene '{}' would land outside {}",
                query.gene,
                folder.display()
            )));
        }
        let partial_path = final_path.with_extension(format!("{}.{}", ARCHIVE_EXTENSION, PARTIAL_SUFFIX));

        debug!(dataset_id, path = %final_path.display(), "materializing dataset");
        if let Err(e) = self.service.materialize(dataset_id, &partial_path).await {
            let _ = fs::remove_file(&partial_path).await;
            return Err(e);
        }
        if !fs::try_exists(&partial_path).await? {
            return Err(ServiceError::Materialize(
                dataset_id,
                "service reported success but wrote no file".to_string(),
            ));
        }
        fs::rename(&partial_path, &final_path).await?;
        Ok(final_path)
    }
}
