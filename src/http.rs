//! Allen Brain Atlas API backend (feature `http-client`)

use crate::error::ServiceError;
use crate::service::{parse_qc_date, DatasetQuery, DatasetService, SectionDataSet, TaxonomySource};
use crate::taxonomy::StructureRecord;
use crate::types::GraphSelector;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Public endpoint of the Allen Brain Atlas API
pub const DEFAULT_BASE_URL: &str = "http://api.brain-map.org";

/// Reqwest-backed [`DatasetService`] and [`TaxonomySource`]
#[derive(Debug, Clone)]
pub struct AllenApiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RmaEnvelope {
    success: bool,
    msg: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DatasetRow {
    id: u64,
    qc_date: Option<String>,
}

impl AllenApiClient {
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_base_url(DEFAULT_BASE_URL, Duration::from_secs(60))
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// RMA query listing the section data sets matching `query`
    pub fn dataset_query_url(&self, query: &DatasetQuery) -> String {
        format!(
            "{}/api/v2/data/query.json?criteria=model::SectionDataSet,rma::criteria,{},rma::options[only$eq'id,qc_date'][num_rows$eq'all']",
            self.base_url,
            query.rma_criteria()
        )
    }

    /// RMA query listing every structure of one ontology graph
    pub fn structures_url(&self, graph: GraphSelector) -> String {
        format!(
            "{}/api/v2/data/query.json?criteria=model::Structure,rma::criteria,[graph_id$eq{}],rma::options[num_rows$eq'all'][order$eq'structures.graph_order']",
            self.base_url,
            graph.graph_id()
        )
    }

    /// Expression grid archive of one section data set
    pub fn grid_download_url(&self, dataset_id: u64) -> String {
        format!("{}/grid_data/download/{}", self.base_url, dataset_id)
    }

    async fn rma_query<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, ServiceError> {
        debug!(url, "rma query");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(network_error)?;
        if !response.status().is_success() {
            return Err(ServiceError::BadResponse(format!(
                "status {} for {}",
                response.status(),
                url
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(network_error)?;
        parse_rma(&body)
    }
}

/// Client timeouts count as stalls, like the loader's own fetch timeout
fn network_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::TimedOut(e.to_string())
    } else {
        ServiceError::Network(e.to_string())
    }
}

/// Unwrap an RMA response. Failed queries carry the server message as a string.
fn parse_rma<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>, ServiceError> {
    let envelope: RmaEnvelope = serde_json::from_slice(body)?;
    if !envelope.success {
        let message = match envelope.msg {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(ServiceError::BadResponse(message));
    }
    Ok(serde_json::from_value(envelope.msg)?)
}

#[async_trait]
impl DatasetService for AllenApiClient {
    async fn find_datasets(&self, query: &DatasetQuery) -> Result<Vec<SectionDataSet>, ServiceError> {
        query.validate()?;
        let rows: Vec<DatasetRow> = self.rma_query(&self.dataset_query_url(query)).await?;
        Ok(rows
            .into_iter()
            .map(|row| SectionDataSet::new(row.id, row.qc_date.as_deref().and_then(parse_qc_date)))
            .collect())
    }

    async fn materialize(&self, dataset_id: u64, destination: &Path) -> Result<(), ServiceError> {
        let url = self.grid_download_url(dataset_id);
        let failed = |e: reqwest::Error| {
            if e.is_timeout() {
                ServiceError::TimedOut(format!("dataset {}: {}", dataset_id, e))
            } else {
                ServiceError::Materialize(dataset_id, e.to_string())
            }
        };

        let mut response = self.client.get(&url).send().await.map_err(failed)?;
        if !response.status().is_success() {
            return Err(ServiceError::Materialize(
                dataset_id,
                format!("status {}", response.status()),
            ));
        }

        let mut file = File::create(destination).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(failed)? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        debug!(dataset_id, bytes = written, "grid archive downloaded");
        Ok(())
    }
}

#[async_trait]
impl TaxonomySource for AllenApiClient {
    async fn fetch_structures(&self, graph: GraphSelector) -> Result<Vec<StructureRecord>, ServiceError> {
        self.rma_query(&self.structures_url(graph)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectionPlane;

    #[test]
    fn test_urls() {
        let client = AllenApiClient::with_base_url("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        let query = DatasetQuery::new("Sst").with_plane(Some(SectionPlane::Coronal));
        let url = client.dataset_query_url(&query);
        assert!(url.starts_with("http://localhost:8080/api/v2/data/query.json?criteria=model::SectionDataSet"));
        assert!(url.contains("genes[acronym$eq'Sst']"));
        assert!(url.contains("plane_of_section[name$li'coronal']"));

        assert!(client
            .structures_url(GraphSelector::Development)
            .contains("[graph_id$eq17]"));
        assert_eq!(client.grid_download_url(42), "http://localhost:8080/grid_data/download/42");
    }

    #[test]
    fn test_parse_rma() {
        let body = br#"{"success": true, "msg": [{"id": 7, "qc_date": null}, {"id": 9, "qc_date": "2012-03-09T00:00:00Z"}]}"#;
        let rows: Vec<DatasetRow> = parse_rma(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, 9);

        let body = br#"{"success": false, "msg": "Data Access error in query"}"#;
        let err = parse_rma::<DatasetRow>(body).unwrap_err();
        assert!(matches!(err, ServiceError::BadResponse(m) if m.contains("Data Access")));
    }
}
