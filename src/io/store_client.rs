//! HTTP client for a remote store API
//!
//! Used when the producer runs apart from the hub (`store.mode = "http"`).
//! Batches are POSTed as a JSON array of wire records to
//! `{api_url}/processed_agent_data/`; any non-2xx answer counts as a failed
//! save so the batch buffer keeps the samples for the next attempt.

use crate::domain::record::{NewRecord, ProcessedRecord};
use crate::error::StoreError;
use crate::infra::config::Config;
use crate::services::store_gateway::StoreGateway;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info};

const RESOURCE: &str = "processed_agent_data";

pub struct HttpStoreClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStoreClient {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        Self::with_base_url(config.store_api_url(), Duration::from_millis(config.store_timeout_ms()))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        // Client is created once for connection pooling
        let client = reqwest::Client::builder().timeout(timeout).http1_only().build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "store_client_initialized");
        Ok(Self { client, base_url })
    }

    fn collection_url(&self) -> String {
        format!("{}/{}/", self.base_url, RESOURCE)
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/{}/{}", self.base_url, RESOURCE, id)
    }

    /// Decode a single-record answer, mapping 404 to `None`
    async fn optional_record(
        response: reqwest::Response,
    ) -> Result<Option<ProcessedRecord>, StoreError> {
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(StoreError::Rejected { status: status.as_u16() }),
        }
    }
}

#[async_trait]
impl StoreGateway for HttpStoreClient {
    async fn save(&self, records: &[NewRecord]) -> Result<Vec<ProcessedRecord>, StoreError> {
        let response = self.client.post(self.collection_url()).json(records).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status.as_u16(), count = records.len(), "store_api_save_rejected");
            return Err(StoreError::Rejected { status: status.as_u16() });
        }
        Ok(response.json().await?)
    }

    async fn get(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        let response = self.client.get(self.item_url(id)).send().await?;
        Self::optional_record(response).await
    }

    async fn list(&self) -> Result<Vec<ProcessedRecord>, StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Rejected { status: status.as_u16() });
        }
        Ok(response.json().await?)
    }

    async fn update(
        &self,
        id: i64,
        record: &NewRecord,
    ) -> Result<Option<ProcessedRecord>, StoreError> {
        let response = self.client.put(self.item_url(id)).json(record).send().await?;
        Self::optional_record(response).await
    }

    async fn delete(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        let response = self.client.delete(self.item_url(id)).send().await?;
        Self::optional_record(response).await
    }

    fn backend_type(&self) -> &'static str {
        "HTTP"
    }
}
