//! Store gateway interface - durable CRUD over processed records
//!
//! `save` is all-or-nothing: either every record of the batch is written and
//! returned with its assigned id, or an error is returned and nothing was
//! written.

use crate::domain::record::{NewRecord, ProcessedRecord};
use crate::error::StoreError;
use async_trait::async_trait;

#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Bulk insert; returns the persisted records in input order
    async fn save(&self, records: &[NewRecord]) -> Result<Vec<ProcessedRecord>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<ProcessedRecord>, StoreError>;

    /// Replace every field of an existing record
    async fn update(&self, id: i64, record: &NewRecord)
        -> Result<Option<ProcessedRecord>, StoreError>;

    /// Remove a record, returning it as it was
    async fn delete(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}
