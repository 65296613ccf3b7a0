//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `csv_source` - Bounded replayable CSV sources
//! - `sqlite_store` - Embedded SQLite store gateway
//! - `store_client` - HTTP client for a remote store API
//! - `http_api` - Record CRUD API and WebSocket upgrades (hyper)
//! - `live_feed` - Per-listener WebSocket session
//! - `prometheus` - Prometheus text exposition

pub mod csv_source;
pub mod http_api;
pub mod live_feed;
pub mod prometheus;
pub mod sqlite_store;
pub mod store_client;

// Re-export commonly used types
pub use csv_source::{ParkingReading, ReplayableSource, SourceRecord};
pub use http_api::{start_api_server, ApiState};
pub use live_feed::{LiveFeedSession, SessionEnd};
pub use sqlite_store::SqliteStore;
pub use store_client::HttpStoreClient;
