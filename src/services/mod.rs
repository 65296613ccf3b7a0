//! Services - pipeline logic and shared state
//!
//! This module contains the core services:
//! - `aggregator` - Combines one record from each source per tick
//! - `batch_buffer` - Batches samples for the store, retains on failure
//! - `classifier` - Road-state label for a batch
//! - `store_gateway` - Store CRUD interface
//! - `subscription` - Per-identity live listener registry
//! - `pipeline` - Producer loop tying the above together

pub mod aggregator;
pub mod batch_buffer;
pub mod classifier;
pub mod pipeline;
pub mod store_gateway;
pub mod subscription;

// Re-export commonly used types
pub use aggregator::Aggregator;
pub use batch_buffer::{BatchBuffer, BatchPolicy, FlushOutcome};
pub use classifier::{RoadClassifier, ZAxisClassifier};
pub use pipeline::Pipeline;
pub use store_gateway::StoreGateway;
pub use subscription::{Listener, ListenerId, SubscriptionRegistry};
