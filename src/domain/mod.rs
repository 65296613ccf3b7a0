//! Domain models - sensor samples and persisted records
//!
//! - `types` - accelerometer/GPS/parking samples and the aggregated sample
//! - `record` - wire submissions and the flattened persisted record

pub mod record;
pub mod types;

pub use record::{AgentData, NewRecord, ProcessedRecord};
pub use types::{AccelerometerSample, AggregatedData, GpsSample, ParkingSample, UserId};
