//! Sensor sample types produced by the replayable sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for the agent identity that tags every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Three-axis accelerometer reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerometerSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Parking sensor reading and the position it was taken at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParkingSample {
    /// Free-space count (or distance) reported by the sensor
    pub empty_count: f64,
    pub gps: GpsSample,
}

impl ParkingSample {
    pub fn new(empty_count: f64, gps: GpsSample) -> Self {
        Self { empty_count, gps }
    }
}

/// One combined reading from all three streams at one aggregation tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedData {
    pub accelerometer: AccelerometerSample,
    pub gps: GpsSample,
    pub parking: ParkingSample,
    /// Wall-clock time at emission
    pub captured_at: DateTime<Utc>,
    pub user_id: UserId,
}
