//! Wire submissions and persisted records
//!
//! A `NewRecord` is the nested shape accepted on the wire:
//! `{road_state, agent_data: {user_id, accelerometer: {x,y,z}, gps: {latitude, longitude}, timestamp}}`.
//! A `ProcessedRecord` is the flattened row the store returns once an id is assigned.

use crate::domain::types::{AccelerometerSample, AggregatedData, GpsSample, UserId};
use crate::error::ValidationError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

const TIMESTAMP_ERROR: &str =
    "Invalid timestamp format. Expected ISO 8601 format (YYYY-MM-DDTHH:MM:SSZ).";

/// Naive layouts accepted in addition to RFC 3339 (interpreted as UTC)
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse an ISO-8601 timestamp
///
/// Offsets are honoured and normalised to UTC; timestamps without an offset
/// are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an ISO 8601 timestamp string")
        }

        fn visit_str<E>(self, value: &str) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            parse_timestamp(value).ok_or_else(|| E::custom(TIMESTAMP_ERROR))
        }
    }

    deserializer.deserialize_str(TimestampVisitor)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentData {
    pub user_id: UserId,
    pub accelerometer: AccelerometerSample,
    pub gps: GpsSample,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A record submitted for storage (no id yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub road_state: String,
    pub agent_data: AgentData,
}

impl NewRecord {
    /// Attach a classification label to an aggregated sample
    pub fn from_sample(road_state: &str, sample: &AggregatedData) -> Self {
        Self {
            road_state: road_state.to_string(),
            agent_data: AgentData {
                user_id: sample.user_id,
                accelerometer: sample.accelerometer,
                gps: sample.gps,
                timestamp: sample.captured_at,
            },
        }
    }

    /// Parse a whole submission; any invalid item rejects all of them
    pub fn parse_batch(body: &[u8]) -> Result<Vec<NewRecord>, ValidationError> {
        let records: Vec<NewRecord> = serde_json::from_slice(body)?;
        if records.is_empty() {
            return Err(ValidationError::new("submission contains no records"));
        }
        Ok(records)
    }

    pub fn parse_one(body: &[u8]) -> Result<NewRecord, ValidationError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Flattened persisted record with a store-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: i64,
    pub road_state: String,
    pub user_id: UserId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn from_new(id: i64, record: &NewRecord) -> Self {
        let data = &record.agent_data;
        Self {
            id,
            road_state: record.road_state.clone(),
            user_id: data.user_id,
            x: data.accelerometer.x,
            y: data.accelerometer.y,
            z: data.accelerometer.z,
            latitude: data.gps.latitude,
            longitude: data.gps.longitude,
            timestamp: data.timestamp,
        }
    }

    /// True when every flattened field equals the submission's (id aside)
    pub fn same_fields(&self, record: &NewRecord) -> bool {
        *self == Self::from_new(self.id, record)
    }
}
