//! # Frame Records
//!
//! The persisted unit of ingestion and its JSON wire representation.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sender identity used when the transport cannot identify the sender
pub const UNKNOWN_SENDER: &str = "unknown-sender";

/// Structured sensor readings, populated only by ingestion paths that parse
/// structured payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorReadings {
    pub temperature: Option<f64>,
    pub turbidity: Option<f64>,
    pub ph: Option<f64>,
    pub image_ref: Option<String>,
}

/// A record accepted for storage but not yet assigned an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewFrameRecord {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub readings: SensorReadings,
    pub payload: Option<String>,
}

/// A persisted frame record
///
/// Serializes to `{id, device_id, timestamp, temperature, turbidity, ph,
/// image_ref, payload}` with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub id: i64,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub readings: SensorReadings,
    pub payload: Option<String>,
}

impl NewFrameRecord {
    /// Build a record for a raw, unparsed frame from an unidentified sender
    pub fn raw(payload: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: UNKNOWN_SENDER.to_string(),
            timestamp,
            readings: SensorReadings::default(),
            payload: Some(payload.into()),
        }
    }

    /// Attach the store-assigned id
    pub fn with_id(self, id: i64) -> FrameRecord {
        FrameRecord {
            id,
            device_id: self.device_id,
            timestamp: self.timestamp,
            readings: self.readings,
            payload: self.payload,
        }
    }
}

/// Truncate a timestamp to the microsecond resolution the stores keep
pub fn to_storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}
