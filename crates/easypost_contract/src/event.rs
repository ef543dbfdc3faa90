//! Webhook event envelopes pushed by the provider.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::status::TrackingStatus;

pub const TRACKER_UPDATED: &str = "tracker.updated";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("webhook payload is not a valid event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("event {description} carries an invalid result: {source}")]
    InvalidResult {
        description: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unparseable tracking timestamp {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub result: Value,
}

/// The subset of events this service acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    TrackerUpdated(Tracker),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    pub status: TrackingStatus,
    #[serde(default)]
    pub shipment_id: Option<String>,
    #[serde(default)]
    pub tracking_details: Vec<TrackingDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingDetail {
    pub datetime: String,
    #[serde(default)]
    pub message: Option<String>,
    pub status: String,
}

impl TrackingDetail {
    pub fn occurred_at(&self) -> Result<DateTime<Utc>, EventError> {
        parse_event_time(&self.datetime)
    }
}

impl Event {
    /// Decodes a raw webhook body into an event envelope.
    pub fn receive(payload: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(payload).map_err(EventError::InvalidEnvelope)
    }

    pub fn kind(&self) -> Result<EventKind, EventError> {
        match self.description.as_str() {
            TRACKER_UPDATED => serde_json::from_value(self.result.clone())
                .map(EventKind::TrackerUpdated)
                .map_err(|source| EventError::InvalidResult {
                    description: self.description.clone(),
                    source,
                }),
            other => Ok(EventKind::Other(other.to_string())),
        }
    }
}

/// Parses provider timestamps: RFC 3339, or a naive ISO 8601 datetime taken
/// as UTC.
pub fn parse_event_time(raw: &str) -> Result<DateTime<Utc>, EventError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EventError::InvalidTimestamp(raw.to_string()))
}
