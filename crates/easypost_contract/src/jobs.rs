use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::model::LabelId;
use crate::status::ParseEnumError;

pub type JobId = String;

/// Work that runs off the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Raw webhook body, kept as opaque bytes until the worker parses it.
    ProcessWebhook { payload_base64: String },
    BackfillLabelFormats { label_id: LabelId },
    UpdateRefundStatuses,
}

impl JobKind {
    pub fn process_webhook(body: &[u8]) -> Self {
        JobKind::ProcessWebhook {
            payload_base64: STANDARD.encode(body),
        }
    }

    pub fn backfill_label_formats(label_id: impl Into<LabelId>) -> Self {
        JobKind::BackfillLabelFormats {
            label_id: label_id.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            JobKind::ProcessWebhook { .. } => "process_webhook",
            JobKind::BackfillLabelFormats { .. } => "backfill_label_formats",
            JobKind::UpdateRefundStatuses => "update_refund_statuses",
        }
    }

    pub fn decode_payload(payload_base64: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(payload_base64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Retrying,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Jobs in these states are re-dispatched when the worker starts.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Running | JobStatus::Retrying
        )
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "retrying" => Ok(JobStatus::Retrying),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseEnumError {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
