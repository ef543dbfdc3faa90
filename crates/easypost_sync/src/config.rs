use serde::{Deserialize, Serialize};

/// What `refund` does for a shipment whose refund was already requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRefundPolicy {
    #[default]
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub on_duplicate_refund: DuplicateRefundPolicy,
}
