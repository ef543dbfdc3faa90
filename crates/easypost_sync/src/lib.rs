pub mod config;
pub mod error;
pub mod service;
pub mod tasks;

pub use config::{DuplicateRefundPolicy, SyncConfig};
pub use error::SyncError;
pub use service::{BuyLabelOptions, ShipmentSync};
pub use tasks::{BackfillReport, FormatFailure, RefundPollReport, WebhookOutcome};
