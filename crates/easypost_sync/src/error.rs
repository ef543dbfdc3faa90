use easypost_contract::{EventError, InvalidParcel, RefundStatus};
use easypost_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
    #[error("shipment {0} has not been synced to the provider")]
    ShipmentNotSynced(String),
    #[error("parcel {0} has not been synced to the provider")]
    ParcelNotSynced(String),
    #[error(transparent)]
    InvalidParcel(#[from] InvalidParcel),
    #[error("provider parcel uses unknown predefined package {0:?}")]
    UnknownPackage(String),
    #[error("no rate for shipment {shipment_id} matches the carrier and service filters")]
    NoMatchingRate { shipment_id: String },
    #[error("rate carrier {0:?} is not supported")]
    UnsupportedCarrier(String),
    #[error("refund for shipment {shipment_id} already requested (status {status})")]
    RefundAlreadyRequested {
        shipment_id: String,
        status: RefundStatus,
    },
    #[error("no local shipment for provider shipment {0}")]
    ShipmentNotFound(String),
    #[error("tracker {0:?} is not attached to a shipment")]
    TrackerWithoutShipment(Option<String>),
    #[error("label {0} not found")]
    LabelNotFound(String),
    #[error("address {0} not found")]
    AddressNotFound(String),
    #[error("malformed webhook event: {0}")]
    MalformedEvent(#[source] EventError),
    #[error("tracking event for shipment {shipment_id} has an invalid timestamp: {source}")]
    InvalidTimestamp {
        shipment_id: String,
        #[source]
        source: EventError,
    },
}

impl SyncError {
    /// Whether the job that raised this error should be tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Provider(error) => error.is_transient(),
            _ => false,
        }
    }
}
