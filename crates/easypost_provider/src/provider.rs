use async_trait::async_trait;
use easypost_contract::{
    AddressFields, LabelFormat, ParcelRequest, ProviderAddress, ProviderParcel, ProviderShipment,
    Rate, ShipmentRequest,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("provider returned an undecodable response: {0}")]
    InvalidResponse(String),
    #[error("provider unavailable")]
    Unavailable,
}

impl ProviderError {
    pub fn api(status: u16, code: &str, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    /// Whether repeating the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) | ProviderError::Unavailable => true,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// The remote shipping service. Every method is exactly one round trip.
#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn create_and_verify_address(
        &self,
        address: &AddressFields,
    ) -> Result<ProviderAddress, ProviderError>;

    async fn create_parcel(&self, parcel: &ParcelRequest) -> Result<ProviderParcel, ProviderError>;

    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ProviderShipment, ProviderError>;

    async fn retrieve_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError>;

    async fn list_rates(&self, shipment_id: &str) -> Result<Vec<Rate>, ProviderError>;

    async fn buy_shipment(
        &self,
        shipment_id: &str,
        rate: &Rate,
    ) -> Result<ProviderShipment, ProviderError>;

    /// Renders the purchased label in `format`; the response carries the
    /// updated postage label.
    async fn request_label(
        &self,
        shipment_id: &str,
        format: LabelFormat,
    ) -> Result<ProviderShipment, ProviderError>;

    async fn refund_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::ProviderError;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(ProviderError::api(503, "UNAVAILABLE", "down").is_transient());
        assert!(ProviderError::api(429, "RATE_LIMITED", "slow down").is_transient());
        assert!(ProviderError::Transport("reset".to_string()).is_transient());
    }

    #[test]
    fn validation_errors_are_permanent() {
        assert!(!ProviderError::api(422, "ADDRESS.VERIFY.FAILURE", "bad").is_transient());
        assert!(!ProviderError::api(404, "NOT_FOUND", "missing").is_transient());
        assert!(!ProviderError::InvalidResponse("eof".to_string()).is_transient());
    }
}
