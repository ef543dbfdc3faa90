use std::time::Duration;

use async_trait::async_trait;
use easypost_contract::{
    AddressFields, LabelFormat, ParcelRequest, ProviderAddress, ProviderParcel, ProviderShipment,
    Rate, ShipmentRequest,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::provider::{ProviderError, ShippingProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.easypost.com/v2";

/// Credentials and endpoint for one provider account.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpShippingProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct AddressEnvelope {
    address: ProviderAddress,
}

#[derive(Debug, Deserialize)]
struct RatesEnvelope {
    #[serde(default)]
    rates: Vec<Rate>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl HttpShippingProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("easypost-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<T, ProviderError> {
        debug!(path = %path, "provider request");
        let response = request
            .basic_auth(&self.config.api_key, None::<&str>)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_slice(&body).map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl ShippingProvider for HttpShippingProvider {
    async fn create_and_verify_address(
        &self,
        address: &AddressFields,
    ) -> Result<ProviderAddress, ProviderError> {
        let path = "addresses/create_and_verify";
        let envelope: AddressEnvelope = self
            .send(
                self.client
                    .post(self.url(path))
                    .json(&json!({ "address": address })),
                path,
            )
            .await?;
        Ok(envelope.address)
    }

    async fn create_parcel(&self, parcel: &ParcelRequest) -> Result<ProviderParcel, ProviderError> {
        let path = "parcels";
        self.send(
            self.client
                .post(self.url(path))
                .json(&json!({ "parcel": parcel })),
            path,
        )
        .await
    }

    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ProviderShipment, ProviderError> {
        let path = "shipments";
        self.send(
            self.client
                .post(self.url(path))
                .json(&json!({ "shipment": request })),
            path,
        )
        .await
    }

    async fn retrieve_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError> {
        let path = format!("shipments/{shipment_id}");
        self.send(self.client.get(self.url(&path)), &path).await
    }

    async fn list_rates(&self, shipment_id: &str) -> Result<Vec<Rate>, ProviderError> {
        let path = format!("shipments/{shipment_id}/rates");
        let envelope: RatesEnvelope = self.send(self.client.get(self.url(&path)), &path).await?;
        Ok(envelope.rates)
    }

    async fn buy_shipment(
        &self,
        shipment_id: &str,
        rate: &Rate,
    ) -> Result<ProviderShipment, ProviderError> {
        let path = format!("shipments/{shipment_id}/buy");
        self.send(
            self.client
                .post(self.url(&path))
                .json(&json!({ "rate": { "id": rate.id } })),
            &path,
        )
        .await
    }

    async fn request_label(
        &self,
        shipment_id: &str,
        format: LabelFormat,
    ) -> Result<ProviderShipment, ProviderError> {
        let path = format!("shipments/{shipment_id}/label");
        self.send(
            self.client
                .get(self.url(&path))
                .query(&[("file_format", format.file_format())]),
            &path,
        )
        .await
    }

    async fn refund_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError> {
        let path = format!("shipments/{shipment_id}/refund");
        self.send(self.client.post(self.url(&path)), &path).await
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn api_error(status: u16, body: &[u8]) -> ProviderError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status,
            code: envelope.error.code,
            message: envelope
                .error
                .message
                .unwrap_or_else(|| "no message".to_string()),
        },
        Err(_) => ProviderError::Api {
            status,
            code: None,
            message: String::from_utf8_lossy(body).trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_tolerates_slashes() {
        assert_eq!(
            join_url("https://api.easypost.com/v2/", "/shipments/shp_1"),
            "https://api.easypost.com/v2/shipments/shp_1"
        );
    }

    #[test]
    fn api_error_reads_provider_envelope() {
        let body = br#"{"error": {"code": "ADDRESS.VERIFY.FAILURE", "message": "Unable to verify address."}}"#;
        match api_error(422, body) {
            ProviderError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 422);
                assert_eq!(code.as_deref(), Some("ADDRESS.VERIFY.FAILURE"));
                assert_eq!(message, "Unable to verify address.");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_raw_body() {
        let error = api_error(502, b"Bad Gateway\n");
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "provider rejected request (502): Bad Gateway");
    }
}
