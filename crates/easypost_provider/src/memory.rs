use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use easypost_contract::{
    AddressFields, LabelFormat, ParcelRequest, PostageLabel, ProviderAddress, ProviderParcel,
    ProviderShipment, Rate, ShipmentRequest,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::provider::{ProviderError, ShippingProvider};

const LABEL_HOST: &str = "https://labels.easypost.test";

/// Number of calls made against each provider operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub verify_address: usize,
    pub create_parcel: usize,
    pub create_shipment: usize,
    pub retrieve_shipment: usize,
    pub list_rates: usize,
    pub buy: usize,
    pub request_label: usize,
    pub refund: usize,
}

/// Deterministic stand-in for the remote provider.
///
/// Every shipment is offered the same four rates; bought labels get stable
/// URLs under a fake host. Failures can be injected per shipment or per
/// label format.
#[derive(Debug, Default)]
pub struct InMemoryShippingProvider {
    state: Mutex<SimulatedState>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    next_id: u64,
    parcels: HashMap<String, ProviderParcel>,
    shipments: HashMap<String, ProviderShipment>,
    unavailable: HashSet<String>,
    failing_formats: HashSet<LabelFormat>,
    blank_formats: HashSet<LabelFormat>,
    calls: CallCounts,
}

impl SimulatedState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }

    fn shipment_mut(&mut self, shipment_id: &str) -> Result<&mut ProviderShipment, ProviderError> {
        if self.unavailable.contains(shipment_id) {
            return Err(ProviderError::Unavailable);
        }
        self.shipments
            .get_mut(shipment_id)
            .ok_or_else(|| ProviderError::api(404, "NOT_FOUND", format!("shipment {shipment_id} not found")))
    }
}

impl InMemoryShippingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    pub async fn shipment(&self, shipment_id: &str) -> Option<ProviderShipment> {
        self.state.lock().await.shipments.get(shipment_id).cloned()
    }

    /// Makes every later request for `format` fail with a validation error.
    pub async fn fail_label_format(&self, format: LabelFormat) {
        self.state.lock().await.failing_formats.insert(format);
    }

    /// Makes later requests for `format` succeed with no URL for it in the
    /// response.
    pub async fn blank_label_format(&self, format: LabelFormat) {
        self.state.lock().await.blank_formats.insert(format);
    }

    /// Makes every later call touching `shipment_id` fail as unreachable.
    pub async fn make_unavailable(&self, shipment_id: &str) {
        self.state
            .lock()
            .await
            .unavailable
            .insert(shipment_id.to_string());
    }

    /// Simulates the carrier settling a refund.
    pub async fn set_refund_status(&self, shipment_id: &str, status: &str) {
        if let Some(shipment) = self.state.lock().await.shipments.get_mut(shipment_id) {
            shipment.refund_status = Some(status.to_string());
        }
    }

    /// Simulates the provider assigning a tracker to a shipment.
    pub async fn set_tracking_code(&self, shipment_id: &str, tracking_code: &str) {
        if let Some(shipment) = self.state.lock().await.shipments.get_mut(shipment_id) {
            shipment.tracking_code = Some(tracking_code.to_string());
        }
    }
}

fn format_url(postage: &mut PostageLabel, format: LabelFormat) -> &mut Option<String> {
    match format {
        LabelFormat::Png => &mut postage.label_url,
        LabelFormat::Pdf => &mut postage.label_pdf_url,
        LabelFormat::Epl2 => &mut postage.label_epl2_url,
        LabelFormat::Zpl => &mut postage.label_zpl_url,
    }
}

#[async_trait]
impl ShippingProvider for InMemoryShippingProvider {
    async fn create_and_verify_address(
        &self,
        address: &AddressFields,
    ) -> Result<ProviderAddress, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.verify_address += 1;

        if address.street1.trim().is_empty()
            || (address.city.trim().is_empty() && address.zip.trim().is_empty())
        {
            return Err(ProviderError::api(
                422,
                "ADDRESS.VERIFY.FAILURE",
                "Unable to verify address.",
            ));
        }

        Ok(ProviderAddress {
            id: Some(state.next("adr")),
            name: Some(address.name.trim().to_ascii_uppercase()),
            street1: Some(address.street1.trim().to_ascii_uppercase()),
            street2: Some(address.street2.trim().to_ascii_uppercase()),
            city: Some(address.city.trim().to_ascii_uppercase()),
            state: Some(address.state.trim().to_ascii_uppercase()),
            zip: Some(address.zip.trim().to_string()),
            country: Some(address.country.trim().to_ascii_uppercase()),
            phone: Some(address.phone.chars().filter(char::is_ascii_digit).collect()),
            email: Some(address.email.trim().to_ascii_lowercase()),
        })
    }

    async fn create_parcel(&self, parcel: &ParcelRequest) -> Result<ProviderParcel, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.create_parcel += 1;

        let has_dimensions =
            parcel.length.is_some() && parcel.width.is_some() && parcel.height.is_some();
        if parcel.predefined_package.is_none() && !has_dimensions {
            return Err(ProviderError::api(
                422,
                "PARCEL.CREATE.FAILURE",
                "Parcel requires dimensions or a predefined package.",
            ));
        }
        if parcel.weight <= 0.0 {
            return Err(ProviderError::api(
                422,
                "PARCEL.CREATE.FAILURE",
                "Parcel weight must be positive.",
            ));
        }

        let created = ProviderParcel {
            id: state.next("prcl"),
            predefined_package: parcel.predefined_package.map(|package| package.tag().to_string()),
            length: parcel.length,
            width: parcel.width,
            height: parcel.height,
            weight: parcel.weight,
        };
        state.parcels.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ProviderShipment, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.create_shipment += 1;

        if !state.parcels.contains_key(&request.parcel.id) {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.INVALID_PARAMS",
                format!("parcel {} not found", request.parcel.id),
            ));
        }

        let id = state.next("shp");
        let rates = [
            ("USPS", "Priority", 758),
            ("USPS", "Express", 2635),
            ("UPS", "Ground", 912),
            ("FedEx", "FEDEX_GROUND", 1005),
        ]
        .into_iter()
        .map(|(carrier, service, cents)| Rate {
            id: state.next("rate"),
            carrier: carrier.to_string(),
            service: service.to_string(),
            rate: Decimal::new(cents, 2),
            currency: Some("USD".to_string()),
            shipment_id: Some(id.clone()),
        })
        .collect();

        let shipment = ProviderShipment {
            id: id.clone(),
            tracking_code: None,
            rates,
            selected_rate: None,
            postage_label: None,
            refund_status: None,
            is_return: Some(request.is_return),
        };
        state.shipments.insert(id, shipment.clone());
        Ok(shipment)
    }

    async fn retrieve_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.retrieve_shipment += 1;
        state.shipment_mut(shipment_id).map(|shipment| shipment.clone())
    }

    async fn list_rates(&self, shipment_id: &str) -> Result<Vec<Rate>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.list_rates += 1;
        state
            .shipment_mut(shipment_id)
            .map(|shipment| shipment.rates.clone())
    }

    async fn buy_shipment(
        &self,
        shipment_id: &str,
        rate: &Rate,
    ) -> Result<ProviderShipment, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.buy += 1;
        let label_id = state.next("pl");
        let tracking_code = format!("9400{:018}", state.next_id);

        let shipment = state.shipment_mut(shipment_id)?;
        if shipment.postage_label.is_some() {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.POSTAGE.EXISTS",
                "Postage already exists for this shipment.",
            ));
        }
        let selected = shipment
            .rates
            .iter()
            .find(|candidate| candidate.id == rate.id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::api(422, "SHIPMENT.RATE.INVALID", format!("rate {} not offered", rate.id))
            })?;

        shipment.selected_rate = Some(selected);
        shipment.tracking_code = Some(tracking_code);
        shipment.postage_label = Some(PostageLabel {
            id: Some(label_id),
            label_url: Some(format!("{LABEL_HOST}/{shipment_id}.png")),
            ..PostageLabel::default()
        });
        info!(shipment_id = %shipment_id, rate_id = %rate.id, "simulated label purchase");
        Ok(shipment.clone())
    }

    async fn request_label(
        &self,
        shipment_id: &str,
        format: LabelFormat,
    ) -> Result<ProviderShipment, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.request_label += 1;
        let failing = state.failing_formats.contains(&format);
        let blank = state.blank_formats.contains(&format);

        let shipment = state.shipment_mut(shipment_id)?;
        let Some(postage) = shipment.postage_label.as_mut() else {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.POSTAGE.REQUIRED",
                "A label must be purchased before requesting other formats.",
            ));
        };
        if failing {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.LABEL.FORMAT",
                format!("{} rendering is not available", format.file_format()),
            ));
        }

        if !blank {
            let url = Some(format!("{LABEL_HOST}/{shipment_id}.{}", format.as_str()));
            *format_url(postage, format) = url;
        }
        let mut response = shipment.clone();
        if let (true, Some(postage)) = (blank, response.postage_label.as_mut()) {
            *format_url(postage, format) = None;
        }
        Ok(response)
    }

    async fn refund_shipment(&self, shipment_id: &str) -> Result<ProviderShipment, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.refund += 1;

        let shipment = state.shipment_mut(shipment_id)?;
        if shipment.postage_label.is_none() {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.REFUND.UNAVAILABLE",
                "Only purchased shipments can be refunded.",
            ));
        }
        if shipment.refund_status.is_some() {
            return Err(ProviderError::api(
                422,
                "SHIPMENT.REFUND.EXISTS",
                "A refund was already requested.",
            ));
        }
        shipment.refund_status = Some("submitted".to_string());
        Ok(shipment.clone())
    }
}
