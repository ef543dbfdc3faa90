use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::PredefinedPackage;
use crate::status::{Carrier, LabelFormat, RefundStatus, TrackingStatus};
use crate::wire::{AddressFields, ParcelRequest, PostageLabel, ProviderAddress};

pub type AddressId = String;
pub type ParcelId = String;
pub type ShipmentId = String;
pub type LabelId = String;
pub type ProviderId = String;

pub const DEFAULT_COUNTRY: &str = "US";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub name: String,
    pub street1: String,
    pub street2: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub phone: String,
    pub email: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    /// Field set sent to the provider. Addresses are always sent by value.
    pub fn fields(&self) -> AddressFields {
        AddressFields {
            name: self.name.clone(),
            street1: self.street1.clone(),
            street2: self.street2.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip_code.clone(),
            country: self.country.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
        }
    }

    /// Overwrites every field with the provider's normalized values and marks
    /// the address verified.
    pub fn apply_verification(&mut self, verified: ProviderAddress) {
        self.name = verified.name.unwrap_or_default();
        self.street1 = verified.street1.unwrap_or_default();
        self.street2 = verified.street2.unwrap_or_default();
        self.city = verified.city.unwrap_or_default();
        self.state = verified.state.unwrap_or_default();
        self.zip_code = verified.zip.unwrap_or_default();
        self.country = verified.country.unwrap_or_default();
        self.phone = verified.phone.unwrap_or_default();
        self.email = verified.email.unwrap_or_default();
        self.verified = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAddress {
    pub name: String,
    pub street1: String,
    pub street2: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub phone: String,
    pub email: String,
}

impl Default for NewAddress {
    fn default() -> Self {
        Self {
            name: String::new(),
            street1: String::new(),
            street2: String::new(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            country: DEFAULT_COUNTRY.to_string(),
            phone: String::new(),
            email: String::new(),
        }
    }
}

/// Physical description of a parcel: a carrier package type or raw dimensions
/// in inches, never both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelShape {
    Predefined(PredefinedPackage),
    Dimensions { length: f64, width: f64, height: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidParcel {
    #[error("parcel weight must be a positive number of ounces, got {0}")]
    Weight(f64),
    #[error("parcel {axis} must be a positive number of inches, got {value}")]
    Dimension { axis: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: ParcelId,
    pub shipment_id: Option<ShipmentId>,
    pub provider_id: Option<ProviderId>,
    pub shape: ParcelShape,
    /// Ounces.
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

impl Parcel {
    pub fn request(&self) -> ParcelRequest {
        ParcelRequest::new(&self.shape, self.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParcel {
    pub shipment_id: Option<ShipmentId>,
    pub shape: ParcelShape,
    pub weight: f64,
}

impl NewParcel {
    pub fn validate(&self) -> Result<(), InvalidParcel> {
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(InvalidParcel::Weight(self.weight));
        }
        if let ParcelShape::Dimensions {
            length,
            width,
            height,
        } = self.shape
        {
            for (axis, value) in [("length", length), ("width", width), ("height", height)] {
                if !(value.is_finite() && value > 0.0) {
                    return Err(InvalidParcel::Dimension { axis, value });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub to_address_id: AddressId,
    pub from_address_id: AddressId,
    pub is_return: bool,
    pub refund_status: RefundStatus,
    pub provider_id: Option<ProviderId>,
    pub tracking_code: Option<String>,
    pub tracking_status: TrackingStatus,
    pub carrier: Carrier,
    pub service: Option<String>,
    pub rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShipment {
    pub to_address_id: AddressId,
    pub from_address_id: AddressId,
    pub is_return: bool,
}

/// One rendered label file and when its URL was last copied from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelArtifact {
    pub url: String,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub shipment_id: ShipmentId,
    pub provider_id: Option<ProviderId>,
    pub label_url: Option<String>,
    pub artifacts: BTreeMap<LabelFormat, LabelArtifact>,
    pub created_at: DateTime<Utc>,
}

impl Label {
    pub fn url(&self, format: LabelFormat) -> Option<&str> {
        self.artifacts.get(&format).map(|artifact| artifact.url.as_str())
    }

    /// Copies every URL present on `postage` and returns the formats touched.
    /// Formats absent from the response keep their previous value.
    pub fn record_postage(&mut self, postage: &PostageLabel, at: DateTime<Utc>) -> Vec<LabelFormat> {
        if let Some(url) = non_empty(postage.label_url.as_deref()) {
            self.label_url = Some(url.to_string());
        }
        let artifacts = artifacts_from_postage(postage, at);
        let touched = artifacts.keys().copied().collect();
        self.artifacts.extend(artifacts);
        touched
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLabel {
    pub shipment_id: ShipmentId,
    pub provider_id: Option<ProviderId>,
    pub label_url: Option<String>,
    pub artifacts: BTreeMap<LabelFormat, LabelArtifact>,
}

impl NewLabel {
    pub fn from_purchase(
        shipment_id: &str,
        provider_id: &str,
        postage: Option<&PostageLabel>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            shipment_id: shipment_id.to_string(),
            provider_id: Some(provider_id.to_string()),
            label_url: postage
                .and_then(|label| non_empty(label.label_url.as_deref()))
                .map(str::to_string),
            artifacts: postage
                .map(|label| artifacts_from_postage(label, at))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingHistoryEntry {
    pub id: i64,
    pub shipment_id: ShipmentId,
    pub status: String,
    pub message: String,
    /// Timestamp reported by the provider for this tracking event.
    pub update_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

fn artifacts_from_postage(
    postage: &PostageLabel,
    at: DateTime<Utc>,
) -> BTreeMap<LabelFormat, LabelArtifact> {
    LabelFormat::BACKFILL_ORDER
        .into_iter()
        .filter_map(|format| {
            non_empty(postage.url_for(format)).map(|url| {
                (
                    format,
                    LabelArtifact {
                        url: url.to_string(),
                        refreshed_at: at,
                    },
                )
            })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|url| !url.trim().is_empty())
}
