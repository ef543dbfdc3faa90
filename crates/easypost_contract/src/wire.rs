//! Request and response shapes exchanged with the shipping provider.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::customs::CustomsInfo;
use crate::model::ParcelShape;
use crate::package::PredefinedPackage;
use crate::rates::{lowest_rate, RateFilter};
use crate::status::LabelFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFields {
    pub name: String,
    pub street1: String,
    pub street2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAddress {
    pub id: Option<String>,
    pub name: Option<String>,
    pub street1: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predefined_package: Option<PredefinedPackage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub weight: f64,
}

impl ParcelRequest {
    pub fn new(shape: &ParcelShape, weight: f64) -> Self {
        match *shape {
            ParcelShape::Predefined(package) => Self {
                predefined_package: Some(package),
                length: None,
                width: None,
                height: None,
                weight,
            },
            ParcelShape::Dimensions {
                length,
                width,
                height,
            } => Self {
                predefined_package: None,
                length: Some(length),
                width: Some(width),
                height: Some(height),
                weight,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderParcel {
    pub id: String,
    #[serde(default)]
    pub predefined_package: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipmentRequest {
    pub to_address: AddressFields,
    pub from_address: AddressFields,
    pub parcel: ParcelRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customs_info: Option<CustomsInfo>,
    pub is_return: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub id: String,
    pub carrier: String,
    pub service: String,
    pub rate: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub shipment_id: Option<String>,
}

/// Label URLs as reported by the provider. Only the format most recently
/// requested is guaranteed to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostageLabel {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label_url: Option<String>,
    #[serde(default)]
    pub label_pdf_url: Option<String>,
    #[serde(default)]
    pub label_epl2_url: Option<String>,
    #[serde(default)]
    pub label_zpl_url: Option<String>,
}

impl PostageLabel {
    pub fn url_for(&self, format: LabelFormat) -> Option<&str> {
        match format {
            LabelFormat::Png => self.label_url.as_deref(),
            LabelFormat::Pdf => self.label_pdf_url.as_deref(),
            LabelFormat::Epl2 => self.label_epl2_url.as_deref(),
            LabelFormat::Zpl => self.label_zpl_url.as_deref(),
        }
    }
}

/// Live shipment as returned by retrieve, buy, label and refund calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderShipment {
    pub id: String,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub rates: Vec<Rate>,
    #[serde(default)]
    pub selected_rate: Option<Rate>,
    #[serde(default)]
    pub postage_label: Option<PostageLabel>,
    #[serde(default)]
    pub refund_status: Option<String>,
    #[serde(default)]
    pub is_return: Option<bool>,
}

impl ProviderShipment {
    pub fn lowest_rate(&self, filter: &RateFilter) -> Option<&Rate> {
        lowest_rate(&self.rates, filter)
    }
}
