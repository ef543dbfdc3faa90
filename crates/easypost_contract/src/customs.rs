use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::status::EelCode;

/// Customs declaration attached to international shipments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomsInfo {
    pub contents_type: ContentsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eel_pfc: Option<EelCode>,
    pub customs_certify: bool,
    pub customs_signer: String,
    #[serde(default)]
    pub non_delivery_option: NonDeliveryOption,
    #[serde(default)]
    pub restriction_type: RestrictionType,
    pub customs_items: Vec<CustomsItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomsItem {
    pub description: String,
    pub quantity: u32,
    /// Total declared value of the line, in USD.
    pub value: Decimal,
    /// Ounces.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_tariff_number: Option<String>,
    pub origin_country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentsType {
    Documents,
    Gift,
    Merchandise,
    ReturnedGoods,
    Sample,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonDeliveryOption {
    #[default]
    Return,
    Abandon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionType {
    #[default]
    None,
    Other,
    Quarantine,
    SanitaryPhytosanitaryInspection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eel_code_uses_legend_text() {
        let info = CustomsInfo {
            contents_type: ContentsType::Merchandise,
            contents_explanation: None,
            eel_pfc: Some(EelCode::UsToCanada),
            customs_certify: true,
            customs_signer: "Company Deluxe".to_string(),
            non_delivery_option: NonDeliveryOption::Return,
            restriction_type: RestrictionType::None,
            customs_items: vec![CustomsItem {
                description: "T-shirt".to_string(),
                quantity: 2,
                value: Decimal::new(2500, 2),
                weight: 8.0,
                hs_tariff_number: Some("610910".to_string()),
                origin_country: "US".to_string(),
            }],
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["eel_pfc"], "NOEEL 30.36");
        assert_eq!(json["contents_type"], "merchandise");
        assert!(json.get("contents_explanation").is_none());
    }
}
