use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Carriers a label can be purchased from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Carrier {
    #[default]
    #[serde(rename = "USPS")]
    Usps,
    #[serde(rename = "UPS")]
    Ups,
    #[serde(rename = "FedEx")]
    FedEx,
}

impl Carrier {
    pub const ALL: [Carrier; 3] = [Carrier::Usps, Carrier::Ups, Carrier::FedEx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Usps => "USPS",
            Carrier::Ups => "UPS",
            Carrier::FedEx => "FedEx",
        }
    }
}

impl FromStr for Carrier {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Carrier::ALL
            .into_iter()
            .find(|carrier| carrier.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| ParseEnumError::new("carrier", raw))
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracker states reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    Unknown,
    PreTransit,
    InTransit,
    OutForDelivery,
    Delivered,
    AvailableForPickup,
    ReturnToSender,
    Failure,
    Cancelled,
    Error,
}

impl TrackingStatus {
    pub const ALL: [TrackingStatus; 10] = [
        TrackingStatus::Unknown,
        TrackingStatus::PreTransit,
        TrackingStatus::InTransit,
        TrackingStatus::OutForDelivery,
        TrackingStatus::Delivered,
        TrackingStatus::AvailableForPickup,
        TrackingStatus::ReturnToSender,
        TrackingStatus::Failure,
        TrackingStatus::Cancelled,
        TrackingStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Unknown => "unknown",
            TrackingStatus::PreTransit => "pre_transit",
            TrackingStatus::InTransit => "in_transit",
            TrackingStatus::OutForDelivery => "out_for_delivery",
            TrackingStatus::Delivered => "delivered",
            TrackingStatus::AvailableForPickup => "available_for_pickup",
            TrackingStatus::ReturnToSender => "return_to_sender",
            TrackingStatus::Failure => "failure",
            TrackingStatus::Cancelled => "cancelled",
            TrackingStatus::Error => "error",
        }
    }
}

impl FromStr for TrackingStatus {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TrackingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| ParseEnumError::new("tracking status", raw))
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refund progress for a purchased label.
///
/// `None` is persisted as the empty string. The only legal path is
/// `None -> Submitted -> {Rejected, Refunded}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    #[serde(rename = "")]
    None,
    Submitted,
    Rejected,
    Refunded,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::None => "",
            RefundStatus::Submitted => "submitted",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Refunded => "refunded",
        }
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, RefundStatus::None)
    }

    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        matches!(
            (self, next),
            (RefundStatus::None, RefundStatus::Submitted)
                | (RefundStatus::Submitted, RefundStatus::Rejected)
                | (RefundStatus::Submitted, RefundStatus::Refunded)
        )
    }
}

impl FromStr for RefundStatus {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "" => Ok(RefundStatus::None),
            "submitted" => Ok(RefundStatus::Submitted),
            "rejected" => Ok(RefundStatus::Rejected),
            "refunded" => Ok(RefundStatus::Refunded),
            other => Err(ParseEnumError::new("refund status", other)),
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundStatus::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Rendering formats a purchased label can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    Png,
    Pdf,
    Epl2,
    Zpl,
}

impl LabelFormat {
    /// Order in which the backfill job requests formats.
    pub const BACKFILL_ORDER: [LabelFormat; 4] = [
        LabelFormat::Zpl,
        LabelFormat::Pdf,
        LabelFormat::Epl2,
        LabelFormat::Png,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelFormat::Png => "png",
            LabelFormat::Pdf => "pdf",
            LabelFormat::Epl2 => "epl2",
            LabelFormat::Zpl => "zpl",
        }
    }

    /// Value of the provider's `file_format` query parameter.
    pub fn file_format(&self) -> &'static str {
        match self {
            LabelFormat::Png => "PNG",
            LabelFormat::Pdf => "PDF",
            LabelFormat::Epl2 => "EPL2",
            LabelFormat::Zpl => "ZPL",
        }
    }
}

impl FromStr for LabelFormat {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(LabelFormat::Png),
            "pdf" => Ok(LabelFormat::Pdf),
            "epl2" => Ok(LabelFormat::Epl2),
            "zpl" => Ok(LabelFormat::Zpl),
            _ => Err(ParseEnumError::new("label format", raw)),
        }
    }
}

impl fmt::Display for LabelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard Exemption/Exclusion Legend codes for customs declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EelCode {
    #[serde(rename = "NOEEL 30.36")]
    UsToCanada,
    #[serde(rename = "NOEEL 30.37(a)")]
    ValueUnder2500Usd,
}
