use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::status::{Carrier, ParseEnumError};

macro_rules! predefined_packages {
    ($($variant:ident => ($tag:literal, $carrier:ident, $label:literal)),+ $(,)?) => {
        /// Carrier-defined package types that replace explicit dimensions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum PredefinedPackage {
            $(
                #[serde(rename = $tag)]
                $variant,
            )+
        }

        impl PredefinedPackage {
            pub const ALL: &'static [PredefinedPackage] = &[$(PredefinedPackage::$variant),+];

            /// Tag sent to the provider.
            pub fn tag(&self) -> &'static str {
                match self {
                    $(PredefinedPackage::$variant => $tag,)+
                }
            }

            pub fn carrier(&self) -> Carrier {
                match self {
                    $(PredefinedPackage::$variant => Carrier::$carrier,)+
                }
            }

            /// Human readable name, e.g. for admin listings.
            pub fn label(&self) -> &'static str {
                match self {
                    $(PredefinedPackage::$variant => $label,)+
                }
            }
        }
    };
}

predefined_packages! {
    Card => ("Card", Usps, "USPS Card"),
    Letter => ("Letter", Usps, "USPS Letter"),
    Flat => ("Flat", Usps, "USPS Flat"),
    Parcel => ("Parcel", Usps, "USPS Parcel"),
    LargeParcel => ("LargeParcel", Usps, "USPS Large Parcel"),
    IrregularParcel => ("IrregularParcel", Usps, "USPS Irregular Parcel"),
    FlatRateEnvelope => ("FlatRateEnvelope", Usps, "USPS Flat Rate Envelope"),
    FlatRateLegalEnvelope => ("FlatRateLegalEnvelope", Usps, "USPS Flat Rate Legal Envelope"),
    FlatRatePaddedEnvelope => ("FlatRatePaddedEnvelope", Usps, "USPS Flat Rate Padded Envelope"),
    FlatRateGiftCardEnvelope => ("FlatRateGiftCardEnvelope", Usps, "USPS Flat Rate Gift Card Envelope"),
    FlatRateWindowEnvelope => ("FlatRateWindowEnvelope", Usps, "USPS Flat Rate Window Envelope"),
    FlatRateCardboardEnvelope => ("FlatRateCardboardEnvelope", Usps, "USPS Flat Rate Cardboard Envelope"),
    SmallFlatRateEnvelope => ("SmallFlatRateEnvelope", Usps, "USPS Small Flat Rate Envelope"),
    SmallFlatRateBox => ("SmallFlatRateBox", Usps, "USPS Small Flat Rate Box"),
    MediumFlatRateBox => ("MediumFlatRateBox", Usps, "USPS Medium Flat Rate Box"),
    LargeFlatRateBox => ("LargeFlatRateBox", Usps, "USPS Large Flat Rate Box"),
    RegionalRateBoxA => ("RegionalRateBoxA", Usps, "USPS Regional Rate Box A"),
    RegionalRateBoxB => ("RegionalRateBoxB", Usps, "USPS Regional Rate Box B"),
    RegionalRateBoxC => ("RegionalRateBoxC", Usps, "USPS Regional Rate Box C"),
    LargeFlatRateBoardGameBox => ("LargeFlatRateBoardGameBox", Usps, "USPS Large Flat Rate Board Game Box"),
    UpsLetter => ("UPSLetter", Ups, "UPS Letter"),
    UpsExpressBox => ("UPSExpressBox", Ups, "UPS Express Box"),
    Ups25kgBox => ("UPS25kgBox", Ups, "UPS 25kg Box"),
    Ups10kgBox => ("UPS10kgBox", Ups, "UPS 10kg Box"),
    Tube => ("Tube", Ups, "UPS Tube"),
    Pak => ("Pak", Ups, "UPS Pak"),
    Pallet => ("Pallet", Ups, "UPS Pallet"),
    SmallExpressBox => ("SmallExpressBox", Ups, "UPS Small Express Box"),
    MediumExpressBox => ("MediumExpressBox", Ups, "UPS Medium Express Box"),
    LargeExpressBox => ("LargeExpressBox", Ups, "UPS Large Express Box"),
    FedExEnvelope => ("FedExEnvelope", FedEx, "FedEx Envelope"),
    FedExBox => ("FedExBox", FedEx, "FedEx Box"),
    FedExPak => ("FedExPak", FedEx, "FedEx Pak"),
    FedExTube => ("FedExTube", FedEx, "FedEx Tube"),
    FedEx10kgBox => ("FedEx10kgBox", FedEx, "FedEx 10kg Box"),
    FedEx25kgBox => ("FedEx25kgBox", FedEx, "FedEx 25kg Box"),
}

impl FromStr for PredefinedPackage {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        PredefinedPackage::ALL
            .iter()
            .copied()
            .find(|package| package.tag() == raw.trim())
            .ok_or_else(|| ParseEnumError {
                kind: "predefined package",
                value: raw.to_string(),
            })
    }
}

impl fmt::Display for PredefinedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_tags() {
        assert_eq!(
            "FlatRateEnvelope".parse::<PredefinedPackage>().unwrap(),
            PredefinedPackage::FlatRateEnvelope
        );
        assert!("flatrateenvelope".parse::<PredefinedPackage>().is_err());
    }

    #[test]
    fn packages_know_their_carrier() {
        assert_eq!(PredefinedPackage::FlatRateEnvelope.carrier(), Carrier::Usps);
        assert_eq!(PredefinedPackage::UpsExpressBox.carrier(), Carrier::Ups);
        assert_eq!(PredefinedPackage::FedExPak.carrier(), Carrier::FedEx);
    }

    #[test]
    fn serializes_as_provider_tag() {
        assert_eq!(
            serde_json::to_string(&PredefinedPackage::Ups25kgBox).unwrap(),
            "\"UPS25kgBox\""
        );
    }
}
