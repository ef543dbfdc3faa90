use serde::{Deserialize, Serialize};

use crate::status::Carrier;
use crate::wire::Rate;

/// Carrier/service restriction applied when picking a rate.
///
/// A service only means something together with its carrier, so services are
/// dropped when no carrier is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateFilter {
    carriers: Vec<Carrier>,
    services: Vec<String>,
}

impl RateFilter {
    pub fn new(carriers: Vec<Carrier>, services: Vec<String>) -> Self {
        let services = if carriers.is_empty() {
            Vec::new()
        } else {
            services
        };
        Self { carriers, services }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, rate: &Rate) -> bool {
        let carrier_ok = self.carriers.is_empty()
            || self
                .carriers
                .iter()
                .any(|carrier| carrier.as_str().eq_ignore_ascii_case(rate.carrier.trim()));
        let service_ok = self.services.is_empty()
            || self
                .services
                .iter()
                .any(|service| service.trim().eq_ignore_ascii_case(rate.service.trim()));
        carrier_ok && service_ok
    }
}

/// Cheapest rate passing `filter`; ties keep the provider's ordering.
pub fn lowest_rate<'a>(rates: &'a [Rate], filter: &RateFilter) -> Option<&'a Rate> {
    rates
        .iter()
        .filter(|rate| filter.matches(rate))
        .min_by(|left, right| left.rate.cmp(&right.rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn rate(id: &str, carrier: &str, service: &str, cents: i64) -> Rate {
        Rate {
            id: id.to_string(),
            carrier: carrier.to_string(),
            service: service.to_string(),
            rate: Decimal::new(cents, 2),
            currency: Some("USD".to_string()),
            shipment_id: None,
        }
    }

    fn rates() -> Vec<Rate> {
        vec![
            rate("r_express", "USPS", "Express", 2635),
            rate("r_priority", "USPS", "Priority", 758),
            rate("r_ground", "UPS", "Ground", 912),
            rate("r_fedex", "FedEx", "FEDEX_GROUND", 705),
        ]
    }

    #[test]
    fn no_filter_picks_global_minimum() {
        let rates = rates();
        assert_eq!(lowest_rate(&rates, &RateFilter::any()).unwrap().id, "r_fedex");
    }

    #[test]
    fn carrier_filter_is_case_insensitive() {
        let rates = rates();
        let filter = RateFilter::new(vec![Carrier::Ups], Vec::new());
        assert_eq!(lowest_rate(&rates, &filter).unwrap().id, "r_ground");
    }

    #[test]
    fn service_without_carrier_is_discarded() {
        let filter = RateFilter::new(Vec::new(), vec!["Express".to_string()]);
        assert_eq!(filter, RateFilter::any());

        let rates = rates();
        assert_eq!(
            lowest_rate(&rates, &filter),
            lowest_rate(&rates, &RateFilter::any())
        );
    }

    #[test]
    fn service_with_carrier_narrows_selection() {
        let rates = rates();
        let filter = RateFilter::new(vec![Carrier::Usps], vec!["express".to_string()]);
        assert_eq!(lowest_rate(&rates, &filter).unwrap().id, "r_express");
    }

    #[test]
    fn ties_keep_provider_order() {
        let rates = vec![
            rate("first", "USPS", "Priority", 500),
            rate("second", "UPS", "Ground", 500),
        ];
        assert_eq!(lowest_rate(&rates, &RateFilter::any()).unwrap().id, "first");
    }

    #[test]
    fn unmatched_filter_yields_nothing() {
        let rates = vec![rate("only", "USPS", "Priority", 500)];
        let filter = RateFilter::new(vec![Carrier::FedEx], Vec::new());
        assert!(lowest_rate(&rates, &filter).is_none());
    }
}
