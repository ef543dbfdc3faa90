use std::sync::Arc;

use chrono::Utc;
use easypost_contract::{
    Address, Carrier, CustomsInfo, Label, LabelFormat, NewLabel, NewParcel, Parcel, ParcelRef,
    ParcelShape, PredefinedPackage, ProviderParcel, ProviderShipment, Rate, RateFilter,
    RefundStatus, Shipment, ShipmentRequest, TrackingHistoryEntry,
};
use easypost_provider::ShippingProvider;
use easypost_storage::EasypostStorage;
use tracing::{debug, info, warn};

use crate::config::{DuplicateRefundPolicy, SyncConfig};
use crate::error::SyncError;

/// Options for [`ShipmentSync::buy_label`].
#[derive(Debug, Clone)]
pub struct BuyLabelOptions {
    /// Live provider shipment to pick a rate from instead of fetching it.
    pub shipment: Option<ProviderShipment>,
    /// Buy at this rate and skip rate selection.
    pub rate: Option<Rate>,
    pub carriers: Vec<Carrier>,
    /// Ignored unless `carriers` is non-empty.
    pub services: Vec<String>,
    /// Persist the purchased rate, service and carrier on the shipment.
    pub commit: bool,
}

impl Default for BuyLabelOptions {
    fn default() -> Self {
        Self {
            shipment: None,
            rate: None,
            carriers: Vec::new(),
            services: Vec::new(),
            commit: true,
        }
    }
}

/// Keeps local shipment records in step with the provider.
#[derive(Clone)]
pub struct ShipmentSync {
    storage: EasypostStorage,
    provider: Arc<dyn ShippingProvider>,
    config: SyncConfig,
}

impl ShipmentSync {
    pub fn new(
        storage: EasypostStorage,
        provider: Arc<dyn ShippingProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            provider,
            config,
        }
    }

    pub fn storage(&self) -> &EasypostStorage {
        &self.storage
    }

    /// Replaces the address with the provider's normalized form and marks it
    /// verified. Nothing changes when the provider rejects it.
    pub async fn verify_address(&self, address: &mut Address) -> Result<(), SyncError> {
        let verified = self
            .provider
            .create_and_verify_address(&address.fields())
            .await?;

        let mut updated = address.clone();
        updated.apply_verification(verified);
        self.storage.save_address(&updated).await?;
        *address = updated;

        info!(address_id = %address.id, "address verified");
        Ok(())
    }

    pub async fn create_parcel(&self, parcel: NewParcel) -> Result<Parcel, SyncError> {
        parcel.validate()?;
        Ok(self.storage.insert_parcel(parcel, None).await?)
    }

    pub async fn sync_parcel(&self, parcel: &mut Parcel) -> Result<ProviderParcel, SyncError> {
        let created = self.provider.create_parcel(&parcel.request()).await?;
        self.storage
            .set_parcel_provider_id(&parcel.id, &created.id)
            .await?;
        parcel.provider_id = Some(created.id.clone());

        info!(parcel_id = %parcel.id, provider_id = %created.id, "parcel synced");
        Ok(created)
    }

    /// Stores a local copy of a parcel that already exists at the provider.
    pub async fn parcel_from_provider(
        &self,
        remote: &ProviderParcel,
        shipment_id: Option<&str>,
    ) -> Result<Parcel, SyncError> {
        let shape = match remote
            .predefined_package
            .as_deref()
            .filter(|tag| !tag.trim().is_empty())
        {
            Some(tag) => ParcelShape::Predefined(
                tag.parse::<PredefinedPackage>()
                    .map_err(|_| SyncError::UnknownPackage(tag.to_string()))?,
            ),
            None => ParcelShape::Dimensions {
                length: remote.length.unwrap_or_default(),
                width: remote.width.unwrap_or_default(),
                height: remote.height.unwrap_or_default(),
            },
        };
        let parcel = NewParcel {
            shipment_id: shipment_id.map(str::to_string),
            shape,
            weight: remote.weight,
        };
        parcel.validate()?;
        Ok(self.storage.insert_parcel(parcel, Some(&remote.id)).await?)
    }

    /// Creates the provider-side shipment. Each call creates a new remote
    /// shipment and the latest id replaces any earlier one.
    pub async fn sync_shipment(
        &self,
        shipment: &mut Shipment,
        parcel: &Parcel,
        customs_info: Option<CustomsInfo>,
    ) -> Result<ProviderShipment, SyncError> {
        let parcel_provider_id = parcel
            .provider_id
            .clone()
            .ok_or_else(|| SyncError::ParcelNotSynced(parcel.id.clone()))?;
        let to_address = self.address(&shipment.to_address_id).await?;
        let from_address = self.address(&shipment.from_address_id).await?;

        let request = ShipmentRequest {
            to_address: to_address.fields(),
            from_address: from_address.fields(),
            parcel: ParcelRef {
                id: parcel_provider_id,
            },
            customs_info,
            is_return: shipment.is_return,
        };
        let created = self.provider.create_shipment(&request).await?;

        if let Some(previous) = shipment.provider_id.as_deref() {
            warn!(
                shipment_id = %shipment.id,
                previous = %previous,
                replacement = %created.id,
                "shipment synced again; provider id overwritten"
            );
        }
        self.storage
            .set_shipment_provider_id(&shipment.id, &created.id)
            .await?;
        shipment.provider_id = Some(created.id.clone());

        info!(shipment_id = %shipment.id, provider_id = %created.id, "shipment synced");
        Ok(created)
    }

    pub async fn live_shipment(&self, shipment: &Shipment) -> Result<ProviderShipment, SyncError> {
        let provider_id = synced_id(shipment)?;
        Ok(self.provider.retrieve_shipment(provider_id).await?)
    }

    /// Refreshes the tracking code from the provider. Tracking status is only
    /// changed by webhooks.
    pub async fn update_from_provider(
        &self,
        shipment: &mut Shipment,
    ) -> Result<ProviderShipment, SyncError> {
        let live = self.live_shipment(shipment).await?;
        self.storage
            .update_tracking_code(&shipment.id, live.tracking_code.as_deref())
            .await?;
        shipment.tracking_code = live.tracking_code.clone();
        Ok(live)
    }

    pub async fn get_rates(&self, shipment: &Shipment) -> Result<Vec<Rate>, SyncError> {
        let provider_id = synced_id(shipment)?;
        Ok(self.provider.list_rates(provider_id).await?)
    }

    pub async fn get_rate(
        &self,
        shipment: &Shipment,
        rate_id: &str,
    ) -> Result<Option<Rate>, SyncError> {
        let rates = self.get_rates(shipment).await?;
        Ok(rates.into_iter().find(|rate| rate.id == rate_id))
    }

    /// Buys postage for the shipment, or returns the label it already has.
    pub async fn buy_label(
        &self,
        shipment: &mut Shipment,
        options: BuyLabelOptions,
    ) -> Result<Label, SyncError> {
        if let Some(existing) = self.storage.get_label_for_shipment(&shipment.id).await? {
            debug!(shipment_id = %shipment.id, label_id = %existing.id, "label already purchased");
            return Ok(existing);
        }
        let provider_id = synced_id(shipment)?.to_string();

        let rate = match options.rate {
            Some(rate) => rate,
            None => {
                let filter = RateFilter::new(options.carriers, options.services);
                let live = match options.shipment {
                    Some(live) => live,
                    None => self.provider.retrieve_shipment(&provider_id).await?,
                };
                live.lowest_rate(&filter)
                    .cloned()
                    .ok_or_else(|| SyncError::NoMatchingRate {
                        shipment_id: shipment.id.clone(),
                    })?
            }
        };
        let carrier: Carrier = rate
            .carrier
            .parse()
            .map_err(|_| SyncError::UnsupportedCarrier(rate.carrier.clone()))?;

        let purchased = self.provider.buy_shipment(&provider_id, &rate).await?;
        let new_label = NewLabel::from_purchase(
            &shipment.id,
            &purchased.id,
            purchased.postage_label.as_ref(),
            Utc::now(),
        );
        let (label, inserted) = self.storage.insert_label_if_absent(new_label).await?;
        if !inserted {
            warn!(
                shipment_id = %shipment.id,
                label_id = %label.id,
                rate_id = %rate.id,
                "concurrent purchase already stored a label; keeping it"
            );
            // The stored shipment describes the winning purchase.
            if let Some(stored) = self.storage.get_shipment(&shipment.id).await? {
                *shipment = stored;
            }
            return Ok(label);
        }

        shipment.rate = Some(rate.rate);
        shipment.service = Some(rate.service.clone());
        shipment.carrier = carrier;
        if options.commit {
            self.storage.update_purchase(shipment).await?;
        }

        info!(
            shipment_id = %shipment.id,
            label_id = %label.id,
            carrier = %carrier,
            service = %rate.service,
            rate = %rate.rate,
            "label purchased"
        );
        Ok(label)
    }

    /// Asks the provider to render `format` and copies every URL in the
    /// response onto the label. Returns the formats whose URL was written.
    pub async fn request_label_file(
        &self,
        label: &mut Label,
        format: LabelFormat,
        commit: bool,
    ) -> Result<Vec<LabelFormat>, SyncError> {
        let provider_id = label
            .provider_id
            .clone()
            .ok_or_else(|| SyncError::ShipmentNotSynced(label.shipment_id.clone()))?;
        let response = self.provider.request_label(&provider_id, format).await?;

        let touched = match response.postage_label.as_ref() {
            Some(postage) => label.record_postage(postage, Utc::now()),
            None => Vec::new(),
        };
        if commit {
            self.storage.save_label_urls(label).await?;
        }
        Ok(touched)
    }

    /// Requests a refund. Only a shipment with no refund on record reaches
    /// the provider.
    pub async fn refund(&self, shipment: &mut Shipment) -> Result<(), SyncError> {
        if shipment.refund_status.is_requested() {
            return match self.config.on_duplicate_refund {
                DuplicateRefundPolicy::Reject => Err(SyncError::RefundAlreadyRequested {
                    shipment_id: shipment.id.clone(),
                    status: shipment.refund_status,
                }),
                DuplicateRefundPolicy::Ignore => {
                    debug!(shipment_id = %shipment.id, status = %shipment.refund_status, "refund already requested");
                    Ok(())
                }
            };
        }
        let provider_id = synced_id(shipment)?;
        self.provider.refund_shipment(provider_id).await?;

        self.storage
            .update_refund_status(&shipment.id, RefundStatus::Submitted)
            .await?;
        shipment.refund_status = RefundStatus::Submitted;

        info!(shipment_id = %shipment.id, "refund submitted");
        Ok(())
    }

    pub async fn latest_tracking_update(
        &self,
        shipment: &Shipment,
    ) -> Result<Option<TrackingHistoryEntry>, SyncError> {
        Ok(self.storage.latest_tracking_update(&shipment.id).await?)
    }

    async fn address(&self, address_id: &str) -> Result<Address, SyncError> {
        self.storage
            .get_address(address_id)
            .await?
            .ok_or_else(|| SyncError::AddressNotFound(address_id.to_string()))
    }
}

fn synced_id(shipment: &Shipment) -> Result<&str, SyncError> {
    shipment
        .provider_id
        .as_deref()
        .ok_or_else(|| SyncError::ShipmentNotSynced(shipment.id.clone()))
}
