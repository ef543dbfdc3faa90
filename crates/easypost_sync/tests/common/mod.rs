#![allow(dead_code)]

use std::sync::Arc;

use easypost_contract::{
    Address, NewAddress, NewParcel, NewShipment, Parcel, ParcelShape, PredefinedPackage, Shipment,
};
use easypost_provider::InMemoryShippingProvider;
use easypost_storage::{EasypostStorage, StorageConfig};
use easypost_sync::{ShipmentSync, SyncConfig};
use serde_json::{json, Value};
use tempfile::TempDir;

pub struct Harness {
    pub sync: ShipmentSync,
    pub provider: Arc<InMemoryShippingProvider>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let storage = EasypostStorage::connect(&StorageConfig::new(path.display().to_string()))
            .await
            .unwrap();
        let provider = Arc::new(InMemoryShippingProvider::new());
        let sync = ShipmentSync::new(storage, provider.clone(), config);
        Self {
            sync,
            provider,
            _dir: dir,
        }
    }

    pub fn storage(&self) -> &EasypostStorage {
        self.sync.storage()
    }

    pub async fn addresses(&self) -> (Address, Address) {
        let to = self
            .storage()
            .insert_address(NewAddress {
                name: "Dr. Steve Brule".to_string(),
                street1: "179 N Harbor Dr".to_string(),
                city: "Redondo Beach".to_string(),
                state: "CA".to_string(),
                zip_code: "90277".to_string(),
                phone: "310-808-5243".to_string(),
                ..NewAddress::default()
            })
            .await
            .unwrap();
        let from = self
            .storage()
            .insert_address(NewAddress {
                name: "EasyPost".to_string(),
                street1: "417 Montgomery Street".to_string(),
                street2: "5th Floor".to_string(),
                city: "San Francisco".to_string(),
                state: "CA".to_string(),
                zip_code: "94104".to_string(),
                phone: "415-528-7555".to_string(),
                ..NewAddress::default()
            })
            .await
            .unwrap();
        (to, from)
    }

    pub async fn shipment(&self) -> Shipment {
        let (to, from) = self.addresses().await;
        self.storage()
            .insert_shipment(NewShipment {
                to_address_id: to.id,
                from_address_id: from.id,
                is_return: false,
            })
            .await
            .unwrap()
    }

    pub async fn flat_rate_parcel(&self) -> Parcel {
        self.sync
            .create_parcel(NewParcel {
                shipment_id: None,
                shape: ParcelShape::Predefined(PredefinedPackage::FlatRateEnvelope),
                weight: 5.0,
            })
            .await
            .unwrap()
    }

    /// A shipment already created at the provider.
    pub async fn synced_shipment(&self) -> Shipment {
        let mut shipment = self.shipment().await;
        let mut parcel = self.flat_rate_parcel().await;
        self.sync.sync_parcel(&mut parcel).await.unwrap();
        self.sync
            .sync_shipment(&mut shipment, &parcel, None)
            .await
            .unwrap();
        shipment
    }
}

pub fn tracker_event(provider_shipment_id: &str, status: &str, details: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "object": "Event",
        "mode": "test",
        "description": "tracker.updated",
        "result": {
            "id": "trk_1",
            "object": "Tracker",
            "tracking_code": "9400110898825022579493",
            "status": status,
            "shipment_id": provider_shipment_id,
            "tracking_details": details,
        }
    }))
    .unwrap()
}
