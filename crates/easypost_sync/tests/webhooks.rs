mod common;

use chrono::{TimeZone, Utc};
use common::{tracker_event, Harness};
use easypost_contract::TrackingStatus;
use easypost_sync::{SyncError, WebhookOutcome};
use serde_json::json;

#[tokio::test]
async fn tracker_update_sets_status_and_records_history() {
    let harness = Harness::new().await;
    let shipment = harness.synced_shipment().await;
    let provider_id = shipment.provider_id.clone().unwrap();
    let payload = tracker_event(
        &provider_id,
        "pre_transit",
        json!([{
            "datetime": "2013-05-31T00:00:00Z",
            "message": "Pre-Shipment information received",
            "status": "pre_transit"
        }]),
    );

    let outcome = harness.sync.process_webhook_event(&payload).await.unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::TrackingUpdated {
            shipment_id: shipment.id.clone(),
            status: TrackingStatus::PreTransit,
            history_added: 1,
        }
    );
    let stored = harness.storage().get_shipment(&shipment.id).await.unwrap().unwrap();
    assert_eq!(stored.tracking_status, TrackingStatus::PreTransit);
    assert_eq!(stored.tracking_code.as_deref(), Some("9400110898825022579493"));

    let history = harness
        .storage()
        .list_tracking_history(&shipment.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "pre_transit");
    assert_eq!(history[0].message, "Pre-Shipment information received");
    assert_eq!(
        history[0].update_time,
        Utc.with_ymd_and_hms(2013, 5, 31, 0, 0, 0).unwrap()
    );

    let latest = harness.sync.latest_tracking_update(&stored).await.unwrap();
    assert_eq!(latest.map(|entry| entry.id), Some(history[0].id));
}

#[tokio::test]
async fn duplicate_delivery_adds_no_history() {
    let harness = Harness::new().await;
    let shipment = harness.synced_shipment().await;
    let payload = tracker_event(
        shipment.provider_id.as_deref().unwrap(),
        "pre_transit",
        json!([{
            "datetime": "2013-05-31T00:00:00Z",
            "message": "Pre-Shipment information received",
            "status": "pre_transit"
        }]),
    );

    harness.sync.process_webhook_event(&payload).await.unwrap();
    let second = harness.sync.process_webhook_event(&payload).await.unwrap();

    assert!(matches!(
        second,
        WebhookOutcome::TrackingUpdated { history_added: 0, .. }
    ));
    let history = harness
        .storage()
        .list_tracking_history(&shipment.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn later_delivery_appends_new_details_only() {
    let harness = Harness::new().await;
    let shipment = harness.synced_shipment().await;
    let provider_id = shipment.provider_id.clone().unwrap();
    let received = json!({
        "datetime": "2013-05-31T00:00:00Z",
        "message": "Pre-Shipment information received",
        "status": "pre_transit"
    });
    let departed = json!({
        "datetime": "2013-06-01T08:12:00",
        "message": "Departed USPS Facility",
        "status": "in_transit"
    });

    harness
        .sync
        .process_webhook_event(&tracker_event(&provider_id, "pre_transit", json!([received.clone()])))
        .await
        .unwrap();
    harness
        .sync
        .process_webhook_event(&tracker_event(&provider_id, "in_transit", json!([received, departed])))
        .await
        .unwrap();

    let stored = harness.storage().get_shipment(&shipment.id).await.unwrap().unwrap();
    assert_eq!(stored.tracking_status, TrackingStatus::InTransit);
    let history = harness
        .storage()
        .list_tracking_history(&shipment.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[1].update_time,
        Utc.with_ymd_and_hms(2013, 6, 1, 8, 12, 0).unwrap()
    );
}

#[tokio::test]
async fn other_events_are_ignored() {
    let harness = Harness::new().await;
    let shipment = harness.synced_shipment().await;
    let payload = serde_json::to_vec(&json!({
        "id": "evt_2",
        "description": "batch.created",
        "result": {"id": "batch_1"}
    }))
    .unwrap();

    let outcome = harness.sync.process_webhook_event(&payload).await.unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Ignored {
            description: "batch.created".to_string()
        }
    );
    let stored = harness.storage().get_shipment(&shipment.id).await.unwrap().unwrap();
    assert_eq!(stored, shipment);
    assert!(harness
        .storage()
        .list_tracking_history(&shipment.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_shipment_fails_the_event() {
    let harness = Harness::new().await;
    let payload = tracker_event("shp_unknown", "delivered", json!([]));

    let err = harness.sync.process_webhook_event(&payload).await.unwrap_err();

    assert!(matches!(err, SyncError::ShipmentNotFound(ref id) if id == "shp_unknown"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn garbage_payload_is_malformed() {
    let harness = Harness::new().await;

    let err = harness
        .sync
        .process_webhook_event(b"not json at all")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MalformedEvent(_)));
}

#[tokio::test]
async fn bad_timestamp_rejects_event_without_writes() {
    let harness = Harness::new().await;
    let shipment = harness.synced_shipment().await;
    let payload = tracker_event(
        shipment.provider_id.as_deref().unwrap(),
        "in_transit",
        json!([{"datetime": "yesterday", "message": "Moving", "status": "in_transit"}]),
    );

    let err = harness.sync.process_webhook_event(&payload).await.unwrap_err();

    assert!(matches!(err, SyncError::InvalidTimestamp { .. }));
    let stored = harness.storage().get_shipment(&shipment.id).await.unwrap().unwrap();
    assert_eq!(stored.tracking_status, TrackingStatus::Unknown);
}
