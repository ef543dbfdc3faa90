//! Bodies of the background jobs: webhook processing, label format backfill
//! and refund status polling.

use easypost_contract::{Event, EventKind, LabelFormat, RefundStatus, Shipment, TrackingStatus};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::service::ShipmentSync;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Ignored {
        description: String,
    },
    TrackingUpdated {
        shipment_id: String,
        status: TrackingStatus,
        history_added: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFailure {
    pub format: LabelFormat,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub label_id: String,
    pub populated: Vec<LabelFormat>,
    pub failed: Vec<FormatFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPollReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ShipmentSync {
    /// Applies a provider webhook. Only `tracker.updated` events change
    /// anything.
    pub async fn process_webhook_event(&self, payload: &[u8]) -> Result<WebhookOutcome, SyncError> {
        let event = Event::receive(payload).map_err(SyncError::MalformedEvent)?;
        let tracker = match event.kind().map_err(SyncError::MalformedEvent)? {
            EventKind::TrackerUpdated(tracker) => tracker,
            EventKind::Other(description) => {
                info!(event_id = ?event.id, description = %description, "ignoring webhook event");
                return Ok(WebhookOutcome::Ignored { description });
            }
        };

        let provider_shipment_id = tracker
            .shipment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::TrackerWithoutShipment(tracker.id.clone()))?;
        let shipment = self
            .storage()
            .find_shipment_by_provider_id(provider_shipment_id)
            .await?
            .ok_or_else(|| SyncError::ShipmentNotFound(provider_shipment_id.to_string()))?;

        // Reject the whole event before writing if any detail is unreadable.
        let details = tracker
            .tracking_details
            .iter()
            .map(|detail| {
                detail
                    .occurred_at()
                    .map(|at| (detail, at))
                    .map_err(|source| SyncError::InvalidTimestamp {
                        shipment_id: shipment.id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.storage()
            .update_tracking(&shipment.id, tracker.tracking_code.as_deref(), tracker.status)
            .await?;

        let mut history_added = 0;
        for (detail, at) in details {
            let inserted = self
                .storage()
                .insert_tracking_history(
                    &shipment.id,
                    &detail.status,
                    detail.message.as_deref().unwrap_or_default(),
                    at,
                )
                .await?;
            if inserted {
                history_added += 1;
            }
        }

        info!(
            shipment_id = %shipment.id,
            status = %tracker.status,
            history_added,
            "tracking updated from webhook"
        );
        Ok(WebhookOutcome::TrackingUpdated {
            shipment_id: shipment.id,
            status: tracker.status,
            history_added,
        })
    }

    /// Requests every extra label format in turn. A failing format is
    /// recorded and the rest still run; if any failure was transient the
    /// whole pass reports that error once it finishes.
    pub async fn get_additional_label_formats(
        &self,
        label_id: &str,
    ) -> Result<BackfillReport, SyncError> {
        let mut label = self
            .storage()
            .get_label(label_id)
            .await?
            .ok_or_else(|| SyncError::LabelNotFound(label_id.to_string()))?;

        let mut report = BackfillReport {
            label_id: label.id.clone(),
            populated: Vec::new(),
            failed: Vec::new(),
        };
        let mut retryable = None;
        for format in LabelFormat::BACKFILL_ORDER {
            match self.request_label_file(&mut label, format, true).await {
                Ok(touched) if touched.contains(&format) => report.populated.push(format),
                Ok(_) => {
                    warn!(label_id = %label.id, format = %format, "provider returned no url for format");
                    report.failed.push(FormatFailure {
                        format,
                        error: "no url in response".to_string(),
                    });
                }
                Err(err) => {
                    error!(label_id = %label.id, format = %format, error = %err, "label format request failed");
                    report.failed.push(FormatFailure {
                        format,
                        error: err.to_string(),
                    });
                    if err.is_transient() {
                        retryable = Some(err);
                    }
                }
            }
        }

        info!(
            label_id = %label.id,
            populated = report.populated.len(),
            failed = report.failed.len(),
            "label format backfill finished"
        );
        // A transient failure reruns the whole pass.
        match retryable {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Copies the provider's refund status onto every shipment with a
    /// submitted refund. Per-shipment failures do not stop the scan; a
    /// transient one is returned after it.
    pub async fn update_refund_statuses(&self) -> Result<RefundPollReport, SyncError> {
        let pending = self
            .storage()
            .list_shipments_by_refund_status(RefundStatus::Submitted)
            .await?;

        let mut report = RefundPollReport::default();
        let mut retryable = None;
        for shipment in pending {
            report.checked += 1;
            match self.poll_refund(&shipment).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    error!(shipment_id = %shipment.id, error = %err, "refund status poll failed");
                    if err.is_transient() {
                        retryable = Some(err);
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "refund status poll finished"
        );
        match retryable {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn poll_refund(&self, shipment: &Shipment) -> Result<bool, SyncError> {
        let live = self.live_shipment(shipment).await?;
        let raw = live.refund_status.as_deref().unwrap_or_default();
        let remote = match raw.parse::<RefundStatus>() {
            Ok(status) => status,
            Err(err) => {
                warn!(shipment_id = %shipment.id, error = %err, "unrecognized refund status");
                return Ok(false);
            }
        };

        if remote == shipment.refund_status {
            return Ok(false);
        }
        if !shipment.refund_status.can_transition_to(remote) {
            warn!(
                shipment_id = %shipment.id,
                from = %shipment.refund_status,
                to = %remote,
                "skipping illegal refund transition"
            );
            return Ok(false);
        }

        self.storage()
            .update_refund_status(&shipment.id, remote)
            .await?;
        info!(shipment_id = %shipment.id, status = %remote, "refund status updated");
        Ok(true)
    }
}
