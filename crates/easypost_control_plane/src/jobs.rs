//! Durable job queue: rows in the `jobs` table, ids handed to a single worker
//! task over an in-process channel.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use easypost_contract::{JobId, JobKind, JobStatus};
use easypost_storage::{EasypostStorage, JobRecord};
use easypost_sync::{ShipmentSync, SyncError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("failed to encode job result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Sync(error) => error.is_transient(),
            JobError::InvalidPayload(_) | JobError::Encode(_) => false,
        }
    }
}

/// Constant-delay retry for jobs failing with a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_retries: 20,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    storage: EasypostStorage,
    sender: mpsc::UnboundedSender<JobId>,
}

impl JobQueue {
    pub fn new(storage: EasypostStorage) -> (Self, mpsc::UnboundedReceiver<JobId>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { storage, sender }, receiver)
    }

    /// Persists the job and wakes the worker. The row is written first, so a
    /// stopped worker picks the job up on its next start.
    pub async fn enqueue(&self, kind: JobKind) -> anyhow::Result<JobRecord> {
        let job = self
            .storage
            .create_job(&kind)
            .await
            .with_context(|| format!("enqueue {} job", kind.operation()))?;
        info!(job_id = %job.job_id, operation = %job.operation, "job queued");
        self.dispatch(&job.job_id);
        Ok(job)
    }

    fn dispatch(&self, job_id: &str) {
        if self.sender.send(job_id.to_string()).is_err() {
            warn!(job_id = %job_id, "job worker is not running; job left queued");
        }
    }
}

pub struct JobWorker {
    sync: ShipmentSync,
    queue: JobQueue,
    receiver: mpsc::UnboundedReceiver<JobId>,
    retry: RetryPolicy,
}

impl JobWorker {
    pub fn new(
        sync: ShipmentSync,
        queue: JobQueue,
        receiver: mpsc::UnboundedReceiver<JobId>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sync,
            queue,
            receiver,
            retry,
        }
    }

    /// Re-dispatches every job a previous process left unfinished.
    ///
    /// Ids already waiting on the channel are sent once, and a retrying job
    /// waits out the rest of its delay. Returns the jobs resumed from storage.
    pub async fn resume_pending(&mut self) -> anyhow::Result<usize> {
        let mut queued: Vec<JobId> = Vec::new();
        while let Ok(job_id) = self.receiver.try_recv() {
            if !queued.contains(&job_id) {
                queued.push(job_id);
            }
        }
        for job_id in &queued {
            self.queue.dispatch(job_id);
        }

        let pending = self.queue.storage.list_pending_jobs().await?;
        let mut resumed = 0;
        for job in pending.iter().filter(|job| !queued.contains(&job.job_id)) {
            match self.retry_wait(job)? {
                Some(wait) => self.schedule_retry(&job.job_id, wait),
                None => self.queue.dispatch(&job.job_id),
            }
            resumed += 1;
        }
        if resumed > 0 {
            info!(count = resumed, "resuming unfinished jobs");
        }
        Ok(resumed)
    }

    pub async fn run(mut self) {
        if let Err(err) = self.resume_pending().await {
            error!(error = %err, "failed to load unfinished jobs");
        }
        while let Some(job_id) = self.receiver.recv().await {
            self.handle(&job_id).await;
        }
        info!("job worker stopped");
    }

    /// Runs jobs until none arrives for `idle`. Returns the attempts made.
    pub async fn run_until_idle(&mut self, idle: Duration) -> usize {
        let mut attempts = 0;
        while let Ok(Some(job_id)) = tokio::time::timeout(idle, self.receiver.recv()).await {
            self.handle(&job_id).await;
            attempts += 1;
        }
        attempts
    }

    async fn handle(&self, job_id: &str) {
        if let Err(err) = self.process(job_id).await {
            error!(job_id = %job_id, error = %err, "job processing failed");
        }
    }

    async fn process(&self, job_id: &str) -> anyhow::Result<()> {
        let storage = &self.queue.storage;
        let Some(job) = storage.get_job(job_id).await? else {
            warn!(job_id = %job_id, "dispatched job does not exist");
            return Ok(());
        };
        if !job.job_status()?.is_pending() {
            debug!(job_id = %job_id, status = %job.status, "job already finished");
            return Ok(());
        }

        if let Some(wait) = self.retry_wait(&job)? {
            debug!(job_id = %job_id, wait_ms = wait.as_millis() as u64, "retry not due yet");
            self.schedule_retry(job_id, wait);
            return Ok(());
        }

        let attempt = storage.start_job_attempt(job_id).await?;
        let outcome = self.execute(&job).await;
        if let Err(err) = self.record_outcome(&job, attempt, outcome).await {
            let reason = format!("{err:#}");
            let status = if self.may_retry(attempt) {
                JobStatus::Retrying
            } else {
                JobStatus::Failed
            };
            error!(job_id = %job_id, attempt, error = %reason, status = %status, "failed to record job outcome");
            storage
                .update_job_status(job_id, status, Some(&reason))
                .await?;
            if status == JobStatus::Retrying {
                self.schedule_retry(job_id, self.retry.delay);
            }
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        job: &JobRecord,
        attempt: i64,
        outcome: Result<Value, JobError>,
    ) -> anyhow::Result<()> {
        let storage = &self.queue.storage;
        let job_id = job.job_id.as_str();
        match outcome {
            Ok(result) => {
                storage.insert_job_result(job_id, result).await?;
                storage
                    .update_job_status(job_id, JobStatus::Success, None)
                    .await?;
                info!(job_id = %job_id, operation = %job.operation, attempt, "job completed");
            }
            Err(err) if err.is_transient() && self.may_retry(attempt) => {
                let reason = err.to_string();
                storage
                    .update_job_status(job_id, JobStatus::Retrying, Some(&reason))
                    .await?;
                warn!(
                    job_id = %job_id,
                    operation = %job.operation,
                    attempt,
                    error = %reason,
                    "job failed transiently; retry scheduled"
                );
                self.schedule_retry(job_id, self.retry.delay);
            }
            Err(err) => {
                let reason = err.to_string();
                storage
                    .update_job_status(job_id, JobStatus::Failed, Some(&reason))
                    .await?;
                error!(job_id = %job_id, operation = %job.operation, attempt, error = %reason, "job failed");
            }
        }
        Ok(())
    }

    fn may_retry(&self, attempt: i64) -> bool {
        attempt <= i64::from(self.retry.max_retries)
    }

    /// Time left before a retrying job is due, or `None` when it can run now.
    fn retry_wait(&self, job: &JobRecord) -> anyhow::Result<Option<Duration>> {
        if job.job_status()? != JobStatus::Retrying {
            return Ok(None);
        }
        let elapsed = (Utc::now() - job.last_updated()?)
            .to_std()
            .unwrap_or_default();
        Ok(self
            .retry
            .delay
            .checked_sub(elapsed)
            .filter(|wait| !wait.is_zero()))
    }

    async fn execute(&self, job: &JobRecord) -> Result<Value, JobError> {
        let kind = job
            .kind()
            .map_err(|err| JobError::InvalidPayload(format!("{err:#}")))?;
        let result = match kind {
            JobKind::ProcessWebhook { payload_base64 } => {
                let body = JobKind::decode_payload(&payload_base64)
                    .map_err(|err| JobError::InvalidPayload(err.to_string()))?;
                serde_json::to_value(self.sync.process_webhook_event(&body).await?)?
            }
            JobKind::BackfillLabelFormats { label_id } => {
                serde_json::to_value(self.sync.get_additional_label_formats(&label_id).await?)?
            }
            JobKind::UpdateRefundStatuses => {
                serde_json::to_value(self.sync.update_refund_statuses().await?)?
            }
        };
        Ok(result)
    }

    fn schedule_retry(&self, job_id: &str, delay: Duration) {
        let queue = self.queue.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.dispatch(&job_id);
        });
    }
}

/// Periodic work driven by the daemon: refund polling and job cleanup.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// `None` disables scheduled refund polling.
    pub refund_poll_interval: Option<Duration>,
    pub retention_hours: i64,
}

pub fn spawn_scheduler(queue: JobQueue, schedule: Schedule) -> tokio::task::JoinHandle<()> {
    let period = schedule
        .refund_poll_interval
        .unwrap_or(Duration::from_secs(3600));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if schedule.refund_poll_interval.is_some() {
                if let Err(err) = queue.enqueue(JobKind::UpdateRefundStatuses).await {
                    error!(error = %err, "failed to schedule refund status poll");
                }
            }
            match queue.storage.purge_finished_jobs(schedule.retention_hours).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged finished jobs"),
                Err(err) => error!(error = %err, "failed to purge finished jobs"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use easypost_contract::{
        NewAddress, NewParcel, NewShipment, ParcelShape, PredefinedPackage, Shipment,
    };
    use easypost_provider::InMemoryShippingProvider;
    use easypost_storage::StorageConfig;
    use easypost_sync::{BuyLabelOptions, SyncConfig};
    use serde_json::json;

    const IDLE: Duration = Duration::from_millis(100);

    struct Fixture {
        sync: ShipmentSync,
        provider: Arc<InMemoryShippingProvider>,
        queue: JobQueue,
        worker: JobWorker,
        _dir: tempfile::TempDir,
    }

    async fn fixture(retry: RetryPolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let storage = EasypostStorage::connect(&StorageConfig::new(path.display().to_string()))
            .await
            .unwrap();
        let provider = Arc::new(InMemoryShippingProvider::new());
        let sync = ShipmentSync::new(storage.clone(), provider.clone(), SyncConfig::default());
        let (queue, receiver) = JobQueue::new(storage);
        let worker = JobWorker::new(sync.clone(), queue.clone(), receiver, retry);
        Fixture {
            sync,
            provider,
            queue,
            worker,
            _dir: dir,
        }
    }

    fn quick_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::ZERO,
            max_retries,
        }
    }

    async fn purchased_shipment(fixture: &Fixture) -> Shipment {
        let storage = fixture.sync.storage();
        let to = storage
            .insert_address(NewAddress {
                name: "Recipient".to_string(),
                street1: "1 Main St".to_string(),
                city: "Boston".to_string(),
                state: "MA".to_string(),
                zip_code: "02108".to_string(),
                ..NewAddress::default()
            })
            .await
            .unwrap();
        let mut shipment = storage
            .insert_shipment(NewShipment {
                to_address_id: to.id.clone(),
                from_address_id: to.id,
                is_return: false,
            })
            .await
            .unwrap();
        let mut parcel = fixture
            .sync
            .create_parcel(NewParcel {
                shipment_id: None,
                shape: ParcelShape::Predefined(PredefinedPackage::SmallFlatRateBox),
                weight: 12.0,
            })
            .await
            .unwrap();
        fixture.sync.sync_parcel(&mut parcel).await.unwrap();
        fixture
            .sync
            .sync_shipment(&mut shipment, &parcel, None)
            .await
            .unwrap();
        fixture
            .sync
            .buy_label(&mut shipment, BuyLabelOptions::default())
            .await
            .unwrap();
        shipment
    }

    #[tokio::test]
    async fn successful_job_stores_result() {
        let mut fixture = fixture(quick_retry(3)).await;
        let mut shipment = purchased_shipment(&fixture).await;
        fixture.sync.refund(&mut shipment).await.unwrap();
        fixture
            .provider
            .set_refund_status(shipment.provider_id.as_deref().unwrap(), "refunded")
            .await;

        let job = fixture
            .queue
            .enqueue(JobKind::UpdateRefundStatuses)
            .await
            .unwrap();
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 1);

        let storage = fixture.sync.storage();
        let stored = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Success);
        let result = storage.get_job_result(&job.job_id).await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&result.result_json).unwrap();
        assert_eq!(value, json!({"checked": 1, "updated": 1, "failed": 0}));
    }

    #[tokio::test]
    async fn unknown_shipment_fails_without_retry() {
        let mut fixture = fixture(quick_retry(3)).await;
        let body = serde_json::to_vec(&json!({
            "description": "tracker.updated",
            "result": {"status": "delivered", "shipment_id": "shp_nowhere", "tracking_details": []}
        }))
        .unwrap();

        let job = fixture
            .queue
            .enqueue(JobKind::process_webhook(&body))
            .await
            .unwrap();
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 1);

        let stored = fixture.sync.storage().get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.failure_reason.unwrap().contains("shp_nowhere"));
    }

    #[tokio::test]
    async fn transient_failure_retries_up_to_the_ceiling() {
        let mut fixture = fixture(quick_retry(2)).await;
        let shipment = purchased_shipment(&fixture).await;
        let label = fixture
            .sync
            .storage()
            .get_label_for_shipment(&shipment.id)
            .await
            .unwrap()
            .unwrap();
        fixture
            .provider
            .make_unavailable(shipment.provider_id.as_deref().unwrap())
            .await;

        let job = fixture
            .queue
            .enqueue(JobKind::backfill_label_formats(label.id))
            .await
            .unwrap();
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 3);

        let stored = fixture.sync.storage().get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(fixture.provider.calls().await.request_label, 12);
    }

    #[tokio::test]
    async fn missing_label_fails_immediately() {
        let mut fixture = fixture(quick_retry(2)).await;

        let job = fixture
            .queue
            .enqueue(JobKind::backfill_label_formats("lbl-gone"))
            .await
            .unwrap();
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 1);

        let stored = fixture.sync.storage().get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Failed);
        assert!(fixture
            .sync
            .storage()
            .get_job_result(&job.job_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn resumed_jobs_are_processed() {
        let mut fixture = fixture(quick_retry(1)).await;
        let storage = fixture.sync.storage().clone();
        let orphan = storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();

        assert_eq!(fixture.worker.resume_pending().await.unwrap(), 1);
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 1);

        let stored = storage.get_job(&orphan.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Success);
    }

    #[tokio::test]
    async fn resume_does_not_duplicate_jobs_already_queued() {
        let mut fixture = fixture(quick_retry(1)).await;
        let job = fixture
            .queue
            .enqueue(JobKind::UpdateRefundStatuses)
            .await
            .unwrap();

        assert_eq!(fixture.worker.resume_pending().await.unwrap(), 0);
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 1);

        let stored = fixture.sync.storage().get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Success);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn resumed_retrying_job_waits_out_its_delay() {
        let mut fixture = fixture(RetryPolicy {
            delay: Duration::from_secs(60),
            max_retries: 3,
        })
        .await;
        let storage = fixture.sync.storage().clone();
        let job = storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();
        storage
            .update_job_status(&job.job_id, JobStatus::Retrying, Some("provider unavailable"))
            .await
            .unwrap();

        assert_eq!(fixture.worker.resume_pending().await.unwrap(), 1);
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 0);

        let stored = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Retrying);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn unrecordable_outcome_does_not_leave_the_job_running() {
        let mut fixture = fixture(quick_retry(1)).await;
        let storage = fixture.sync.storage().clone();
        sqlx::query(
            "CREATE TRIGGER reject_results BEFORE INSERT ON job_results BEGIN SELECT RAISE(ABORT, 'results disabled'); END",
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let job = fixture
            .queue
            .enqueue(JobKind::UpdateRefundStatuses)
            .await
            .unwrap();
        assert_eq!(fixture.worker.run_until_idle(IDLE).await, 2);

        let stored = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_status().unwrap(), JobStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert!(stored.failure_reason.unwrap().contains("results disabled"));
    }

    #[test]
    fn only_transient_sync_errors_retry() {
        let transient = JobError::Sync(SyncError::Provider(
            easypost_provider::ProviderError::Transport("reset".to_string()),
        ));
        assert!(transient.is_transient());
        assert!(!JobError::InvalidPayload("bad base64".to_string()).is_transient());
    }
}
