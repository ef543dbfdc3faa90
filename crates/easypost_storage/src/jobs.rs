use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use easypost_contract::{JobKind, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use crate::repository::{parse_timestamp, timestamp, EasypostStorage};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub job_id: String,
    pub operation: String,
    pub status: String,
    pub payload_json: String,
    pub attempts: i64,
    pub submitted_at: String,
    pub updated_at: String,
    pub failure_reason: Option<String>,
}

impl JobRecord {
    pub fn kind(&self) -> Result<JobKind> {
        serde_json::from_str(&self.payload_json)
            .with_context(|| format!("decode payload for job {}", self.job_id))
    }

    pub fn job_status(&self) -> Result<JobStatus> {
        Ok(JobStatus::from_str(&self.status)?)
    }

    pub fn last_updated(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.updated_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobResultRecord {
    pub job_id: String,
    pub result_json: String,
    pub completed_at: String,
}

const JOB_COLUMNS: &str =
    "job_id, operation, status, payload_json, attempts, submitted_at, updated_at, failure_reason";

impl EasypostStorage {
    pub async fn create_job(&self, kind: &JobKind) -> Result<JobRecord> {
        let now = timestamp(Utc::now());
        let job_id = Uuid::now_v7().to_string();
        let payload_json = serde_json::to_string(kind).context("serialize job payload")?;

        sqlx::query(
            "INSERT INTO jobs(job_id, operation, status, payload_json, attempts, submitted_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&job_id)
        .bind(kind.operation())
        .bind(JobStatus::Queued.as_str())
        .bind(&payload_json)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await
        .context("insert job")?;

        self.get_job(&job_id)
            .await?
            .context("job missing after insert")
    }

    /// Marks the job running and bumps its attempt counter. Returns the
    /// attempt number now in progress.
    pub async fn start_job_attempt(&self, job_id: &str) -> Result<i64> {
        let attempts = sqlx::query_scalar::<_, i64>(
            "UPDATE jobs SET status = ?, attempts = attempts + 1, updated_at = ? WHERE job_id = ? RETURNING attempts",
        )
        .bind(JobStatus::Running.as_str())
        .bind(timestamp(Utc::now()))
        .bind(job_id)
        .fetch_one(self.pool())
        .await
        .with_context(|| format!("start attempt for job {job_id}"))?;
        Ok(attempts)
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ?, updated_at = ?, failure_reason = ? WHERE job_id = ?")
            .bind(status.as_str())
            .bind(timestamp(Utc::now()))
            .bind(failure_reason)
            .bind(job_id)
            .execute(self.pool())
            .await
            .with_context(|| format!("update job status for {job_id}"))?;

        Ok(())
    }

    pub async fn insert_job_result(&self, job_id: &str, result: Value) -> Result<()> {
        let result_json = serde_json::to_string(&result).context("serialize job result")?;

        sqlx::query(
            "INSERT INTO job_results(job_id, result_json, completed_at) VALUES (?, ?, ?) ON CONFLICT(job_id) DO UPDATE SET result_json = excluded.result_json, completed_at = excluded.completed_at",
        )
        .bind(job_id)
        .bind(result_json)
        .bind(timestamp(Utc::now()))
        .execute(self.pool())
        .await
        .with_context(|| format!("insert job result for {job_id}"))?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        sqlx::query_as::<_, JobRecord>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"))
            .bind(job_id)
            .fetch_optional(self.pool())
            .await
            .with_context(|| format!("query job {job_id}"))
    }

    pub async fn get_job_result(&self, job_id: &str) -> Result<Option<JobResultRecord>> {
        sqlx::query_as::<_, JobResultRecord>(
            "SELECT job_id, result_json, completed_at FROM job_results WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("query job result {job_id}"))
    }

    /// Jobs left queued, running or retrying, oldest first.
    pub async fn list_pending_jobs(&self) -> Result<Vec<JobRecord>> {
        sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN (?, ?, ?) ORDER BY submitted_at ASC"
        ))
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Running.as_str())
        .bind(JobStatus::Retrying.as_str())
        .fetch_all(self.pool())
        .await
        .context("query pending jobs")
    }

    /// Deletes finished jobs and their results older than the retention window.
    /// Returns the number of jobs removed.
    pub async fn purge_finished_jobs(&self, retention_hours: i64) -> Result<u64> {
        let cutoff = timestamp(Utc::now() - Duration::hours(retention_hours));

        sqlx::query(
            "DELETE FROM job_results WHERE job_id IN (SELECT job_id FROM jobs WHERE status IN (?, ?) AND updated_at < ?)",
        )
        .bind(JobStatus::Success.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(&cutoff)
        .execute(self.pool())
        .await
        .context("purge expired job_results")?;

        let removed = sqlx::query("DELETE FROM jobs WHERE status IN (?, ?) AND updated_at < ?")
            .bind(JobStatus::Success.as_str())
            .bind(JobStatus::Failed.as_str())
            .bind(&cutoff)
            .execute(self.pool())
            .await
            .context("purge expired jobs")?
            .rows_affected();

        debug!(removed, retention_hours, "purged finished jobs");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StorageConfig;
    use serde_json::json;

    async fn storage() -> (EasypostStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let storage = EasypostStorage::connect(&StorageConfig::new(path.display().to_string()))
            .await
            .unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn job_lifecycle_is_recorded() {
        let (storage, _dir) = storage().await;
        let job = storage
            .create_job(&JobKind::backfill_label_formats("lbl-1"))
            .await
            .unwrap();
        assert_eq!(job.operation, "backfill_label_formats");
        assert_eq!(job.job_status().unwrap(), JobStatus::Queued);
        assert_eq!(job.kind().unwrap(), JobKind::backfill_label_formats("lbl-1"));

        assert_eq!(storage.start_job_attempt(&job.job_id).await.unwrap(), 1);
        assert_eq!(storage.start_job_attempt(&job.job_id).await.unwrap(), 2);

        storage
            .insert_job_result(&job.job_id, json!({"added": ["zpl"]}))
            .await
            .unwrap();
        storage
            .update_job_status(&job.job_id, JobStatus::Success, None)
            .await
            .unwrap();

        let stored = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.job_status().unwrap(), JobStatus::Success);
        let result = storage.get_job_result(&job.job_id).await.unwrap().unwrap();
        assert!(result.result_json.contains("zpl"));
    }

    #[tokio::test]
    async fn pending_jobs_exclude_finished_ones() {
        let (storage, _dir) = storage().await;
        let done = storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();
        let waiting = storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();
        storage
            .update_job_status(&done.job_id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let pending = storage.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, waiting.job_id);
    }

    #[tokio::test]
    async fn purge_keeps_recent_and_pending_jobs() {
        let (storage, _dir) = storage().await;
        let done = storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();
        storage
            .update_job_status(&done.job_id, JobStatus::Success, None)
            .await
            .unwrap();
        storage.create_job(&JobKind::UpdateRefundStatuses).await.unwrap();

        assert_eq!(storage.purge_finished_jobs(24).await.unwrap(), 0);
        assert_eq!(storage.purge_finished_jobs(-1).await.unwrap(), 1);
        assert_eq!(storage.list_pending_jobs().await.unwrap().len(), 1);
    }
}
