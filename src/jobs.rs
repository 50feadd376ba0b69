//! Backend job tracking.
//!
//! Lifecycle actions and exports run as asynchronous jobs on the backend.
//! The [`JobTracker`] finds them in the `tables/jobs` table and polls until
//! they show up or finish, sleeping between attempts per a
//! [`BackoffPolicy`](crate::backoff::BackoffPolicy).

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, PollBudget};
use crate::error::{ClientError, Result};
use crate::models::AsyncJob;
use crate::query::{Query, QueryEngine};

pub const JOBS_TABLE: &str = "tables/jobs";
pub const DOWNLOAD_JOB: &str = "snapshotDownload";

const JOB_COLUMNS: [&str; 8] = [
    "id",
    "name",
    "snapshot",
    "status",
    "jobDetail",
    "downloadFile",
    "startedAt",
    "finishedAt",
];

pub struct JobTracker {
    engine: Arc<QueryEngine>,
    policy: BackoffPolicy,
}

impl JobTracker {
    pub fn new(engine: Arc<QueryEngine>, policy: BackoffPolicy) -> Self {
        Self { engine, policy }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Finished download job for `snapshot_id`, if any.
    ///
    /// When the backend lists several (the snapshot was exported more than
    /// once), the one with the highest numeric id wins.
    pub fn find_download_job(&self, snapshot_id: &str) -> Result<Option<AsyncJob>> {
        let query = Query::unscoped(JOBS_TABLE)
            .columns(JOB_COLUMNS)
            .filters(json!({
                "snapshot": ["eq", snapshot_id],
                "name": ["eq", DOWNLOAD_JOB],
                "status": ["eq", "done"],
            }))
            .sort(json!({ "order": "desc", "column": "startedAt" }));
        let jobs = self.list(&query)?;

        if jobs.len() > 1 {
            tracing::warn!(
                snapshot = snapshot_id,
                jobs = jobs.len(),
                "multiple download jobs found; using the most recent"
            );
        }
        Ok(jobs
            .into_iter()
            .max_by_key(|j| j.numeric_id().unwrap_or(0)))
    }

    /// Poll [`find_download_job`](Self::find_download_job) until a job appears.
    ///
    /// # Errors
    ///
    /// `DownloadJobNotFound` once `retry` attempts or `timeout` are spent.
    pub fn await_job(&self, snapshot_id: &str, retry: u32, timeout: Duration) -> Result<AsyncJob> {
        let mut budget = PollBudget::new(self.policy, retry, timeout);
        while budget.next_attempt() {
            if let Some(job) = self.find_download_job(snapshot_id)? {
                tracing::info!(
                    snapshot = snapshot_id,
                    job = %job.id,
                    attempts = budget.attempts(),
                    "download job ready"
                );
                return Ok(job);
            }
            tracing::debug!(
                snapshot = snapshot_id,
                attempt = budget.attempts(),
                "download job not visible yet"
            );
        }
        Err(ClientError::DownloadJobNotFound {
            snapshot: snapshot_id.to_string(),
            attempts: budget.attempts(),
        })
    }

    /// Poll the job named `name` carrying `tag` as its `jobDetail` until done.
    ///
    /// # Errors
    ///
    /// `JobFailed` if the job reaches a failed state, `JobTimedOut` if the
    /// budget runs out first.
    pub fn await_tagged_job(
        &self,
        name: &str,
        tag: i64,
        snapshot_id: &str,
        retry: u32,
        timeout: Duration,
    ) -> Result<AsyncJob> {
        let query = Query::unscoped(JOBS_TABLE)
            .columns(JOB_COLUMNS)
            .filters(json!({
                "name": ["eq", name],
                "jobDetail": ["eq", tag],
            }));

        let mut budget = PollBudget::new(self.policy, retry, timeout);
        while budget.next_attempt() {
            let job = self
                .list(&query)?
                .into_iter()
                .max_by_key(|j| j.numeric_id().unwrap_or(0));
            match job {
                Some(job) if job.is_done() => return Ok(job),
                Some(job) if job.has_failed() => {
                    return Err(ClientError::JobFailed {
                        job: name.to_string(),
                        snapshot: snapshot_id.to_string(),
                        status: job.status.unwrap_or_default(),
                    })
                }
                Some(job) => tracing::debug!(
                    snapshot = snapshot_id,
                    job = %job.id,
                    status = job.status.as_deref().unwrap_or("?"),
                    "job still running"
                ),
                None => tracing::debug!(snapshot = snapshot_id, job = name, "job not listed yet"),
            }
        }

        Err(ClientError::JobTimedOut {
            job: name.to_string(),
            snapshot: snapshot_id.to_string(),
            waited_secs: budget.elapsed().as_secs(),
        })
    }

    fn list(&self, query: &Query) -> Result<Vec<AsyncJob>> {
        self.engine
            .fetch_all(query)?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| ClientError::payload("job record", e)))
            .collect()
    }
}
