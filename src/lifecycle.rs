//! Snapshot lifecycle transitions.
//!
//! ```text
//!            load                 lock
//! unloaded ───────▶ loaded ───────────────▶ loaded+locked
//!     ▲               │   ◀───────────────
//!     └───────────────┘        unlock
//!           unload
//! ```
//!
//! Every transition is idempotent from the caller's point of view: asking
//! for the state a snapshot is already in logs a warning and succeeds
//! without contacting the backend. A snapshot record is only updated after
//! the backend accepted the request.
//!
//! Load and unload are submitted as backend jobs tagged with the current
//! epoch milliseconds (`jobDetail`). With `lifecycle.wait_for_jobs` set (the
//! default), the call does not return until the tagged job is done. Without
//! it the call returns [`Transition::Submitted`] and the record is left
//! untouched until the registry is refreshed.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::jobs::JobTracker;
use crate::models::{DownloadedArtifact, FeatureFlags, Snapshot};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Extension given to downloaded snapshot archives.
pub const ARCHIVE_EXTENSION: &str = "tar";

const LOAD_JOB: &str = "snapshotLoad";
const UNLOAD_JOB: &str = "snapshotUnload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Load,
    Unload,
    Lock,
    Unlock,
    Download,
    Settings,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Load => "load",
            Action::Unload => "unload",
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::Download => "download",
            Action::Settings => "configure",
        };
        f.write_str(s)
    }
}

/// What a lifecycle call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The backend accepted the request and the record was updated.
    Applied,
    /// The backend accepted a load/unload job that was not waited for.
    Submitted,
    /// The snapshot was already in the requested state; nothing was sent.
    Unchanged,
}

pub struct SnapshotLifecycle {
    transport: Arc<dyn Transport>,
    jobs: JobTracker,
    retry: u32,
    timeout: Duration,
    wait_for_jobs: bool,
    download_dir: Option<PathBuf>,
}

impl SnapshotLifecycle {
    pub fn new(transport: Arc<dyn Transport>, jobs: JobTracker, config: &Config) -> Self {
        Self {
            transport,
            jobs,
            retry: config.jobs.retry,
            timeout: config.jobs.timeout(),
            wait_for_jobs: config.lifecycle.wait_for_jobs,
            download_dir: config.download.dir.clone(),
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    /// Load `snapshot` and cache its feature flags.
    pub fn load(&self, snapshot: &mut Snapshot) -> Result<Transition> {
        if snapshot.loaded() {
            tracing::warn!(snapshot = snapshot.id(), "snapshot already loaded");
            return Ok(Transition::Unchanged);
        }

        let tag = job_tag();
        self.send(
            Action::Load,
            snapshot.id(),
            ApiRequest::post("snapshots/load", job_payload(tag, snapshot.id())),
        )?;
        if !self.wait_for_jobs {
            tracing::info!(snapshot = snapshot.id(), tag, "load job submitted");
            return Ok(Transition::Submitted);
        }
        self.jobs
            .await_tagged_job(LOAD_JOB, tag, snapshot.id(), self.retry, self.timeout)?;

        // flags can only be read once the backend has the snapshot loaded
        let flags = self.read_settings(Action::Load, snapshot)?;
        snapshot.mark_loaded();
        snapshot.set_feature_flags(flags);
        tracing::info!(snapshot = snapshot.id(), "snapshot loaded");
        Ok(Transition::Applied)
    }

    pub fn unload(&self, snapshot: &mut Snapshot) -> Result<Transition> {
        if !snapshot.loaded() {
            tracing::warn!(snapshot = snapshot.id(), "snapshot already unloaded");
            return Ok(Transition::Unchanged);
        }

        let tag = job_tag();
        self.send(
            Action::Unload,
            snapshot.id(),
            ApiRequest::post("snapshots/unload", job_payload(tag, snapshot.id())),
        )?;
        if !self.wait_for_jobs {
            tracing::info!(snapshot = snapshot.id(), tag, "unload job submitted");
            return Ok(Transition::Submitted);
        }
        self.jobs
            .await_tagged_job(UNLOAD_JOB, tag, snapshot.id(), self.retry, self.timeout)?;

        snapshot.mark_unloaded();
        tracing::info!(snapshot = snapshot.id(), "snapshot unloaded");
        Ok(Transition::Applied)
    }

    pub fn lock(&self, snapshot: &mut Snapshot) -> Result<Transition> {
        self.set_lock(snapshot, true)
    }

    pub fn unlock(&self, snapshot: &mut Snapshot) -> Result<Transition> {
        self.set_lock(snapshot, false)
    }

    fn set_lock(&self, snapshot: &mut Snapshot, locked: bool) -> Result<Transition> {
        let action = if locked { Action::Lock } else { Action::Unlock };
        require_loaded(snapshot, action)?;
        if snapshot.locked == locked {
            tracing::warn!(
                snapshot = snapshot.id(),
                locked,
                "snapshot already in requested lock state"
            );
            return Ok(Transition::Unchanged);
        }

        let path = format!("snapshots/{}/{}", snapshot.id(), action);
        self.send(action, snapshot.id(), ApiRequest::post(path, json!({})))?;

        snapshot.locked = locked;
        tracing::info!(snapshot = snapshot.id(), locked, "snapshot lock changed");
        Ok(Transition::Applied)
    }

    /// Current feature flags as reported by the backend.
    pub fn settings(&self, snapshot: &Snapshot) -> Result<FeatureFlags> {
        self.read_settings(Action::Settings, snapshot)
    }

    /// Settings read on behalf of `action`, which is named in any error.
    fn read_settings(&self, action: Action, snapshot: &Snapshot) -> Result<FeatureFlags> {
        let resp = self.send(
            action,
            snapshot.id(),
            ApiRequest::get(format!("snapshots/{}/settings", snapshot.id())),
        )?;
        let value: Value = resp
            .json()
            .map_err(|e| ClientError::payload(format!("settings of {}", snapshot.id()), e))?;
        FeatureFlags::from_settings(&value)
            .map_err(|e| ClientError::payload(format!("settings of {}", snapshot.id()), e))
    }

    /// Switch post-discovery actions on or off.
    ///
    /// Reads the current settings first and sends nothing if they already
    /// match. Server-side recalculation is not awaited.
    pub fn update_feature_flags(
        &self,
        snapshot: &mut Snapshot,
        disable_graph_cache: bool,
        disable_historical_data: bool,
        disable_intent_verification: bool,
    ) -> Result<Transition> {
        require_loaded(snapshot, Action::Settings)?;

        let wanted = FeatureFlags {
            graph_cache_disabled: disable_graph_cache,
            historical_data_disabled: disable_historical_data,
            intent_verification_disabled: disable_intent_verification,
        };
        let current = self.settings(snapshot)?;
        if current == wanted {
            snapshot.set_feature_flags(current);
            tracing::info!(snapshot = snapshot.id(), "feature flags already match");
            return Ok(Transition::Unchanged);
        }

        self.send(
            Action::Settings,
            snapshot.id(),
            ApiRequest::patch(
                format!("snapshots/{}/settings", snapshot.id()),
                json!({ "disabledPostDiscoveryActions": wanted.disabled_actions() }),
            ),
        )?;
        snapshot.set_feature_flags(wanted);
        tracing::info!(
            snapshot = snapshot.id(),
            disabled = ?wanted.disabled_actions(),
            "feature flags updated"
        );
        Ok(Transition::Applied)
    }

    /// Export `snapshot` and write the archive to disk.
    ///
    /// `destination` may be a file path or an existing directory; without
    /// one, `<download.dir or cwd>/<id>.tar` is used. `retry` and `timeout`
    /// default to the `[jobs]` configuration.
    pub fn download(
        &self,
        snapshot: &Snapshot,
        destination: Option<&Path>,
        retry: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<DownloadedArtifact> {
        let id = snapshot.id();
        self.send(
            Action::Download,
            id,
            ApiRequest::get(format!("snapshots/{}/download", id)),
        )?;

        let job = self.jobs.await_job(
            id,
            retry.unwrap_or(self.retry),
            timeout.unwrap_or(self.timeout),
        )?;

        let resp = self.send(
            Action::Download,
            id,
            ApiRequest::get(format!("jobs/{}/download", job.id)),
        )?;

        let path = self.artifact_path(id, destination);
        std::fs::write(&path, &resp.body).map_err(|source| ClientError::Io {
            path: path.clone(),
            source,
        })?;

        let artifact = DownloadedArtifact {
            snapshot: id.to_string(),
            job: job.id,
            path,
            size: resp.body.len() as u64,
            sha256: hex::encode(Sha256::digest(&resp.body)),
        };
        tracing::info!(
            snapshot = id,
            path = %artifact.path.display(),
            size = artifact.size,
            "snapshot downloaded"
        );
        Ok(artifact)
    }

    fn artifact_path(&self, id: &str, destination: Option<&Path>) -> PathBuf {
        let file_name = format!("{}.{}", id, ARCHIVE_EXTENSION);
        match destination {
            Some(dest) if dest.is_dir() => dest.join(file_name),
            Some(dest) => dest.to_path_buf(),
            None => match self.download_dir {
                Some(ref dir) => dir.join(file_name),
                None => PathBuf::from(file_name),
            },
        }
    }

    /// Send a state-changing or lifecycle request. Any failure is fatal.
    fn send(&self, action: Action, snapshot_id: &str, request: ApiRequest) -> Result<ApiResponse> {
        let context = format!("{} snapshot {}", action, snapshot_id);
        let resp = self
            .transport
            .execute(&request)
            .map_err(|e| ClientError::unavailable(context.clone(), format!("{:#}", e)))?;
        if !resp.is_success() {
            return Err(ClientError::unavailable(
                context,
                format!(
                    "{} {} returned HTTP {}: {}",
                    request.method,
                    request.path,
                    resp.status,
                    resp.text().chars().take(500).collect::<String>()
                ),
            ));
        }
        Ok(resp)
    }
}

fn require_loaded(snapshot: &Snapshot, action: Action) -> Result<()> {
    if snapshot.loaded() {
        Ok(())
    } else {
        Err(ClientError::SnapshotNotLoaded {
            snapshot: snapshot.id().to_string(),
            action: action.to_string(),
        })
    }
}

/// Client-generated job tag: current epoch milliseconds.
fn job_tag() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn job_payload(tag: i64, snapshot_id: &str) -> Value {
    json!({ "jobDetail": tag, "snapshots": [snapshot_id] })
}
