//! Client session.
//!
//! A [`Session`] owns everything one logical connection needs: the
//! transport, the snapshot registry, the query engine, the lifecycle
//! executor, and the *active snapshot* that snapshot-scoped queries are
//! bound to. Nothing is global; two sessions never share state.
//!
//! ```rust,no_run
//! use netassure::config::Config;
//! use netassure::session::Session;
//!
//! # fn main() -> netassure::Result<()> {
//! let config = Config::default_for("https://fabric.example.net");
//! let mut session = Session::connect(&config)?;
//! let devices = session.fetch_all(
//!     &session.query("tables/inventory/devices").columns(["hostname", "siteName"]),
//! )?;
//! session.lock("$last")?;
//! # let _ = devices;
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::jobs::JobTracker;
use crate::lifecycle::{SnapshotLifecycle, Transition};
use crate::models::{DownloadedArtifact, FeatureFlags, Page, Snapshot};
use crate::query::{Query, QueryEngine, SnapshotBinding};
use crate::registry::SnapshotRegistry;
use crate::transport::{HttpTransport, Transport};

pub struct Session {
    transport: Arc<dyn Transport>,
    engine: Arc<QueryEngine>,
    lifecycle: SnapshotLifecycle,
    registry: SnapshotRegistry,
    active_ref: String,
    active: Option<String>,
}

impl Session {
    /// Connect over HTTP using the `[backend]` section of `config`.
    pub fn connect(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.backend)
            .map_err(|e| ClientError::unavailable("connect", format!("{:#}", e)))?;
        Self::open(Arc::new(transport), config)
    }

    /// Build the registry over `transport` and resolve `session.snapshot`.
    pub fn open(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        let engine = Arc::new(QueryEngine::new(transport.clone(), &config.query));
        let jobs = JobTracker::new(engine.clone(), config.jobs.backoff_policy());
        let lifecycle = SnapshotLifecycle::new(transport.clone(), jobs, config);
        let registry = SnapshotRegistry::build(transport.as_ref())?;

        let mut session = Self {
            transport,
            engine,
            lifecycle,
            registry,
            active_ref: config.session.snapshot.clone(),
            active: None,
        };
        session.active = session.resolve_active()?;
        Ok(session)
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn lifecycle(&self) -> &SnapshotLifecycle {
        &self.lifecycle
    }

    /// The active snapshot, or `None` when no snapshot is loaded.
    pub fn active(&self) -> Option<&Snapshot> {
        self.active.as_deref().and_then(|id| self.registry.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Make `reference` the active snapshot. It is re-resolved on refresh.
    pub fn set_active(&mut self, reference: &str) -> Result<()> {
        let previous = std::mem::replace(&mut self.active_ref, reference.to_string());
        match self.resolve_active() {
            Ok(active) => {
                self.active = active;
                Ok(())
            }
            Err(e) => {
                self.active_ref = previous;
                Err(e)
            }
        }
    }

    /// Rebuild the registry from the backend and re-resolve the active reference.
    pub fn refresh(&mut self) -> Result<()> {
        self.registry.refresh(self.transport.as_ref())?;
        self.active = self.resolve_active()?;
        Ok(())
    }

    pub fn resolve(&self, reference: &str) -> Result<&Snapshot> {
        self.registry.resolve(reference)
    }

    /// Snapshot-scoped query that will run against the active snapshot.
    pub fn query(&self, endpoint: &str) -> Query {
        Query::new(endpoint)
    }

    /// Query against an endpoint that is not snapshot-scoped.
    pub fn unscoped(&self, endpoint: &str) -> Query {
        Query::unscoped(endpoint)
    }

    /// Bind an `Active` query to the active snapshot.
    ///
    /// # Errors
    ///
    /// `NoActiveSnapshot` if the query needs one and none is active.
    pub fn bind(&self, query: &Query) -> Result<Query> {
        let mut bound = query.clone();
        if bound.snapshot == SnapshotBinding::Active {
            let id = self.active.clone().ok_or_else(|| ClientError::NoActiveSnapshot {
                endpoint: query.endpoint.clone(),
            })?;
            bound.snapshot = SnapshotBinding::Explicit(id);
        }
        Ok(bound)
    }

    pub fn fetch_all(&self, query: &Query) -> Result<Vec<Value>> {
        self.engine.fetch_all(&self.bind(query)?)
    }

    pub fn fetch_page(&self, query: &Query, start: u64, limit: u64) -> Result<Page> {
        self.engine.fetch_page(&self.bind(query)?, start, limit)
    }

    pub fn count(&self, query: &Query) -> Result<u64> {
        self.engine.count(&self.bind(query)?)
    }

    pub fn discover_columns(&self, endpoint: &str) -> Result<Vec<String>> {
        self.engine.discover_columns(endpoint)
    }

    pub fn load(&mut self, reference: &str) -> Result<Transition> {
        self.apply(reference, |lc, snap| lc.load(snap))
    }

    pub fn unload(&mut self, reference: &str) -> Result<Transition> {
        self.apply(reference, |lc, snap| lc.unload(snap))
    }

    pub fn lock(&mut self, reference: &str) -> Result<Transition> {
        self.apply(reference, |lc, snap| lc.lock(snap))
    }

    pub fn unlock(&mut self, reference: &str) -> Result<Transition> {
        self.apply(reference, |lc, snap| lc.unlock(snap))
    }

    pub fn update_feature_flags(
        &mut self,
        reference: &str,
        disable_graph_cache: bool,
        disable_historical_data: bool,
        disable_intent_verification: bool,
    ) -> Result<Transition> {
        self.apply(reference, |lc, snap| {
            lc.update_feature_flags(
                snap,
                disable_graph_cache,
                disable_historical_data,
                disable_intent_verification,
            )
        })
    }

    pub fn settings(&self, reference: &str) -> Result<FeatureFlags> {
        let snapshot = self.registry.resolve(reference)?;
        self.lifecycle.settings(snapshot)
    }

    pub fn download(
        &self,
        reference: &str,
        destination: Option<&Path>,
        retry: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<DownloadedArtifact> {
        let snapshot = self.registry.resolve(reference)?;
        self.lifecycle.download(snapshot, destination, retry, timeout)
    }

    /// Run `op` on a working copy and store it back only if it succeeded.
    fn apply<T>(
        &mut self,
        reference: &str,
        op: impl FnOnce(&SnapshotLifecycle, &mut Snapshot) -> Result<T>,
    ) -> Result<T> {
        let mut working = self.registry.resolve(reference)?.clone();
        let out = op(&self.lifecycle, &mut working)?;
        if let Some(slot) = self.registry.get_mut(working.id()) {
            *slot = working;
        }
        Ok(out)
    }

    fn resolve_active(&self) -> Result<Option<String>> {
        let active = self
            .registry
            .resolve_default(Some(&self.active_ref))?
            .map(|s| s.id().to_string());
        match active {
            Some(ref id) => tracing::debug!(reference = %self.active_ref, snapshot = %id, "active snapshot"),
            None => tracing::warn!(
                reference = %self.active_ref,
                "no loaded snapshot; snapshot-scoped queries will fail until one is loaded"
            ),
        }
        Ok(active)
    }
}
