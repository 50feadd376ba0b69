//! Snapshot registry and symbolic references.
//!
//! The registry is a point-in-time copy of the backend's snapshot listing.
//! Snapshots are kept in listing order (most recent first) and indexed by id.
//! On top of that, loaded snapshots get symbolic aliases:
//!
//! | Key | Points to |
//! |-----|-----------|
//! | `$last` | first loaded snapshot in listing order |
//! | `$prev` | second loaded snapshot |
//! | `$lastLocked` | first loaded snapshot that is also locked |
//! | `$first` | last loaded snapshot in listing order (the oldest) |
//!
//! Any key may be absent. Keys are assigned once per build and never moved;
//! to see new snapshots or changed states, call [`SnapshotRegistry::refresh`].

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ClientError, Result};
use crate::models::Snapshot;
use crate::transport::{ApiRequest, Transport};

pub const LAST: &str = "$last";
pub const PREV: &str = "$prev";
pub const LAST_LOCKED: &str = "$lastLocked";
pub const FIRST: &str = "$first";

/// All symbolic keys, in display order.
pub const SYMBOLIC_KEYS: [&str; 4] = [LAST, PREV, LAST_LOCKED, FIRST];

#[derive(Debug, Clone, Default)]
pub struct SnapshotRegistry {
    snapshots: Vec<Snapshot>,
    by_id: HashMap<String, usize>,
    symbolic: HashMap<&'static str, usize>,
}

impl SnapshotRegistry {
    /// Fetch `GET snapshots` and index the result.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` if the listing call fails or returns a non-success
    /// status; `InvalidPayload` if a record lacks required fields.
    pub fn build(transport: &dyn Transport) -> Result<Self> {
        let resp = transport
            .execute(&ApiRequest::get("snapshots"))
            .map_err(|e| ClientError::unavailable("snapshot listing", format!("{:#}", e)))?;
        if !resp.is_success() {
            return Err(ClientError::unavailable(
                "snapshot listing",
                format!("HTTP {}: {}", resp.status, resp.text()),
            ));
        }

        let records: Vec<Value> = resp
            .json()
            .map_err(|e| ClientError::payload("snapshot listing", e))?;
        let snapshots = records
            .into_iter()
            .map(|r| Snapshot::from_value(r).map_err(|e| ClientError::payload("snapshot record", e)))
            .collect::<Result<Vec<_>>>()?;

        let registry = Self::from_snapshots(snapshots);
        tracing::info!(
            snapshots = registry.len(),
            loaded = registry.loaded().count(),
            last = registry.symbolic(LAST).unwrap_or("-"),
            "snapshot registry built"
        );
        Ok(registry)
    }

    /// Index an already-fetched listing (backend order, most recent first).
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Self {
        let mut by_id = HashMap::with_capacity(snapshots.len());
        let mut symbolic: HashMap<&'static str, usize> = HashMap::new();
        let mut loaded_seen = 0usize;

        for (idx, snap) in snapshots.iter().enumerate() {
            by_id.insert(snap.id().to_string(), idx);
            if !snap.loaded() {
                continue;
            }
            if snap.locked {
                symbolic.entry(LAST_LOCKED).or_insert(idx);
            }
            loaded_seen += 1;
            match loaded_seen {
                1 => {
                    symbolic.entry(LAST).or_insert(idx);
                }
                2 => {
                    symbolic.entry(PREV).or_insert(idx);
                }
                _ => {}
            }
        }

        // the oldest loaded snapshot is only known once the sweep is over
        if let Some(idx) = snapshots.iter().rposition(Snapshot::loaded) {
            symbolic.insert(FIRST, idx);
        }

        Self {
            snapshots,
            by_id,
            symbolic,
        }
    }

    /// Rebuild from the backend, replacing everything including symbolic keys.
    pub fn refresh(&mut self, transport: &dyn Transport) -> Result<()> {
        *self = Self::build(transport)?;
        Ok(())
    }

    /// Resolve an id or symbolic key.
    pub fn resolve(&self, reference: &str) -> Result<&Snapshot> {
        self.index_of(reference)
            .map(|idx| &self.snapshots[idx])
            .ok_or_else(|| ClientError::UnknownSnapshot(reference.to_string()))
    }

    /// Resolve the session's default reference.
    ///
    /// With no loaded snapshot at all, an unset or `$last` reference yields
    /// `Ok(None)` instead of an error; scoped queries fail later with
    /// `NoActiveSnapshot`.
    pub fn resolve_default(&self, reference: Option<&str>) -> Result<Option<&Snapshot>> {
        let reference = reference.unwrap_or(LAST);
        if reference == LAST && !self.has_loaded() {
            return Ok(None);
        }
        self.resolve(reference).map(Some)
    }

    /// Id a symbolic key points to, if assigned.
    pub fn symbolic(&self, key: &str) -> Option<&str> {
        self.symbolic
            .get(key)
            .map(|&idx| self.snapshots[idx].id())
    }

    /// Symbolic keys pointing at `id`.
    pub fn aliases_of(&self, id: &str) -> Vec<&'static str> {
        SYMBOLIC_KEYS
            .iter()
            .copied()
            .filter(|k| self.symbolic(k) == Some(id))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Snapshot> {
        self.by_id.get(id).map(|&idx| &self.snapshots[idx])
    }

    /// Mutable access by real id, for recording confirmed lifecycle transitions.
    /// Symbolic keys are not recomputed.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Snapshot> {
        match self.by_id.get(id) {
            Some(&idx) => Some(&mut self.snapshots[idx]),
            None => None,
        }
    }

    /// All snapshots in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn loaded(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().filter(|s| s.loaded())
    }

    pub fn unloaded(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().filter(|s| !s.loaded())
    }

    pub fn has_loaded(&self) -> bool {
        self.snapshots.iter().any(Snapshot::loaded)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn index_of(&self, reference: &str) -> Option<usize> {
        self.by_id
            .get(reference)
            .or_else(|| self.symbolic.get(reference))
            .copied()
    }
}
