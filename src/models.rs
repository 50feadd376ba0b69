//! Records exchanged with the backend.
//!
//! Payloads are parsed into explicit types at the boundary. Required fields
//! are enforced by serde; anything the backend sends that these types do not
//! name is kept in an `extra` map so newer backend versions lose nothing.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Backend status value for a finished (and, for snapshots, loaded) state.
pub const STATUS_DONE: &str = "done";
/// Snapshot status after a successful unload.
pub const STATUS_UNLOADED: &str = "unloaded";

/// One error category reported by a discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotErrorCount {
    pub error_type: String,
    #[serde(default)]
    pub count: u64,
}

/// One discovery/collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    id: String,
    pub status: String,
    #[serde(default)]
    pub finish_status: String,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub from_archive: bool,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub creator_username: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub initial_version: Option<String>,

    /// Epoch milliseconds.
    #[serde(default, rename = "tsStart")]
    pub start: Option<i64>,
    #[serde(default, rename = "tsEnd")]
    pub end: Option<i64>,
    #[serde(default, rename = "tsChange")]
    pub change: Option<i64>,

    #[serde(default)]
    pub total_dev_count: u64,
    #[serde(default)]
    pub licensed_dev_count: u64,
    #[serde(default)]
    pub user_count: u64,
    #[serde(default)]
    pub interface_count: u64,
    #[serde(default)]
    pub interface_active_count: u64,
    #[serde(default)]
    pub interface_edge_count: u64,
    #[serde(default)]
    pub device_added_count: u64,
    #[serde(default)]
    pub device_removed_count: u64,

    #[serde(default, deserialize_with = "site_names")]
    pub sites: Vec<String>,
    #[serde(default)]
    pub errors: Vec<SnapshotErrorCount>,

    #[serde(default)]
    pub loaded_size: u64,
    #[serde(default)]
    pub unloaded_size: u64,

    #[serde(default)]
    pub disabled_graph_cache: Option<bool>,
    #[serde(default)]
    pub disabled_historical_data: Option<bool>,
    #[serde(default)]
    pub disabled_intent_verification: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// Minimal record, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            finish_status: String::new(),
            loading: false,
            locked: false,
            from_archive: false,
            name: None,
            note: None,
            creator_username: None,
            version: None,
            initial_version: None,
            start: None,
            end: None,
            change: None,
            total_dev_count: 0,
            licensed_dev_count: 0,
            user_count: 0,
            interface_count: 0,
            interface_active_count: 0,
            interface_edge_count: 0,
            device_added_count: 0,
            device_removed_count: 0,
            sites: Vec::new(),
            errors: Vec::new(),
            loaded_size: 0,
            unloaded_size: 0,
            disabled_graph_cache: None,
            disabled_historical_data: None,
            disabled_intent_verification: None,
            extra: Map::new(),
        }
    }

    /// Parse one backend snapshot record.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn loaded(&self) -> bool {
        self.status == STATUS_DONE && self.finish_status == STATUS_DONE
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start.and_then(millis_to_utc)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end.and_then(millis_to_utc)
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.change.and_then(millis_to_utc)
    }

    /// Cached feature flags, if they have been fetched since load.
    pub fn feature_flags(&self) -> Option<FeatureFlags> {
        Some(FeatureFlags {
            graph_cache_disabled: self.disabled_graph_cache?,
            historical_data_disabled: self.disabled_historical_data?,
            intent_verification_disabled: self.disabled_intent_verification?,
        })
    }

    pub(crate) fn set_feature_flags(&mut self, flags: FeatureFlags) {
        self.disabled_graph_cache = Some(flags.graph_cache_disabled);
        self.disabled_historical_data = Some(flags.historical_data_disabled);
        self.disabled_intent_verification = Some(flags.intent_verification_disabled);
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.status = STATUS_DONE.to_string();
        self.finish_status = STATUS_DONE.to_string();
        self.loading = false;
    }

    pub(crate) fn mark_unloaded(&mut self) {
        self.status = STATUS_UNLOADED.to_string();
        self.loading = false;
    }
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Sites arrive either as plain names or as objects carrying `siteName`.
fn site_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|site| match site {
            Value::String(s) => Some(s),
            Value::Object(mut obj) => match obj.remove("siteName") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        })
        .collect())
}

/// Post-discovery actions that can be switched off per snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub graph_cache_disabled: bool,
    pub historical_data_disabled: bool,
    pub intent_verification_disabled: bool,
}

const GRAPH_CACHE: &str = "graphCache";
const HISTORICAL_DATA: &str = "historicalData";
const INTENT_VERIFICATION: &str = "intentVerification";

impl FeatureFlags {
    /// Read flags from a settings document (`disabledPostDiscoveryActions`).
    ///
    /// A settings document without the array means nothing is disabled.
    pub fn from_settings(settings: &Value) -> Result<Self, String> {
        let actions = match settings.get("disabledPostDiscoveryActions") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(a)) => a,
            Some(other) => {
                return Err(format!(
                    "disabledPostDiscoveryActions is not an array: {}",
                    other
                ))
            }
        };
        let has = |name: &str| actions.iter().any(|a| a.as_str() == Some(name));
        Ok(Self {
            graph_cache_disabled: has(GRAPH_CACHE),
            historical_data_disabled: has(HISTORICAL_DATA),
            intent_verification_disabled: has(INTENT_VERIFICATION),
        })
    }

    /// Wire form: the list of disabled action names.
    pub fn disabled_actions(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.graph_cache_disabled {
            out.push(GRAPH_CACHE);
        }
        if self.historical_data_disabled {
            out.push(HISTORICAL_DATA);
        }
        if self.intent_verification_disabled {
            out.push(INTENT_VERIFICATION);
        }
        out
    }
}

/// One page of a table query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Value>,
    /// Total matching rows as reported by the backend (`meta.count`).
    pub total: u64,
}

impl Page {
    /// Parse a `{data: [...], meta: {count}}` response body.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let rows = value
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| "missing data array".to_string())?
            .clone();
        let total = value
            .get("meta")
            .and_then(|m| m.get("count"))
            .and_then(|c| c.as_u64())
            .ok_or_else(|| "missing meta.count".to_string())?;
        Ok(Self { rows, total })
    }
}

/// A backend job record from the jobs table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncJob {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub job_detail: Option<i64>,
    #[serde(default)]
    pub download_file: Option<String>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AsyncJob {
    /// Job ids are numeric strings; higher means more recently created.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    pub fn is_done(&self) -> bool {
        self.status.as_deref() == Some(STATUS_DONE)
    }

    /// Terminal states other than success.
    pub fn has_failed(&self) -> bool {
        matches!(self.status.as_deref(), Some("failed") | Some("aborted"))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// A snapshot archive written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedArtifact {
    pub snapshot: String,
    pub job: String,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
}
