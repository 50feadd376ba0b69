//! Table queries and pagination.
//!
//! A [`Query`] describes one bulk fetch against a table endpoint. The
//! [`QueryEngine`] turns it into backend requests:
//!
//! - [`fetch_page`](QueryEngine::fetch_page): exactly one request for one
//!   `(start, limit)` window.
//! - [`fetch_all`](QueryEngine::fetch_all): a sequential sweep over every page
//!   until the most recently reported total is reached.
//! - [`count`](QueryEngine::count): a one-row page, reading only the total.
//! - [`discover_columns`](QueryEngine::discover_columns): provokes a validation
//!   error and reads the valid column names out of it.
//!
//! # Wire format
//!
//! ```text
//! POST <endpoint>
//! {"columns": [...], "filters": {...}, "sort": {...}, "snapshot": "<id>",
//!  "pagination": {"start": 0, "limit": 1000}, "reports": "..."}
//! → {"data": [...], "meta": {"count": N}}
//! ```

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::QueryConfig;
use crate::error::{ClientError, Result};
use crate::models::Page;
use crate::transport::{ApiRequest, Transport};

/// Columns requested by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Columns {
    Named(Vec<String>),
    /// Ask the backend which columns exist and request all of them.
    Discover,
}

/// How a query is tied to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotBinding {
    /// The endpoint is not snapshot-scoped; no `snapshot` field is sent.
    Unscoped,
    /// Snapshot-scoped, to be bound to the session's active snapshot.
    Active,
    /// Snapshot-scoped, bound to a concrete snapshot id.
    Explicit(String),
}

/// One bulk-fetch request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub endpoint: String,
    pub columns: Columns,
    pub filters: Option<Value>,
    pub sort: Option<Value>,
    pub reports: Option<String>,
    pub snapshot: SnapshotBinding,
    /// Window used by [`QueryEngine::fetch_window`].
    pub start: u64,
    pub limit: u64,
}

impl Query {
    /// Snapshot-scoped query with discovered columns, awaiting a snapshot binding.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_start_matches('/').to_string(),
            columns: Columns::Discover,
            filters: None,
            sort: None,
            reports: None,
            snapshot: SnapshotBinding::Active,
            start: 0,
            limit: 1000,
        }
    }

    /// Query against an endpoint that is not snapshot-scoped.
    pub fn unscoped(endpoint: impl Into<String>) -> Self {
        Self {
            snapshot: SnapshotBinding::Unscoped,
            ..Self::new(endpoint)
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Columns::Named(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn reports(mut self, reports: impl Into<String>) -> Self {
        self.reports = Some(reports.into());
        self
    }

    pub fn snapshot(mut self, id: impl Into<String>) -> Self {
        self.snapshot = SnapshotBinding::Explicit(id.into());
        self
    }

    pub fn window(mut self, start: u64, limit: u64) -> Self {
        self.start = start;
        self.limit = limit;
        self
    }

    /// Snapshot id to send, or `NoActiveSnapshot` for an unbound scoped query.
    fn snapshot_id(&self) -> Result<Option<&str>> {
        match &self.snapshot {
            SnapshotBinding::Unscoped => Ok(None),
            SnapshotBinding::Explicit(id) => Ok(Some(id)),
            SnapshotBinding::Active => Err(ClientError::NoActiveSnapshot {
                endpoint: self.endpoint.clone(),
            }),
        }
    }

    fn body(&self, columns: &[String], start: u64, limit: u64) -> Result<Value> {
        let mut body = Map::new();
        body.insert("columns".into(), json!(columns));
        if let Some(ref filters) = self.filters {
            body.insert("filters".into(), filters.clone());
        }
        if let Some(ref sort) = self.sort {
            body.insert("sort".into(), sort.clone());
        }
        if let Some(id) = self.snapshot_id()? {
            body.insert("snapshot".into(), json!(id));
        }
        if let Some(ref reports) = self.reports {
            body.insert("reports".into(), json!(reports));
        }
        body.insert(
            "pagination".into(),
            json!({ "start": start, "limit": limit }),
        );
        Ok(Value::Object(body))
    }
}

/// Executes [`Query`]s against a [`Transport`].
pub struct QueryEngine {
    transport: Arc<dyn Transport>,
    page_size: u64,
    max_stalled_pages: u32,
    columns_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl QueryEngine {
    pub fn new(transport: Arc<dyn Transport>, config: &QueryConfig) -> Self {
        Self {
            transport,
            page_size: config.page_size.max(1),
            max_stalled_pages: config.max_stalled_pages.max(1),
            columns_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetch one page of `query` for the window `(start, limit)`.
    ///
    /// # Errors
    ///
    /// - `NoActiveSnapshot` if the query is snapshot-scoped but unbound.
    /// - `QueryRejected` on any non-success status, with the backend body verbatim.
    /// - `BackendUnavailable` if the request could not be made.
    pub fn fetch_page(&self, query: &Query, start: u64, limit: u64) -> Result<Page> {
        query.snapshot_id()?;
        let columns = self.resolve_columns(query)?;
        self.fetch_page_with(query, &columns, start, limit)
    }

    /// Fetch the page described by the query's own window.
    pub fn fetch_window(&self, query: &Query) -> Result<Page> {
        self.fetch_page(query, query.start, query.limit)
    }

    /// Fetch every matching row, in page order.
    ///
    /// Pages of `page_size` rows are requested sequentially; the loop stops
    /// once `start` reaches the total reported by the latest page. A run of
    /// `max_stalled_pages` empty pages while that total is still ahead
    /// fails with `PaginationStalled`.
    pub fn fetch_all(&self, query: &Query) -> Result<Vec<Value>> {
        query.snapshot_id()?;
        let columns = self.resolve_columns(query)?;

        let mut rows = Vec::new();
        let mut start = 0u64;
        let mut stalled = 0u32;
        let mut pages = 0u64;

        loop {
            let page = self.fetch_page_with(query, &columns, start, self.page_size)?;
            pages += 1;
            let received = page.rows.len();
            rows.extend(page.rows);
            start += self.page_size;

            tracing::debug!(
                endpoint = %query.endpoint,
                page = pages,
                received,
                total = page.total,
                "fetched page"
            );

            if start >= page.total {
                break;
            }

            if received == 0 {
                stalled += 1;
                if stalled >= self.max_stalled_pages {
                    return Err(ClientError::PaginationStalled {
                        endpoint: query.endpoint.clone(),
                        start,
                        total: page.total,
                        pages: stalled,
                    });
                }
            } else {
                stalled = 0;
            }
        }

        Ok(rows)
    }

    /// Number of rows matching `query`, without transferring them.
    pub fn count(&self, query: &Query) -> Result<u64> {
        Ok(self.fetch_page(query, 0, 1)?.total)
    }

    /// Valid column names for `endpoint`, cached after the first probe.
    ///
    /// Sends the sentinel column list `["*"]`, which the backend rejects with
    /// a validation error naming the columns it accepts.
    pub fn discover_columns(&self, endpoint: &str) -> Result<Vec<String>> {
        self.discover_columns_on(endpoint, None)
    }

    /// Like [`discover_columns`](Self::discover_columns), but the probe names
    /// `snapshot` so snapshot-scoped tables get as far as column validation.
    pub fn discover_columns_on(&self, endpoint: &str, snapshot: Option<&str>) -> Result<Vec<String>> {
        let endpoint = endpoint.trim_start_matches('/');
        if let Some(cols) = self.cached_columns(endpoint) {
            return Ok(cols);
        }

        let mut body = json!({
            "columns": ["*"],
            "pagination": { "start": 0, "limit": 1 },
        });
        if let Some(id) = snapshot {
            body["snapshot"] = json!(id);
        }
        let resp = self
            .transport
            .execute(&ApiRequest::post(endpoint, body))
            .map_err(|e| {
                ClientError::unavailable(format!("column discovery on {}", endpoint), format!("{:#}", e))
            })?;

        if resp.is_success() {
            return Err(ClientError::SchemaDiscoveryFailed {
                endpoint: endpoint.to_string(),
                reason: format!("backend accepted the sentinel columns (HTTP {})", resp.status),
            });
        }

        let columns = parse_column_listing(&resp.text()).ok_or_else(|| {
            ClientError::SchemaDiscoveryFailed {
                endpoint: endpoint.to_string(),
                reason: format!(
                    "unexpected error shape (HTTP {}): {}",
                    resp.status,
                    resp.text().chars().take(300).collect::<String>()
                ),
            }
        })?;

        tracing::debug!(endpoint, count = columns.len(), "discovered columns");
        if let Ok(mut cache) = self.columns_cache.lock() {
            cache.insert(endpoint.to_string(), columns.clone());
        }
        Ok(columns)
    }

    fn cached_columns(&self, endpoint: &str) -> Option<Vec<String>> {
        self.columns_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(endpoint).cloned())
    }

    fn resolve_columns(&self, query: &Query) -> Result<Vec<String>> {
        match &query.columns {
            Columns::Named(cols) => Ok(cols.clone()),
            Columns::Discover => self.discover_columns_on(&query.endpoint, query.snapshot_id()?),
        }
    }

    fn fetch_page_with(
        &self,
        query: &Query,
        columns: &[String],
        start: u64,
        limit: u64,
    ) -> Result<Page> {
        let body = query.body(columns, start, limit)?;
        let resp = self
            .transport
            .execute(&ApiRequest::post(query.endpoint.clone(), body))
            .map_err(|e| {
                ClientError::unavailable(format!("query on {}", query.endpoint), format!("{:#}", e))
            })?;

        if !resp.is_success() {
            return Err(ClientError::QueryRejected {
                endpoint: query.endpoint.clone(),
                status: resp.status,
                message: resp.text(),
            });
        }

        let value: Value = resp
            .json()
            .map_err(|e| ClientError::payload(format!("query on {}", query.endpoint), e))?;
        Page::from_value(&value)
            .map_err(|e| ClientError::payload(format!("query on {}", query.endpoint), e))
    }
}

/// Extract column names from a column validation error.
///
/// The backend reports an unknown column as
/// `{"errors": [{"field": "columns[0]", "message": "\"columns[0]\" must be one of [id, hostname, siteName]"}]}`.
/// Returns `None` when the text does not have that shape. This is the only
/// place that knows the format.
pub fn parse_column_listing(error_body: &str) -> Option<Vec<String>> {
    const MARKER: &str = "must be one of";

    let messages: Vec<String> = match serde_json::from_str::<Value>(error_body) {
        Ok(v) => v
            .get("errors")
            .and_then(|e| e.as_array())
            .map(|errs| {
                errs.iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(_) => vec![error_body.to_string()],
    };

    messages.iter().find_map(|message| {
        let after = &message[message.find(MARKER)? + MARKER.len()..];
        let open = after.find('[')?;
        let close = after[open..].find(']')? + open;
        let columns: Vec<String> = after[open + 1..close]
            .split(',')
            .map(|c| c.trim().trim_matches('"').trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            None
        } else {
            Some(columns)
        }
    })
}
