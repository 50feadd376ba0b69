//! In-memory backend shared by the integration tests.
#![allow(dead_code)]

use anyhow::Result;
use netassure::config::{BackoffKind, Config};
use netassure::transport::{ApiRequest, ApiResponse, Method, Transport};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync;

/// A `Transport` that answers from a closure and records every request.
pub struct MockBackend {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockBackend {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests matching `method` and `path`.
    pub fn calls(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

impl Transport for MockBackend {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}

pub fn ok(value: Value) -> Result<ApiResponse> {
    Ok(ApiResponse::json_body(200, &value))
}

pub fn status(code: u16, body: &str) -> Result<ApiResponse> {
    Ok(ApiResponse::new(code, body.as_bytes().to_vec()))
}

/// Config with no waiting between job polls.
pub fn test_config() -> Config {
    let mut config = Config::default_for("http://backend.invalid");
    config.jobs.backoff = BackoffKind::Fixed;
    config.jobs.interval_ms = 0;
    config.jobs.retry = 3;
    config
}

pub fn loaded_snapshot(id: &str, locked: bool) -> Value {
    json!({
        "id": id,
        "status": "done",
        "finishStatus": "done",
        "locked": locked,
        "loading": false,
        "name": format!("discovery {}", id),
        "totalDevCount": 10,
        "tsStart": 1_700_000_000_000i64,
        "tsEnd": 1_700_000_600_000i64,
        "sites": [{"siteName": "HQ"}],
    })
}

pub fn unloaded_snapshot(id: &str) -> Value {
    json!({
        "id": id,
        "status": "unloaded",
        "finishStatus": "done",
        "locked": false,
        "loading": false,
    })
}

/// Serve a table sweep: `total` rows, sliced by the requested window.
pub fn table_page(request: &ApiRequest, total: u64) -> Result<ApiResponse> {
    let body = request.body.clone().unwrap_or_default();
    let start = body["pagination"]["start"].as_u64().unwrap_or(0);
    let limit = body["pagination"]["limit"].as_u64().unwrap_or(0);
    let end = (start + limit).min(total);
    let rows: Vec<Value> = (start.min(end)..end).map(|i| json!({ "row": i })).collect();
    ok(json!({ "data": rows, "meta": { "count": total } }))
}
