//! Backend transport.
//!
//! Everything the client sends to the backend goes through the
//! [`Transport`] trait: one [`ApiRequest`] in, one [`ApiResponse`] out.
//! A transport only reports whether the exchange happened; interpreting the
//! status code is left to the caller, because a rejected table query and a
//! rejected lifecycle action mean different things.
//!
//! [`HttpTransport`] is the production implementation over a blocking
//! `reqwest` client. Paths are relative to `<base_url>/api/<api_version>/`.
//!
//! # Authentication
//!
//! The token is read once from the environment variable named by
//! `backend.token_env` and sent as `X-API-Token`. If the variable is unset
//! the requests go out unauthenticated and the backend decides.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::config::BackendConfig;

/// HTTP methods used by the backend API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        };
        f.write_str(s)
    }
}

/// One request against the backend API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API root, without a leading slash (e.g. `"snapshots/load"`).
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Raw backend response: status code plus undecoded body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a response whose body is the serialized JSON value.
    pub fn json_body(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string().into_bytes())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// The single seam between the client and the backend.
///
/// Implementations must be usable from one thread at a time at minimum;
/// `Send + Sync` lets a session move between threads.
pub trait Transport: Send + Sync {
    /// Execute one request. Returns `Err` only when no response was obtained.
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    api_root: String,
    token: Option<String>,
}

impl HttpTransport {
    /// Create a transport from the `[backend]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to build HTTP client")?;

        let api_root = format!(
            "{}/api/{}",
            config.base_url.trim_end_matches('/'),
            config.api_version.trim_matches('/')
        );
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            tracing::warn!(
                env = %config.token_env,
                "API token variable not set; requests will be unauthenticated"
            );
        }

        Ok(Self {
            client,
            api_root,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
        };
        if let Some(ref token) = self.token {
            builder = builder.header("X-API-Token", token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, %url, "sending request");
        let resp = builder
            .send()
            .with_context(|| format!("{} {} failed", request.method, url))?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .with_context(|| format!("Failed to read response body from {}", url))?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
