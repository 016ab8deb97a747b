//! Client configuration
//!
//! The signaling address comes from one of three places:
//!
//! - a configuration service answering `GET` with `{"wsUrl": "..."}` on success
//!   or `{"error": "..."}` with a non-2xx status,
//! - the environment (`NEXT_PUBLIC_WS_URL`, then `WS_URL`),
//! - a fixed address given on the command line.
//!
//! A missing address is always an explicit configuration error, never a default.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::debug;

use crate::error::SessionError;
use crate::model::media::MediaConstraints;

pub const DEFAULT_CONFIG_URL: &str = "http://localhost:3000/api/ws-url";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Environment variables consulted for the signaling address, in order.
pub const WS_URL_VARS: [&str; 2] = ["NEXT_PUBLIC_WS_URL", "WS_URL"];

const MISSING_WS_URL: &str = "WS_URL not configured. Set NEXT_PUBLIC_WS_URL or WS_URL.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
    /// Ask a configuration service.
    ConfigService(String),
    /// Read `NEXT_PUBLIC_WS_URL` / `WS_URL`.
    Environment,
    Fixed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: EndpointSource,
    pub ice_servers: Vec<String>,
    /// IVF clip used as the camera. `None` means no camera is available.
    pub camera: Option<PathBuf>,
    pub constraints: MediaConstraints,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointSource::ConfigService(DEFAULT_CONFIG_URL.to_string()),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            camera: None,
            constraints: MediaConstraints::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(rename = "wsUrl")]
    ws_url: Option<String>,
    error: Option<String>,
}

impl EndpointSource {
    /// Resolve the signaling address.
    pub async fn resolve(&self, http: &reqwest::Client) -> Result<String, SessionError> {
        match self {
            EndpointSource::Fixed(url) => validate_ws_url(url),
            EndpointSource::Environment => ws_url_from_env(),
            EndpointSource::ConfigService(url) => {
                debug!("Fetching signaling endpoint from {}", url);
                let response = http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| SessionError::Transport(format!("config request failed: {e}")))?;
                let ok = response.status().is_success();
                let code = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .map_err(|e| SessionError::Transport(format!("config response unreadable: {e}")))?;
                parse_endpoint_response(ok, code, &body)
            }
        }
    }
}

/// Interpret a configuration service reply.
pub fn parse_endpoint_response(ok: bool, status: u16, body: &str) -> Result<String, SessionError> {
    let parsed: Option<EndpointResponse> = serde_json::from_str(body).ok();

    if !ok {
        let reason = parsed
            .and_then(|r| r.error)
            .unwrap_or_else(|| format!("config service returned HTTP {status}"));
        return Err(SessionError::Configuration(reason));
    }

    let url = parsed
        .and_then(|r| r.ws_url)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SessionError::Configuration("config service returned no wsUrl".to_string()))?;

    validate_ws_url(&url)
}

/// First non-empty of `NEXT_PUBLIC_WS_URL`, `WS_URL`.
pub fn ws_url_from_env() -> Result<String, SessionError> {
    let url = WS_URL_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
        .ok_or_else(|| SessionError::Configuration(MISSING_WS_URL.to_string()))?;

    validate_ws_url(url.trim())
}

fn validate_ws_url(url: &str) -> Result<String, SessionError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else {
        Err(SessionError::Configuration(format!(
            "signaling address must be ws:// or wss://, got {url:?}"
        )))
    }
}
