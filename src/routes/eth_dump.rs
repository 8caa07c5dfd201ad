//! Packet dump endpoint handlers.
//!
//! GET /eth_dump/?interface=&count_pkt=&type=&dns=
//! GET /eth_dump/port?interface=&count_pkt=&dns=&port=
//! GET /eth_dump/host?interface=&count_pkt=&type=&dns=&host=
//! GET /eth_dump/host_and_port?interface=&count_pkt=&type=&dns=&host=&port=
//!
//! Responses are `{interface: [lines]}`, or `{interface: "timeout"}` when the
//! capture exceeds the configured bound.

use crate::config::AppState;
use crate::error::{AppError, AppResult};
use crate::routes::{degrade, keyed, parse_query};
use crate::services::capture::{CaptureRequest, ProtocolFilter};
use crate::services::runner::ExecutionBound;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_COUNT: i64 = 1;
const DEFAULT_TYPE: &str = "ip";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: i64 = 443;

/// Query parameters shared by the dump endpoints.
///
/// Each endpoint reads the subset it documents.
#[derive(Debug, Deserialize, Default)]
pub struct DumpQuery {
    pub interface: Option<String>,
    pub count_pkt: Option<i64>,
    #[serde(rename = "type")]
    pub packet_type: Option<String>,
    #[serde(default)]
    pub dns: bool,
    pub host: Option<String>,
    pub port: Option<i64>,
}

impl DumpQuery {
    fn base_request(&self, state: &AppState) -> CaptureRequest {
        let interface = self
            .interface
            .clone()
            .unwrap_or_else(|| state.config.default_interface.clone());
        CaptureRequest::new(interface, self.count_pkt.unwrap_or(DEFAULT_COUNT)).with_dns(self.dns)
    }

    fn protocol(&self) -> AppResult<ProtocolFilter> {
        Ok(self.packet_type.as_deref().unwrap_or(DEFAULT_TYPE).parse()?)
    }

    fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    fn port(&self) -> AppResult<u16> {
        let port = self.port.unwrap_or(DEFAULT_PORT);
        u16::try_from(port)
            .map_err(|_| AppError::Validation(format!("port must be in 0..=65535, got {}", port)))
    }
}

/// Handle GET /eth_dump/
pub async fn handle_dump(
    State(state): State<AppState>,
    query: Result<Query<DumpQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;
    let request = query.base_request(&state).with_protocol(query.protocol()?);
    run_capture(&state, request).await
}

/// Handle GET /eth_dump/port
pub async fn handle_dump_port(
    State(state): State<AppState>,
    query: Result<Query<DumpQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;
    let request = query.base_request(&state).with_port(query.port()?);
    run_capture(&state, request).await
}

/// Handle GET /eth_dump/host
pub async fn handle_dump_host(
    State(state): State<AppState>,
    query: Result<Query<DumpQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;
    let request = query
        .base_request(&state)
        .with_protocol(query.protocol()?)
        .with_host(query.host());
    run_capture(&state, request).await
}

/// Handle GET /eth_dump/host_and_port
pub async fn handle_dump_host_and_port(
    State(state): State<AppState>,
    query: Result<Query<DumpQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;
    let request = query
        .base_request(&state)
        .with_protocol(query.protocol()?)
        .with_host(query.host())
        .with_port(query.port()?);
    run_capture(&state, request).await
}

async fn run_capture(state: &AppState, request: CaptureRequest) -> AppResult<Json<Value>> {
    let bound = ExecutionBound::with_timeout(state.config.capture_timeout);
    match state.capture.capture(&request, bound).await {
        Ok(result) => Ok(keyed(&result.interface, result.lines)),
        Err(e) => degrade(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    /// Prints the tool argv after the wrapper, one token per line.
    const ARGV_SCRIPT: &str = r#"for a in "$@"; do printf '%s\n' "$a"; done"#;

    #[tokio::test]
    async fn test_dump_defaults() {
        let router = test_router(ARGV_SCRIPT, Arc::default());
        let (status, body) = send(router, "GET", "/eth_dump/?interface=eth0").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "eth0": ["-i", "eth0", "-l", "-c", "1", "-t", "-n", "ip"] }));
    }

    #[tokio::test]
    async fn test_dump_without_trailing_slash() {
        let router = test_router(ARGV_SCRIPT, Arc::default());
        let (status, body) = send(router, "GET", "/eth_dump?interface=eth0&type=udp&dns=true&count_pkt=4").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "eth0": ["-i", "eth0", "-l", "-c", "4", "-t", "udp"] }));
    }

    #[tokio::test]
    async fn test_dump_port_defaults_to_443() {
        let router = test_router(ARGV_SCRIPT, Arc::default());
        let (_, body) = send(router, "GET", "/eth_dump/port?interface=eth1").await;
        assert_eq!(body, json!({ "eth1": ["-i", "eth1", "-l", "-c", "1", "-t", "-n", "port", "443"] }));
    }

    #[tokio::test]
    async fn test_dump_host_and_port() {
        let router = test_router(ARGV_SCRIPT, Arc::default());
        let (_, body) = send(
            router,
            "GET",
            "/eth_dump/host_and_port?interface=eth0&type=tcp&host=10.0.0.5&port=22",
        )
        .await;
        assert_eq!(
            body,
            json!({ "eth0": ["-i", "eth0", "-l", "-c", "1", "-t", "-n", "tcp", "and", "host", "10.0.0.5", "and", "port", "22"] })
        );
    }

    #[tokio::test]
    async fn test_dump_host_defaults_to_localhost() {
        let router = test_router(ARGV_SCRIPT, Arc::default());
        let (_, body) = send(router, "GET", "/eth_dump/host?interface=eth0").await;
        let lines = body["eth0"].as_array().unwrap();
        assert_eq!(lines[lines.len() - 2], "host");
        assert_eq!(lines[lines.len() - 1], "localhost");
    }

    #[tokio::test]
    async fn test_dump_timeout_sentinel() {
        let router = test_router("sleep 5", Arc::default());
        let (status, body) = send(router, "GET", "/eth_dump/port?interface=eth0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "eth0": "timeout" }));
    }

    #[tokio::test]
    async fn test_dump_tool_failure() {
        let router = test_router("echo 'permission denied' >&2; exit 1", Arc::default());
        let (status, body) = send(router, "GET", "/eth_dump/?interface=eth0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "error": "tcpdump failed: permission denied" }));
    }

    #[tokio::test]
    async fn test_dump_validation_errors() {
        for uri in [
            "/eth_dump/?interface=eth0&count_pkt=0",
            "/eth_dump/?interface=eth0&count_pkt=-5",
            "/eth_dump/?interface=eth0&count_pkt=1000",
            "/eth_dump/?interface=eth0&count_pkt=abc",
            "/eth_dump/?interface=eth0&type=ip%20or%20tcp",
            "/eth_dump/?interface=-w",
            "/eth_dump/port?interface=eth0&port=70000",
            "/eth_dump/host?interface=eth0&host=-c",
        ] {
            let router = test_router(ARGV_SCRIPT, Arc::default());
            let (status, _) = send(router, "GET", uri).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "uri: {}", uri);
        }
    }
}
