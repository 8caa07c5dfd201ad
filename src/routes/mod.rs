//! HTTP route handlers.

pub mod about_network;
pub mod eth_dump;
pub mod ping;

use crate::config::AppState;
use crate::error::{AppError, AppResult, DiagError};
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;

/// Value reported under the target key when a tool exceeds its bound.
pub const TIMEOUT_SENTINEL: &str = "timeout";

/// HTTP request logging middleware.
///
/// Logs each request in format: "IP METHOD PATH - STATUS"
async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!("{} {} {} - {}", peer, method, uri, status.as_u16());

    response
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/about_network/myip", get(about_network::handle_myip))
        .route("/about_network/get_interfaces", get(about_network::handle_get_interfaces))
        .route("/about_network/get_traffic", get(about_network::handle_get_traffic))
        .route("/eth_dump", get(eth_dump::handle_dump))
        .route("/eth_dump/", get(eth_dump::handle_dump))
        .route("/eth_dump/port", get(eth_dump::handle_dump_port))
        .route("/eth_dump/host", get(eth_dump::handle_dump_host))
        .route("/eth_dump/host_and_port", get(eth_dump::handle_dump_host_and_port))
        .route("/ping", post(ping::handle_ping))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

/// Unwrap query parameters, reporting malformed ones as validation errors.
fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(q)| q)
        .map_err(|e| AppError::Validation(e.body_text()))
}

/// `{ key: value }`
fn keyed(key: &str, value: impl Serialize) -> Json<Value> {
    let mut body = Map::new();
    body.insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
    Json(Value::Object(body))
}

/// Turn a service error into a response body.
///
/// Only invalid requests become HTTP errors; timeouts are reported as the
/// timeout sentinel under the target key and everything else as `{error}`.
fn degrade(err: DiagError) -> AppResult<Json<Value>> {
    match err {
        DiagError::InvalidRequest(msg) => Err(AppError::Validation(msg)),
        DiagError::Timeout { target } => Ok(keyed(&target, TIMEOUT_SENTINEL)),
        other => Ok(keyed("error", other.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_degrade_timeout_uses_target_key() {
        let Json(body) = degrade(DiagError::Timeout { target: "eth0".to_string() }).unwrap();
        assert_eq!(body, json!({ "eth0": "timeout" }));
    }

    #[test]
    fn test_degrade_tool_failure_is_error_payload() {
        let Json(body) = degrade(DiagError::ToolFailure {
            tool: "tcpdump".to_string(),
            reason: "eth9: No such device exists".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({ "error": "tcpdump failed: eth9: No such device exists" }));
    }

    #[test]
    fn test_degrade_invalid_request_is_http_error() {
        let result = degrade(DiagError::InvalidRequest("bad".to_string()));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let router = test_router("true", Arc::default());
        let (status, _) = send(router, "GET", "/eth_dump/get_traffic?strg_unit=asB").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
