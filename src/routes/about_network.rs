//! About-network endpoint handlers.
//!
//! GET /about_network/myip
//! GET /about_network/get_interfaces
//! GET /about_network/get_traffic?interface={iface}&strg_unit={unit}&window_ms={ms}

use std::time::Duration;

use crate::config::AppState;
use crate::error::{AppError, AppResult};
use crate::routes::{degrade, keyed, parse_query};
use crate::services::traffic::{InterfaceStatsTracker, StorageUnit};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

/// Handle GET /about_network/myip
pub async fn handle_myip(State(state): State<AppState>) -> Json<Value> {
    match state.external_ip.lookup().await {
        Ok(ip) => keyed("external_ip", ip.to_string()),
        Err(e) => keyed("error", e.to_string()),
    }
}

/// Handle GET /about_network/get_interfaces
pub async fn handle_get_interfaces(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let counters = state.counters.clone();
    let names = tokio::task::spawn_blocking(move || counters.interface_names())
        .await
        .map_err(|e| AppError::Internal(format!("Interface enumeration failed: {}", e)))?;

    Ok(keyed("interfaces", names))
}

/// Query parameters for the traffic endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct TrafficQuery {
    pub interface: Option<String>,
    pub strg_unit: Option<String>,
    /// Time to wait between the baseline and the read.
    pub window_ms: Option<u64>,
}

/// Handle GET /about_network/get_traffic
///
/// Takes a baseline of the interface counters, optionally waits `window_ms`,
/// then reports the difference in the requested unit.
pub async fn handle_get_traffic(
    State(state): State<AppState>,
    query: Result<Query<TrafficQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;

    let unit = match query.strg_unit.as_deref() {
        Some(unit) => unit.parse::<StorageUnit>()?,
        None => StorageUnit::B,
    };
    let window_ms = query.window_ms.unwrap_or(0);
    if window_ms > state.config.max_window_ms {
        return Err(AppError::Validation(format!(
            "window_ms must be at most {}, got {}",
            state.config.max_window_ms, window_ms
        )));
    }
    let interface = query
        .interface
        .unwrap_or_else(|| state.config.default_interface.clone());

    tracing::debug!("Traffic request: interface={}, unit={}, window={}ms", interface, unit, window_ms);

    let counters = state.counters.clone();
    let tracker = match blocking(move || InterfaceStatsTracker::new(counters, &interface)).await? {
        Ok(tracker) => tracker,
        Err(e) => return degrade(e),
    };

    if window_ms > 0 {
        tokio::time::sleep(Duration::from_millis(window_ms)).await;
    }

    match blocking(move || tracker.read(unit)).await? {
        Ok(delta) => Ok(Json(serde_json::to_value(delta).map_err(|e| {
            AppError::Internal(format!("Failed to serialize traffic: {}", e))
        })?)),
        Err(e) => degrade(e),
    }
}

/// Run a counter read on the blocking pool.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Counter read failed: {}", e)))
}
