//! Ping endpoint handler.
//!
//! POST /ping?res={target}&count_pkt={n}
//! Returns the reachability tool's output keyed by the normalized host.

use crate::config::AppState;
use crate::error::AppResult;
use crate::routes::{degrade, keyed, parse_query};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_TARGET: &str = "8.8.8.8";

/// Query parameters for the ping endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct PingQuery {
    pub res: Option<String>,
    pub count_pkt: Option<i64>,
}

/// Handle POST /ping
pub async fn handle_ping(
    State(state): State<AppState>,
    query: Result<Query<PingQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let query = parse_query(query)?;
    let target = query.res.as_deref().unwrap_or(DEFAULT_TARGET);
    let count = query.count_pkt.unwrap_or(1);

    match state.probe.probe(target, count).await {
        Ok(result) => Ok(keyed(&result.normalized_target, result.lines)),
        Err(e) => degrade(e),
    }
}
