//! REST routes for viewers and external collectors.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::Error;
use crate::query::QueryService;
use crate::state::AppState;
use crate::types::IngestRequest;
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/processes", get(processes))
        .route("/api/network", get(network))
        .route("/api/alerts", get(alerts))
        .route("/api/system-stats", get(system_stats))
        .route("/api/dashboard", get(dashboard))
        .route("/api/samples", post(ingest))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Aggregation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type Params = Query<HashMap<String, String>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

fn int_param(q: &HashMap<String, String>, key: &str) -> Result<Option<i64>, Error> {
    q.get(key)
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidInput(format!("{key} must be an integer, got {v:?}")))
        })
        .transpose()
}

fn flag_param(q: &HashMap<String, String>, key: &str) -> Result<bool, Error> {
    match q.get(key).map(String::as_str) {
        None | Some("false") | Some("0") => Ok(false),
        Some("") | Some("true") | Some("1") => Ok(true),
        Some(other) => Err(Error::InvalidInput(format!(
            "{key} must be true or false, got {other:?}"
        ))),
    }
}

/// The shared query service, or a copy bounded by the caller's `timeout_ms`.
fn query_for(state: &AppState, q: &HashMap<String, String>) -> Result<QueryService, Error> {
    match int_param(q, "timeout_ms")? {
        None => Ok(state.query.clone()),
        Some(ms) if ms > 0 => Ok(state.query.with_timeout(Duration::from_millis(ms as u64))),
        Some(ms) => Err(Error::InvalidInput(format!(
            "timeout_ms must be positive, got {ms}"
        ))),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "viewers": state.client_count.load(Ordering::Relaxed),
        "subscribers": state.broadcaster.subscriber_count(),
    }))
}

async fn processes(State(state): State<AppState>, Query(q): Params) -> ApiResult<impl Serialize> {
    let query = query_for(&state, &q)?;
    let rows = query
        .processes(int_param(&q, "limit")?, flag_param(&q, "dedup")?)
        .await?;
    Ok(Json(rows))
}

async fn network(State(state): State<AppState>, Query(q): Params) -> ApiResult<impl Serialize> {
    let query = query_for(&state, &q)?;
    let rows = query
        .connections(int_param(&q, "limit")?, flag_param(&q, "dedup")?)
        .await?;
    Ok(Json(rows))
}

async fn alerts(State(state): State<AppState>, Query(q): Params) -> ApiResult<impl Serialize> {
    let query = query_for(&state, &q)?;
    Ok(Json(query.alerts(int_param(&q, "limit")?).await?))
}

async fn system_stats(
    State(state): State<AppState>,
    Query(q): Params,
) -> ApiResult<impl Serialize> {
    let query = query_for(&state, &q)?;
    Ok(Json(query.system_stats_history(int_param(&q, "limit")?).await?))
}

async fn dashboard(State(state): State<AppState>, Query(q): Params) -> ApiResult<impl Serialize> {
    let query = query_for(&state, &q)?;
    Ok(Json(query.dashboard().await?))
}

/// Ingest endpoint for probes running outside the agent.
async fn ingest(
    State(state): State<AppState>,
    Query(q): Params,
    body: Result<Json<IngestRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if !state.authorized(q.get("token")) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return ApiError(Error::InvalidInput(rejection.body_text())).into_response();
        }
    };
    let pipeline = state.pipeline.clone();
    let joined =
        tokio::task::spawn_blocking(move || pipeline.ingest(req.sample, req.observed_at)).await;
    let report = match joined {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => return ApiError(e).into_response(),
        Err(e) => {
            return ApiError(Error::StorageUnavailable(format!("ingest aborted: {e}")))
                .into_response()
        }
    };
    let failures: Vec<String> = report.rule_failures.iter().map(|f| f.to_string()).collect();
    (
        StatusCode::CREATED,
        Json(json!({
            "record": report.record,
            "alerts": report.alerts,
            "rule_failures": failures,
        })),
    )
        .into_response()
}
