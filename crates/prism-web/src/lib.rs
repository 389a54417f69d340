//! Axum JSON API for PRISM: dashboard metrics, sync triggers, sync status.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prism_core::DashboardFilter;
use prism_metrics::MetricsAggregator;
use prism_sync::SyncOrchestrator;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "prism-web";

const STATUS_HISTORY_LIMIT: i64 = 5;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub metrics: Arc<MetricsAggregator>,
    pub cron_secret: String,
    pub admin_token: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        metrics: Arc<MetricsAggregator>,
        cron_secret: impl Into<String>,
        admin_token: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            metrics,
            cron_secret: cron_secret.into(),
            admin_token: admin_token.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/sync/cron", get(cron_probe_handler).post(cron_sync_handler))
        .route("/api/sync/manual", post(manual_sync_handler))
        .route("/api/sync/status", get(sync_status_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("PRISM_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving dashboard API");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DashboardFilter>,
) -> Response {
    match state.metrics.compute(&filter).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(err) => {
            error!(%err, "dashboard metrics failed");
            server_error(err.to_string())
        }
    }
}

async fn cron_probe_handler() -> Response {
    Json(json!({
        "message": "Cron sync endpoint is active",
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn cron_sync_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !bearer_authorized(&headers, &state.cron_secret) {
        return unauthorized();
    }

    info!("sync triggered by cron endpoint");
    let outcome = state.orchestrator.run_sync().await;
    if outcome.success {
        Json(json!({
            "success": true,
            "message": format!("Cron sync completed: {} rows updated", outcome.rows_updated),
            "rowsUpdated": outcome.rows_updated,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": outcome.error,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}

async fn manual_sync_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&headers, &state.admin_token) {
        return resp;
    }

    info!("manual sync triggered");
    let outcome = state.orchestrator.run_sync().await;
    if outcome.success {
        Json(json!({
            "success": true,
            "message": format!("Successfully synced {} rows", outcome.rows_updated),
            "rowsUpdated": outcome.rows_updated,
        }))
        .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": outcome.error })),
        )
            .into_response()
    }
}

async fn sync_status_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&headers, &state.admin_token) {
        return resp;
    }

    let last_sync = match state.orchestrator.last_sync_status().await {
        Ok(run) => run,
        Err(err) => return server_error(err.to_string()),
    };
    let recent_history = match state.orchestrator.sync_history(STATUS_HISTORY_LIMIT).await {
        Ok(runs) => runs,
        Err(err) => return server_error(err.to_string()),
    };
    Json(json!({
        "lastSync": last_sync,
        "recentHistory": recent_history,
    }))
    .into_response()
}

fn bearer_authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {secret}"))
        .unwrap_or(false)
}

/// Missing token is 401, a wrong one is 403.
fn require_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), Response> {
    match headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        None => Err(unauthorized()),
        Some(token) if token != admin_token => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Admin access required" })),
        )
            .into_response()),
        Some(_) => Ok(()),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

fn server_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}
