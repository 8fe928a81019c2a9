//! Operator endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/admin/tenants/{tenant}/provision` | Create tenant tables |
//! | `GET` | `/admin/leaderboards/{tenant}` | List configurations |
//! | `POST` | `/admin/leaderboards/{tenant}` | Create a leaderboard |
//! | `GET` | `/admin/leaderboards/{tenant}/{category}` | Stored configuration |
//! | `PATCH` | `/admin/leaderboards/{tenant}/{category}` | Partial update |
//! | `DELETE` | `/admin/leaderboards/{tenant}/{category}` | Delete a leaderboard |
//! | `POST` | `/admin/leaderboards/{tenant}/{category}/clear` | Empty both stores |
//! | `POST` | `/admin/leaderboards/{tenant}/{category}/rebuild` | Reload the fast store |
//! | `GET` | `/admin/leaderboards/{tenant}/{category}/entries` | Durable rows, paged |
//! | `POST` | `/admin/dead-letters/replay` | Requeue parked writes |
//! | `GET` | `/admin/alerts` | Recent alerts |
//! | `POST` | `/admin/alerts/{id}/acknowledge` | Acknowledge an alert |
//! | `GET` | `/health` | Liveness |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use leaderboard_types::{ConfigPatch, NewLeaderboard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, Envelope};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query parameters for the durable entries page.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Rows to skip (default 0).
    #[serde(default)]
    pub offset: u64,
    /// Page size (default 50).
    #[serde(default = "default_limit")]
    pub limit: u64,
}

const fn default_limit() -> u64 {
    50
}

/// Query parameters for the alert list.
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Maximum alerts to return, newest first (default 100).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TenantResponse {
    tenant: String,
    safe_id: String,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    removed: u64,
}

#[derive(Debug, Serialize)]
struct ReplayResponse {
    requeued: u64,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    acknowledged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: i64,
    writes_in_flight: usize,
    unacknowledged_alerts: usize,
}

// ---------------------------------------------------------------------------
// Tenants and configurations
// ---------------------------------------------------------------------------

/// Create the per-tenant tables. Safe to repeat.
pub async fn provision_tenant(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(tenant) = path?;
    let (cancel, _guard) = state.request_token();
    let id = state.engine.provision_tenant(&tenant, &cancel).await?;
    tracing::info!(tenant = id.as_str(), safe_id = id.safe_id(), "Provisioned tenant");
    Ok(Envelope::ok(TenantResponse {
        tenant: id.as_str().to_owned(),
        safe_id: id.safe_id().to_owned(),
    }))
}

/// Every leaderboard configured for a tenant.
pub async fn list_leaderboards(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(tenant) = path?;
    let (cancel, _guard) = state.request_token();
    let configs = state.engine.list_leaderboards(&tenant, &cancel).await?;
    Ok(Envelope::ok(configs))
}

/// Create a leaderboard.
pub async fn create_leaderboard(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<NewLeaderboard>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(tenant) = path?;
    let Json(request) = body?;
    let (cancel, _guard) = state.request_token();
    let config = state
        .engine
        .create_leaderboard(&tenant, request, Utc::now(), &cancel)
        .await?;
    Ok(Envelope::ok(config))
}

/// The stored configuration of one leaderboard.
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let (cancel, _guard) = state.request_token();
    let config = state.engine.get_leaderboard(&tenant, &category, &cancel).await?;
    Ok(Envelope::ok(config))
}

/// Apply a partial configuration update.
pub async fn update_leaderboard(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Result<Json<ConfigPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let Json(patch) = body?;
    let (cancel, _guard) = state.request_token();
    let config = state
        .engine
        .update_leaderboard(&tenant, &category, patch, Utc::now(), &cancel)
        .await?;
    Ok(Envelope::ok(config))
}

/// Delete a leaderboard and its entries.
pub async fn delete_leaderboard(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let (cancel, _guard) = state.request_token();
    state.engine.delete_leaderboard(&tenant, &category, &cancel).await?;
    Ok(Envelope::ok(()))
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Empty a leaderboard in both stores.
pub async fn clear_leaderboard(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let (cancel, _guard) = state.request_token();
    let removed = state.engine.clear(&tenant, &category, &cancel).await?;
    Ok(Envelope::ok(ClearResponse { removed }))
}

/// Reload the fast store from the durable store.
pub async fn rebuild(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let (cancel, _guard) = state.request_token();
    let report = state
        .engine
        .rebuild_from_durable(&tenant, &category, &cancel)
        .await?;
    Ok(Envelope::ok(report))
}

/// One page of durable rows in rank order.
pub async fn entries(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let Query(page) = query?;
    let (cancel, _guard) = state.request_token();
    let rows = state
        .engine
        .page_durable(&tenant, &category, page.offset, page.limit, &cancel)
        .await?;
    Ok(Envelope::ok(rows))
}

/// Move every parked durable write back to the queue.
pub async fn replay_dead_letters(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let requeued = state.engine.replay_dead_letters().await?;
    Ok(Envelope::ok(ReplayResponse { requeued }))
}

// ---------------------------------------------------------------------------
// Alerts and health
// ---------------------------------------------------------------------------

/// Recent operator alerts, newest first.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AlertsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(q) = query?;
    let alerts = state.alerts.recent(q.limit.unwrap_or(100)).await;
    Ok(Envelope::ok(alerts))
}

/// Mark an alert as handled.
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = path?;
    if !state.alerts.acknowledge(id).await {
        return Err(ApiError::UnknownAlert(id));
    }
    Ok(Envelope::ok(AckResponse { acknowledged: true }))
}

/// Liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Envelope::ok(HealthResponse {
        status: "ok",
        uptime_secs: uptime.num_seconds(),
        writes_in_flight: state.engine.writer().in_flight(),
        unacknowledged_alerts: state.alerts.unacknowledged().await,
    })
}
