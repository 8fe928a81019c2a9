//! Game-facing endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/leaderboards/{tenant}/{category}/scores` | Submit a score |
//! | `GET` | `/api/leaderboards/{tenant}/{category}/top` | Ranked window with profiles |
//! | `GET` | `/api/leaderboards/{tenant}/{category}/players/{player}` | One player's rank |
//! | `DELETE` | `/api/leaderboards/{tenant}/{category}/players/{player}` | Remove a player |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Envelope};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for score submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Submitting player.
    pub player_id: String,
    /// Proposed score.
    pub score: i64,
    /// Optional game-specific fields stored with the entry.
    #[serde(default)]
    pub extra_data: Option<Value>,
}

/// Query parameters for the top window. Ranks are 1-based and inclusive.
#[derive(Debug, Deserialize)]
pub struct TopQuery {
    /// First rank (default 1).
    #[serde(default = "default_start")]
    pub start: u64,
    /// Last rank (default 10).
    #[serde(default = "default_stop")]
    pub stop: u64,
}

const fn default_start() -> u64 {
    1
}

const fn default_stop() -> u64 {
    10
}

/// Response body for player removal.
#[derive(Debug, Serialize)]
struct RemoveResponse {
    removed: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Submit a score under the leaderboard's update policy.
pub async fn submit_score(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let Json(req) = body?;
    let (cancel, _guard) = state.request_token();

    let result = state
        .engine
        .submit_score(&tenant, &category, &req.player_id, req.score, req.extra_data, Utc::now(), &cancel)
        .await?;
    Ok(Envelope::ok(result))
}

/// Entries in the requested rank window.
pub async fn top(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<TopQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category)) = path?;
    let Query(window) = query?;
    let (cancel, _guard) = state.request_token();

    let views = state
        .engine
        .top(&tenant, &category, window.start, window.stop, &cancel)
        .await?;
    Ok(Envelope::ok(views))
}

/// A player's rank and score; `data` is `null` when the player has no entry.
pub async fn rank(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category, player)) = path?;
    let (cancel, _guard) = state.request_token();

    let info = state.engine.rank_of(&tenant, &category, &player, &cancel).await?;
    Ok(Envelope::ok(info))
}

/// Remove a player's entry. Succeeds when the player is already absent.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String, String)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((tenant, category, player)) = path?;
    let (cancel, _guard) = state.request_token();

    let removed = state.engine.remove(&tenant, &category, &player, &cancel).await?;
    Ok(Envelope::ok(RemoveResponse { removed }))
}
