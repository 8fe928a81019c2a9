//! Shared application state for the HTTP surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leaderboard_core::{AlertLog, Leaderboard};
use tokio_util::sync::{CancellationToken, DropGuard};

/// State shared by every handler.
pub struct AppState {
    /// The leaderboard engine.
    pub engine: Arc<Leaderboard>,
    /// Operator alert log.
    pub alerts: AlertLog,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
    /// When the server started, for the health route.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create the state for a running engine.
    pub fn new(engine: Arc<Leaderboard>, alerts: AlertLog, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            alerts,
            shutdown,
            started_at: Utc::now(),
        }
    }

    /// A cancellation token scoped to one request.
    ///
    /// The token fires when the server shuts down or when the returned
    /// guard is dropped, which happens when axum drops a handler whose
    /// client disconnected.
    pub fn request_token(&self) -> (CancellationToken, DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}
