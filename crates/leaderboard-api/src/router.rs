//! Axum router construction.
//!
//! Game routes live under `/api`, operator routes under `/admin`. CORS is
//! open so browser-based game clients and the admin console can call the
//! service directly.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::handlers;
use crate::state::AppState;

/// Build the complete router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(admin::health))
        // Game API
        .route("/api/leaderboards/{tenant}/{category}/scores", post(handlers::submit_score))
        .route("/api/leaderboards/{tenant}/{category}/top", get(handlers::top))
        .route(
            "/api/leaderboards/{tenant}/{category}/players/{player}",
            get(handlers::rank).delete(handlers::remove),
        )
        // Admin API
        .route("/admin/tenants/{tenant}/provision", post(admin::provision_tenant))
        .route(
            "/admin/leaderboards/{tenant}",
            get(admin::list_leaderboards).post(admin::create_leaderboard),
        )
        .route(
            "/admin/leaderboards/{tenant}/{category}",
            get(admin::get_leaderboard)
                .patch(admin::update_leaderboard)
                .delete(admin::delete_leaderboard),
        )
        .route("/admin/leaderboards/{tenant}/{category}/clear", post(admin::clear_leaderboard))
        .route("/admin/leaderboards/{tenant}/{category}/rebuild", post(admin::rebuild))
        .route("/admin/leaderboards/{tenant}/{category}/entries", get(admin::entries))
        .route("/admin/dead-letters/replay", post(admin::replay_dead_letters))
        .route("/admin/alerts", get(admin::list_alerts))
        .route("/admin/alerts/{id}/acknowledge", post(admin::acknowledge_alert))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
