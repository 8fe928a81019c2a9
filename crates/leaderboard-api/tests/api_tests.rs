//! Integration tests for the HTTP surface.
//!
//! Requests go through the real router via `tower::ServiceExt::oneshot`
//! against an engine backed by the in-process gateways, so no TCP socket
//! or external store is involved.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use leaderboard_api::router::build_router;
use leaderboard_api::state::AppState;
use leaderboard_core::config::{RebuildConfig, WriterConfig};
use leaderboard_core::{AlertCategory, AlertLog, AlertSeverity, Deadlines, DurableWriter, Leaderboard};
use leaderboard_db::{MemoryDurableStore, MemoryFastStore};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    fast: Arc<MemoryFastStore>,
    alerts: AlertLog,
    engine: Arc<Leaderboard>,
}

async fn make_app() -> TestApp {
    let fast = Arc::new(MemoryFastStore::new());
    let durable = Arc::new(MemoryDurableStore::new());
    let alerts = AlertLog::new();
    let shutdown = CancellationToken::new();
    let writer_config = WriterConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        max_attempts: 3,
        ..WriterConfig::default()
    };
    let writer = DurableWriter::start(durable.clone(), alerts.clone(), &writer_config, shutdown.child_token())
        .await
        .unwrap();
    let engine = Arc::new(Leaderboard::new(
        fast.clone(),
        durable,
        writer,
        Deadlines::default(),
        RebuildConfig::default(),
    ));
    let state = Arc::new(AppState::new(Arc::clone(&engine), alerts.clone(), shutdown));
    TestApp {
        router: build_router(state),
        fast,
        alerts,
        engine,
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn setup_board(app: &TestApp, body: Value) {
    let (status, _) = send(app, "POST", "/admin/tenants/game.one/provision", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(app, "POST", "/admin/leaderboards/game.one", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
}

// =========================================================================
// Game routes
// =========================================================================

#[tokio::test]
async fn test_submit_and_query_top() {
    let app = make_app().await;
    setup_board(&app, json!({"category": "weekly", "cap": 2})).await;

    for (player, score) in [("A", 100), ("B", 300), ("C", 200)] {
        let (status, json) = send(
            &app,
            "POST",
            "/api/leaderboards/game.one/weekly/scores",
            Some(json!({"playerId": player, "score": score, "extraData": {"stage": 3}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["accepted"], true);
    }

    let (status, json) = send(&app, "GET", "/api/leaderboards/game.one/weekly/top?start=1&stop=5", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["playerId"], "B");
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[1]["playerId"], "C");
    assert_eq!(rows[1]["extraData"]["stage"], 3);
    assert_eq!(rows[1]["nickname"], "");
}

#[tokio::test]
async fn test_rank_and_remove() {
    let app = make_app().await;
    setup_board(&app, json!({"category": "daily", "resetSchedule": "daily"})).await;
    send(
        &app,
        "POST",
        "/api/leaderboards/game.one/daily/scores",
        Some(json!({"playerId": "A", "score": 42})),
    )
    .await;

    let (status, json) = send(&app, "GET", "/api/leaderboards/game.one/daily/players/A", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], json!({"rank": 1, "score": 42}));

    let (_, json) = send(&app, "DELETE", "/api/leaderboards/game.one/daily/players/A", None).await;
    assert_eq!(json["data"]["removed"], true);
    let (_, json) = send(&app, "DELETE", "/api/leaderboards/game.one/daily/players/A", None).await;
    assert_eq!(json["code"], 0);
    assert_eq!(json["data"]["removed"], false);

    let (status, json) = send(&app, "GET", "/api/leaderboards/game.one/daily/players/A", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"].is_null());
}

#[tokio::test]
async fn test_unknown_leaderboard_is_404_with_code() {
    let app = make_app().await;
    let (status, json) = send(
        &app,
        "POST",
        "/api/leaderboards/game.one/missing/scores",
        Some(json!({"playerId": "A", "score": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], 1002);
    assert!(json["data"].is_null());
}

#[tokio::test]
async fn test_invalid_input_is_400() {
    let app = make_app().await;
    setup_board(&app, json!({"category": "weekly"})).await;

    let (status, json) = send(&app, "GET", "/api/leaderboards/game.one/weekly/top?start=0&stop=5", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 1008);

    let (status, json) = send(
        &app,
        "POST",
        "/api/leaderboards/game.one/weekly/scores",
        Some(json!({"playerId": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 1008);

    let (status, json) = send(&app, "GET", "/api/leaderboards/bad%20tenant/weekly/top", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 1001);
}

#[tokio::test]
async fn test_store_outage_is_503() {
    let app = make_app().await;
    setup_board(&app, json!({"category": "weekly"})).await;
    app.fast.set_offline(true);

    let (status, json) = send(&app, "GET", "/api/leaderboards/game.one/weekly/players/A", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], 1004);
}

// =========================================================================
// Admin routes
// =========================================================================

#[tokio::test]
async fn test_config_lifecycle() {
    let app = make_app().await;
    setup_board(
        &app,
        json!({"category": "speedrun", "sort": "asc", "updatePolicy": "max", "resetSchedule": "0 0 * * 1"}),
    )
    .await;

    let (status, json) = send(&app, "POST", "/admin/leaderboards/game.one", Some(json!({"category": "speedrun"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], 1010);

    let (_, json) = send(&app, "GET", "/admin/leaderboards/game.one", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["sort"], "asc");

    let (status, json) = send(
        &app,
        "PATCH",
        "/admin/leaderboards/game.one/speedrun",
        Some(json!({"enabled": false, "name": "Speedrun"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["enabled"], false);

    let (status, json) = send(
        &app,
        "POST",
        "/api/leaderboards/game.one/speedrun/scores",
        Some(json!({"playerId": "A", "score": 90})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], 1003);

    let (status, _) = send(&app, "DELETE", "/admin/leaderboards/game.one/speedrun", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/admin/leaderboards/game.one/speedrun", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_schedule_is_rejected() {
    let app = make_app().await;
    let (status, json) = send(
        &app,
        "POST",
        "/admin/leaderboards/game.one",
        Some(json!({"category": "broken", "resetSchedule": "every tuesday"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 1008);
}

#[tokio::test]
async fn test_clear_rebuild_and_entries() {
    let app = make_app().await;
    setup_board(&app, json!({"category": "weekly", "updatePolicy": "latest"})).await;
    for (player, score) in [("A", 1), ("B", 2), ("C", 3)] {
        send(
            &app,
            "POST",
            "/api/leaderboards/game.one/weekly/scores",
            Some(json!({"playerId": player, "score": score})),
        )
        .await;
    }
    app.engine.writer().flush().await.unwrap();

    let (_, json) = send(&app, "GET", "/admin/leaderboards/game.one/weekly/entries?offset=1&limit=5", None).await;
    assert_eq!(json["data"]["total"], 3);
    assert_eq!(json["data"]["rows"][0]["playerId"], "B");

    app.fast.wipe().await;
    let (status, json) = send(&app, "POST", "/admin/leaderboards/game.one/weekly/rebuild", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["restored"], 3);

    let (_, json) = send(&app, "POST", "/admin/leaderboards/game.one/weekly/clear", None).await;
    assert_eq!(json["data"]["removed"], 3);
    let (_, json) = send(&app, "GET", "/api/leaderboards/game.one/weekly/top", None).await;
    assert_eq!(json["data"], json!([]));
}

#[tokio::test]
async fn test_alerts_and_health() {
    let app = make_app().await;
    let id = app
        .alerts
        .raise(AlertSeverity::Critical, AlertCategory::DeadLetter, "parked".to_owned())
        .await;

    let (_, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["unacknowledgedAlerts"], 1);

    let (_, json) = send(&app, "GET", "/admin/alerts?limit=10", None).await;
    assert_eq!(json["data"][0]["severity"], "critical");
    assert_eq!(json["data"][0]["category"], "dead_letter");

    let (status, _) = send(&app, "POST", &format!("/admin/alerts/{id}/acknowledge"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&app, "POST", &format!("/admin/alerts/{}/acknowledge", uuid::Uuid::nil()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], 1008);

    let (_, json) = send(&app, "POST", "/admin/dead-letters/replay", None).await;
    assert_eq!(json["data"]["requeued"], 0);
}
