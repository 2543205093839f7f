//! Integration tests for the HTTP API

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;
use wayfarer_enrich::db::{cities, enrichment_logs};
use wayfarer_enrich::services::{ContentSource, SqliteLockStore, StaleLockSweeper};
use wayfarer_enrich::{build_router, AppState};

async fn create_test_app(source: Arc<dyn ContentSource>) -> (Router, SqlitePool, TempDir) {
    let (dir, pool) = create_test_db().await;
    let orchestrator = build_orchestrator(&pool, source);
    let sweeper = Arc::new(StaleLockSweeper::new(
        Arc::new(SqliteLockStore::new(pool.clone())),
        Duration::from_secs(600),
    ));

    let state = AppState::new(pool.clone(), orchestrator, sweeper);
    (build_router(state), pool, dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pool, _dir) = create_test_app(ScriptedSource::page(PARIS_PAGE)).await;

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "wayfarer-enrich");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_unknown_city_is_404_envelope() {
    let (app, _pool, _dir) = create_test_app(ScriptedSource::page(PARIS_PAGE)).await;

    let (status, body) = send(&app, get("/cities/atlantis")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["error"]["message"].as_str().unwrap().contains("atlantis"));

    let (status, _) = send(&app, post("/cities/atlantis/enrich")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_city_visit_records_visit_and_triggers_enrichment() {
    let source = ScriptedSource::page(PARIS_PAGE);
    let (app, pool, _dir) = create_test_app(source.clone()).await;
    seed_city(&pool, "paris", "Paris", "France").await;

    let request = Request::builder()
        .uri("/cities/paris")
        .header("x-visitor-id", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "paris");
    assert_eq!(body["name"], "Paris");
    assert_eq!(body["isEnriched"], false);
    assert_eq!(body["enrichmentTriggered"], true);

    let visits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM city_visits WHERE city_id = 'paris'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(visits, 1);

    let mut enriched = false;
    for _ in 0..50 {
        let city = cities::get_city(&pool, "paris").await.unwrap().unwrap();
        if city.is_enriched && city.enrichment_lock.is_none() {
            enriched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(enriched, "visit-triggered enrichment did not complete");

    let (_, body) = send(&app, get("/cities/paris")).await;
    assert_eq!(body["isEnriched"], true);
    assert_eq!(body["enrichmentTriggered"], false);
    assert!(body["enrichedFields"]["description"].is_string());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_manual_enrich_returns_outcome() {
    let (app, pool, _dir) = create_test_app(ScriptedSource::page(PARIS_PAGE)).await;
    seed_city(&pool, "paris", "Paris", "France").await;

    let (status, body) = send(&app, post("/cities/paris/enrich")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["durationMs"].is_u64());
    assert!(body.get("errorCode").is_none());
}

#[tokio::test]
async fn test_manual_enrich_failure_is_still_200() {
    let (app, pool, _dir) = create_test_app(ScriptedSource::new(Script::NotFound)).await;
    seed_city(&pool, "atlantis", "Atlantis", "Ocean").await;

    let (status, body) = send(&app, post("/cities/atlantis/enrich")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorCode"], "WIKIPEDIA_NOT_FOUND");
}

#[tokio::test]
async fn test_enrichment_logs_listing() {
    let (app, pool, _dir) = create_test_app(ScriptedSource::new(Script::NotFound)).await;
    seed_city(&pool, "atlantis", "Atlantis", "Ocean").await;

    for _ in 0..3 {
        send(&app, post("/cities/atlantis/enrich")).await;
    }
    assert_eq!(enrichment_logs::count_entries(&pool, "atlantis").await.unwrap(), 3);

    let (status, body) = send(&app, get("/cities/atlantis/enrichment-logs?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cityId"], "atlantis");
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["errorCode"], "WIKIPEDIA_NOT_FOUND");
    assert_eq!(entries[0]["initiatedBy"], "user_visit");

    let (status, body) = send(&app, get("/cities/atlantis/enrichment-logs?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_admin_sweep() {
    let (app, pool, _dir) = create_test_app(ScriptedSource::page(PARIS_PAGE)).await;
    seed_city(&pool, "paris", "Paris", "France").await;
    lock_city_at(&pool, "paris", Utc::now() - chrono::Duration::hours(1)).await;

    let (status, body) = send(&app, post("/admin/sweep")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 1);

    let (_, body) = send(&app, post("/admin/sweep")).await;
    assert_eq!(body["cleared"], 0);
}
