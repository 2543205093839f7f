//! wayfarer-enrich library interface
//!
//! City-enrichment service: advisory per-city locking, content fetch and
//! normalization, audit logging and periodic maintenance, plus the HTTP
//! surface that triggers it. Exposed as a library for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::{EnrichmentOrchestrator, SqliteAuditLog, StaleLockSweeper};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub orchestrator: Arc<EnrichmentOrchestrator>,
    pub sweeper: Arc<StaleLockSweeper>,
    /// Read side of the audit trail
    pub audit: Arc<SqliteAuditLog>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        orchestrator: Arc<EnrichmentOrchestrator>,
        sweeper: Arc<StaleLockSweeper>,
    ) -> Self {
        Self {
            audit: Arc::new(SqliteAuditLog::new(db.clone())),
            db,
            orchestrator,
            sweeper,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::city_routes())
        .merge(api::admin_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
