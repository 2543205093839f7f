//! Maintenance endpoints

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Locks force-released by this sweep
    pub cleared: u64,
}

/// POST /admin/sweep
///
/// Runs one stale-lock sweep now instead of waiting for the scheduler.
pub async fn sweep(State(state): State<AppState>) -> ApiResult<Json<SweepResponse>> {
    let cleared = state.sweeper.sweep().await?;
    Ok(Json(SweepResponse { cleared }))
}

/// Build admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/sweep", post(sweep))
}
