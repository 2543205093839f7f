//! City endpoints
//!
//! - GET  /cities/:id                    city view; records a visit, may trigger enrichment
//! - POST /cities/:id/enrich             synchronous enrichment
//! - GET  /cities/:id/enrichment-logs    recent audit entries

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::cities;
use crate::models::{City, EnrichmentLogEntry};
use crate::types::EnrichmentOutcome;
use crate::{ApiError, ApiResult, AppState};

/// Header carrying an opaque visitor identifier; absent for anonymous traffic
pub const VISITOR_HEADER: &str = "x-visitor-id";

const DEFAULT_LOG_LIMIT: u32 = 20;
const MAX_LOG_LIMIT: u32 = 100;

/// City plus whether this request started an enrichment
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityView {
    #[serde(flatten)]
    pub city: City,
    pub enrichment_triggered: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentLogsResponse {
    pub city_id: String,
    pub entries: Vec<EnrichmentLogEntry>,
}

async fn load_city(state: &AppState, city_id: &str) -> ApiResult<City> {
    cities::get_city(&state.db, city_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("city {}", city_id)))
}

/// GET /cities/:id
///
/// Never waits for enrichment; a triggered run happens in the background.
pub async fn get_city(
    State(state): State<AppState>,
    Path(city_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CityView>> {
    let city = load_city(&state, &city_id).await?;

    let visitor_id = headers
        .get(VISITOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    // Visit counting must not break the page
    if let Err(e) = cities::record_visit(&state.db, &city_id, visitor_id).await {
        warn!(city_id = %city_id, error = %e, "Failed to record city visit");
    }

    let enrichment_triggered = state.orchestrator.trigger_on_visit(&city);

    Ok(Json(CityView {
        city,
        enrichment_triggered,
    }))
}

/// POST /cities/:id/enrich
///
/// 200 with the outcome even when enrichment fails; the outcome carries
/// `success: false` and the error code.
pub async fn enrich_city(
    State(state): State<AppState>,
    Path(city_id): Path<String>,
) -> ApiResult<Json<EnrichmentOutcome>> {
    load_city(&state, &city_id).await?;

    let outcome = state.orchestrator.enrich_city(&city_id).await;
    Ok(Json(outcome))
}

/// GET /cities/:id/enrichment-logs?limit=N
pub async fn enrichment_logs(
    State(state): State<AppState>,
    Path(city_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<EnrichmentLogsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if limit == 0 || limit > MAX_LOG_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LOG_LIMIT
        )));
    }

    let entries = state.audit.recent_entries(&city_id, limit).await?;

    Ok(Json(EnrichmentLogsResponse { city_id, entries }))
}

/// Build city routes
pub fn city_routes() -> Router<AppState> {
    Router::new()
        .route("/cities/:id", get(get_city))
        .route("/cities/:id/enrich", post(enrich_city))
        .route("/cities/:id/enrichment-logs", get(enrichment_logs))
}
