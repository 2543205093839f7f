//! Enrichment audit log entries
//!
//! One entry per orchestrator invocation; entries are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::ErrorCode;

/// Why an enrichment attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatedBy {
    /// Organic visit to a city that has never been enriched
    UserVisit,
    /// Re-enrichment of a city that already has content
    StaleRefresh,
}

impl InitiatedBy {
    /// Derived from the city's `is_enriched` flag at invocation entry
    pub fn for_city(is_enriched: bool) -> Self {
        if is_enriched {
            InitiatedBy::StaleRefresh
        } else {
            InitiatedBy::UserVisit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatedBy::UserVisit => "user_visit",
            InitiatedBy::StaleRefresh => "stale_refresh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_visit" => Some(InitiatedBy::UserVisit),
            "stale_refresh" => Some(InitiatedBy::StaleRefresh),
            _ => None,
        }
    }
}

impl fmt::Display for InitiatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentLogEntry {
    pub id: Uuid,
    pub city_id: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields_populated: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub initiated_by: InitiatedBy,
    pub timestamp: DateTime<Utc>,
}

impl EnrichmentLogEntry {
    /// Entry for a successful enrichment
    pub fn success(
        city_id: impl Into<String>,
        initiated_by: InitiatedBy,
        duration_ms: u64,
        fields_populated: u32,
        source_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            city_id: city_id.into(),
            success: true,
            duration_ms,
            error: None,
            error_code: None,
            fields_populated: Some(fields_populated),
            source_url,
            initiated_by,
            timestamp: Utc::now(),
        }
    }

    /// Entry for a failed attempt
    pub fn failure(
        city_id: impl Into<String>,
        initiated_by: InitiatedBy,
        duration_ms: u64,
        error: impl Into<String>,
        error_code: ErrorCode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            city_id: city_id.into(),
            success: false,
            duration_ms,
            error: Some(error.into()),
            error_code: Some(error_code),
            fields_populated: None,
            source_url: None,
            initiated_by,
            timestamp: Utc::now(),
        }
    }
}
