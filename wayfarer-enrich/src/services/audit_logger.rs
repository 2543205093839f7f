//! Enrichment audit trail
//!
//! Append-only: one entry per orchestrator invocation.

use async_trait::async_trait;
use sqlx::SqlitePool;
use wayfarer_common::Result;

use crate::db::enrichment_logs;
use crate::models::EnrichmentLogEntry;

/// Sink for enrichment attempt records
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &EnrichmentLogEntry) -> Result<()>;
}

/// Audit log stored in the `enrichment_logs` table
#[derive(Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent entries for a city, newest first
    pub async fn recent_entries(&self, city_id: &str, limit: u32) -> Result<Vec<EnrichmentLogEntry>> {
        enrichment_logs::recent_entries(&self.pool, city_id, limit).await
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record(&self, entry: &EnrichmentLogEntry) -> Result<()> {
        enrichment_logs::insert_entry(&self.pool, entry).await?;

        tracing::debug!(
            city_id = %entry.city_id,
            success = entry.success,
            error_code = ?entry.error_code,
            initiated_by = %entry.initiated_by,
            "Recorded enrichment attempt"
        );
        Ok(())
    }
}
