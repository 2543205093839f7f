//! Enrichment audit log persistence (append-only)

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;
use wayfarer_common::time::{from_db_timestamp, to_db_timestamp};
use wayfarer_common::{Error, Result};

use crate::models::{EnrichmentLogEntry, InitiatedBy};
use crate::types::ErrorCode;
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// Append one entry
pub async fn insert_entry(pool: &SqlitePool, entry: &EnrichmentLogEntry) -> Result<()> {
    let id = entry.id.to_string();
    let error_code = entry.error_code.map(|code| code.as_str());
    let timestamp = to_db_timestamp(entry.timestamp);
    let duration_ms = i64::try_from(entry.duration_ms).unwrap_or(i64::MAX);
    let fields_populated = entry.fields_populated.map(i64::from);
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("insert_enrichment_log", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO enrichment_logs (
                id, city_id, success, duration_ms, error, error_code,
                fields_populated, source_url, initiated_by, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&entry.city_id)
        .bind(entry.success)
        .bind(duration_ms)
        .bind(&entry.error)
        .bind(error_code)
        .bind(fields_populated)
        .bind(&entry.source_url)
        .bind(entry.initiated_by.as_str())
        .bind(&timestamp)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

fn entry_from_row(row: &SqliteRow) -> Result<EnrichmentLogEntry> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid enrichment log id '{}': {}", id, e)))?;

    let initiated_by: String = row.get("initiated_by");
    let initiated_by = InitiatedBy::parse(&initiated_by)
        .ok_or_else(|| Error::Internal(format!("Unknown initiated_by '{}'", initiated_by)))?;

    // Codes written by older builds are kept readable as the catch-all
    let error_code: Option<String> = row.get("error_code");
    let error_code = error_code
        .map(|code| ErrorCode::parse(&code).unwrap_or(ErrorCode::EnrichmentError));

    let timestamp: String = row.get("timestamp");

    Ok(EnrichmentLogEntry {
        id,
        city_id: row.get("city_id"),
        success: row.get::<i64, _>("success") != 0,
        duration_ms: row.get::<i64, _>("duration_ms").max(0) as u64,
        error: row.get("error"),
        error_code,
        fields_populated: row
            .get::<Option<i64>, _>("fields_populated")
            .map(|n| n.clamp(0, i64::from(u32::MAX)) as u32),
        source_url: row.get("source_url"),
        initiated_by,
        timestamp: from_db_timestamp(&timestamp)?,
    })
}

/// Most recent entries for a city, newest first
pub async fn recent_entries(
    pool: &SqlitePool,
    city_id: &str,
    limit: u32,
) -> Result<Vec<EnrichmentLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, city_id, success, duration_ms, error, error_code,
               fields_populated, source_url, initiated_by, timestamp
        FROM enrichment_logs
        WHERE city_id = ?
        ORDER BY timestamp DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(city_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Number of entries recorded for a city
pub async fn count_entries(pool: &SqlitePool, city_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM enrichment_logs WHERE city_id = ?")
        .bind(city_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wayfarer_common::db::init_database;

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("logs.db")).await.unwrap();

        let failure = EnrichmentLogEntry::failure(
            "atlantis",
            InitiatedBy::UserVisit,
            17,
            "HTTP 404",
            ErrorCode::WikipediaNotFound,
        );
        insert_entry(&pool, &failure).await.unwrap();

        let success = EnrichmentLogEntry::success(
            "atlantis",
            InitiatedBy::StaleRefresh,
            250,
            5,
            Some("https://example.org/wiki/Atlantis,_Ocean".to_string()),
        );
        insert_entry(&pool, &success).await.unwrap();

        let entries = recent_entries(&pool, "atlantis", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, success.id);
        assert_eq!(entries[0].fields_populated, Some(5));
        assert_eq!(entries[1].error_code, Some(ErrorCode::WikipediaNotFound));
        assert_eq!(entries[1].initiated_by, InitiatedBy::UserVisit);

        assert_eq!(count_entries(&pool, "atlantis").await.unwrap(), 2);
        assert_eq!(count_entries(&pool, "paris").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_entries_respects_limit() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("logs.db")).await.unwrap();

        for _ in 0..5 {
            let entry = EnrichmentLogEntry::failure(
                "paris",
                InitiatedBy::UserVisit,
                1,
                "busy",
                ErrorCode::LockContended,
            );
            insert_entry(&pool, &entry).await.unwrap();
        }

        assert_eq!(recent_entries(&pool, "paris", 3).await.unwrap().len(), 3);
    }
}
