//! City record queries

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;
use wayfarer_common::time::{before_now, from_db_timestamp, to_db_timestamp};
use wayfarer_common::{Error, Result};

use crate::models::{City, EnrichedFields, EnrichmentLock};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

const CITY_COLUMNS: &str = r#"
    id, name, country, is_enriched, enrichment_locked_at,
    enriched_fields, enriched_at, visitor_count
"#;

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db_timestamp).transpose()
}

fn city_from_row(row: &SqliteRow) -> Result<City> {
    let locked_at: Option<String> = row.get("enrichment_locked_at");
    let enrichment_lock =
        parse_optional_timestamp(locked_at)?.map(|locked_at| EnrichmentLock { locked_at });

    let fields_json: Option<String> = row.get("enriched_fields");
    let enriched_fields = fields_json
        .map(|json| serde_json::from_str::<EnrichedFields>(&json))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize enriched_fields: {}", e)))?;

    Ok(City {
        id: row.get("id"),
        name: row.get("name"),
        country: row.get("country"),
        is_enriched: row.get::<i64, _>("is_enriched") != 0,
        enrichment_lock,
        enriched_fields,
        enriched_at: parse_optional_timestamp(row.get("enriched_at"))?,
        visitor_count: row.get("visitor_count"),
    })
}

/// Load a city by id
pub async fn get_city(pool: &SqlitePool, city_id: &str) -> Result<Option<City>> {
    let sql = format!("SELECT {} FROM cities WHERE id = ?", CITY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(city_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(city_from_row).transpose()
}

/// Insert a new, unenriched city
///
/// Cities are normally created by the wider application; this exists for
/// seeding and tests.
pub async fn insert_city(pool: &SqlitePool, city_id: &str, name: &str, country: &str) -> Result<()> {
    sqlx::query("INSERT INTO cities (id, name, country) VALUES (?, ?, ?)")
        .bind(city_id)
        .bind(name)
        .bind(country)
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist a successful enrichment in one statement
///
/// Sets `enriched_fields`, `is_enriched` and `enriched_at` together so a
/// failure leaves the record untouched.
pub async fn save_enrichment(
    pool: &SqlitePool,
    city_id: &str,
    fields: &EnrichedFields,
    enriched_at: DateTime<Utc>,
) -> Result<()> {
    let fields_json = serde_json::to_string(fields)
        .map_err(|e| Error::Internal(format!("Failed to serialize enriched_fields: {}", e)))?;
    let enriched_at = to_db_timestamp(enriched_at);
    let max_wait_ms = max_lock_wait_ms(pool).await;

    let updated = retry_on_lock("save_enrichment", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE cities
            SET enriched_fields = ?, is_enriched = 1, enriched_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&fields_json)
        .bind(&enriched_at)
        .bind(city_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    })
    .await?;

    if updated == 0 {
        return Err(Error::NotFound(format!("city {}", city_id)));
    }

    Ok(())
}

/// Enriched, unlocked cities whose content is older than `max_age`
///
/// Least recently touched first: the later of the last refresh attempt and
/// the last enrichment. A city that keeps failing moves to the back of the
/// queue instead of being picked again on every pass. Cities enriched
/// before `enriched_at` existed sort first.
pub async fn find_stale_enriched(pool: &SqlitePool, max_age: Duration, limit: u32) -> Result<Vec<String>> {
    let cutoff = to_db_timestamp(before_now(max_age));

    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT id FROM cities
        WHERE is_enriched = 1
          AND enrichment_locked_at IS NULL
          AND (enriched_at IS NULL OR enriched_at < ?)
        ORDER BY COALESCE(refresh_attempted_at, enriched_at) ASC, id ASC
        LIMIT ?
        "#,
    )
    .bind(cutoff)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Stamp the start of a scheduled refresh attempt
pub async fn mark_refresh_attempted(pool: &SqlitePool, city_id: &str, attempted_at: DateTime<Utc>) -> Result<()> {
    let attempted_at = to_db_timestamp(attempted_at);
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("mark_refresh_attempted", max_wait_ms, || async {
        sqlx::query("UPDATE cities SET refresh_attempted_at = ? WHERE id = ?")
            .bind(&attempted_at)
            .bind(city_id)
            .execute(pool)
            .await?;
        Ok(())
    })
    .await
}

/// Record one page view of a city
pub async fn record_visit(pool: &SqlitePool, city_id: &str, visitor_id: Option<&str>) -> Result<()> {
    sqlx::query("INSERT INTO city_visits (city_id, visitor_id, visited_at) VALUES (?, ?, ?)")
        .bind(city_id)
        .bind(visitor_id)
        .bind(to_db_timestamp(Utc::now()))
        .execute(pool)
        .await?;

    Ok(())
}

/// Recompute `visitor_count` for every city
///
/// Counts distinct visitors; each anonymous visit counts once.
/// Returns the number of city rows updated.
pub async fn recompute_visitor_counts(pool: &SqlitePool) -> Result<u64> {
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("recompute_visitor_counts", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE cities
            SET visitor_count = (
                SELECT COUNT(DISTINCT COALESCE(v.visitor_id, 'anonymous:' || v.id))
                FROM city_visits v
                WHERE v.city_id = cities.id
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wayfarer_common::db::init_database;

    async fn test_pool() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("cities.db")).await.unwrap();
        (temp_dir, pool)
    }

    #[tokio::test]
    async fn test_get_missing_city() {
        let (_dir, pool) = test_pool().await;
        assert!(get_city(&pool, "atlantis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_and_get_city() {
        let (_dir, pool) = test_pool().await;
        insert_city(&pool, "paris", "Paris", "France").await.unwrap();

        let city = get_city(&pool, "paris").await.unwrap().unwrap();
        assert_eq!(city.name, "Paris");
        assert_eq!(city.country, "France");
        assert!(!city.is_enriched);
        assert!(city.enrichment_lock.is_none());
        assert!(city.enriched_fields.is_none());
    }

    #[tokio::test]
    async fn test_save_enrichment_sets_flag_and_fields() {
        let (_dir, pool) = test_pool().await;
        insert_city(&pool, "paris", "Paris", "France").await.unwrap();

        let fields = EnrichedFields {
            description: Some("Capital of France.".to_string()),
            ..EnrichedFields::default()
        };
        save_enrichment(&pool, "paris", &fields, Utc::now()).await.unwrap();

        let city = get_city(&pool, "paris").await.unwrap().unwrap();
        assert!(city.is_enriched);
        assert!(city.enriched_at.is_some());
        assert_eq!(city.enriched_fields, Some(fields));
    }

    #[tokio::test]
    async fn test_save_enrichment_unknown_city() {
        let (_dir, pool) = test_pool().await;
        let result = save_enrichment(&pool, "atlantis", &EnrichedFields::default(), Utc::now()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_stale_enriched() {
        let (_dir, pool) = test_pool().await;
        for (id, name) in [("old", "Old"), ("fresh", "Fresh"), ("never", "Never")] {
            insert_city(&pool, id, name, "Nowhere").await.unwrap();
        }

        let old = Utc::now() - chrono::Duration::days(200);
        save_enrichment(&pool, "old", &EnrichedFields::default(), old).await.unwrap();
        save_enrichment(&pool, "fresh", &EnrichedFields::default(), Utc::now()).await.unwrap();

        let stale = find_stale_enriched(&pool, Duration::from_secs(90 * 86_400), 10).await.unwrap();
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_find_stale_skips_locked() {
        let (_dir, pool) = test_pool().await;
        insert_city(&pool, "old", "Old", "Nowhere").await.unwrap();
        let old = Utc::now() - chrono::Duration::days(200);
        save_enrichment(&pool, "old", &EnrichedFields::default(), old).await.unwrap();

        sqlx::query("UPDATE cities SET enrichment_locked_at = ? WHERE id = 'old'")
            .bind(to_db_timestamp(Utc::now()))
            .execute(&pool)
            .await
            .unwrap();

        let stale = find_stale_enriched(&pool, Duration::from_secs(86_400), 10).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_attempt_moves_city_to_back() {
        let (_dir, pool) = test_pool().await;
        insert_city(&pool, "gone", "Gone", "Nowhere").await.unwrap();
        insert_city(&pool, "lyon", "Lyon", "France").await.unwrap();
        let max_age = Duration::from_secs(90 * 86_400);

        let gone_at = Utc::now() - chrono::Duration::days(300);
        let lyon_at = Utc::now() - chrono::Duration::days(200);
        save_enrichment(&pool, "gone", &EnrichedFields::default(), gone_at).await.unwrap();
        save_enrichment(&pool, "lyon", &EnrichedFields::default(), lyon_at).await.unwrap();

        assert_eq!(find_stale_enriched(&pool, max_age, 1).await.unwrap(), vec!["gone".to_string()]);

        mark_refresh_attempted(&pool, "gone", Utc::now()).await.unwrap();

        // Still stale, but now behind lyon
        assert_eq!(find_stale_enriched(&pool, max_age, 1).await.unwrap(), vec!["lyon".to_string()]);
        assert_eq!(
            find_stale_enriched(&pool, max_age, 10).await.unwrap(),
            vec!["lyon".to_string(), "gone".to_string()]
        );
    }

    #[tokio::test]
    async fn test_recompute_visitor_counts() {
        let (_dir, pool) = test_pool().await;
        insert_city(&pool, "paris", "Paris", "France").await.unwrap();
        insert_city(&pool, "lyon", "Lyon", "France").await.unwrap();

        record_visit(&pool, "paris", Some("alice")).await.unwrap();
        record_visit(&pool, "paris", Some("alice")).await.unwrap();
        record_visit(&pool, "paris", Some("bob")).await.unwrap();
        record_visit(&pool, "paris", None).await.unwrap();
        record_visit(&pool, "paris", None).await.unwrap();

        let updated = recompute_visitor_counts(&pool).await.unwrap();
        assert_eq!(updated, 2);

        let paris = get_city(&pool, "paris").await.unwrap().unwrap();
        let lyon = get_city(&pool, "lyon").await.unwrap().unwrap();
        assert_eq!(paris.visitor_count, 4); // alice, bob, two anonymous visits
        assert_eq!(lyon.visitor_count, 0);
    }
}
