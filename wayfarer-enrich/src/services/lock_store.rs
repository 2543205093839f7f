//! Per-city advisory enrichment lock
//!
//! The lock lives in the city's own `enrichment_locked_at` column; no lock
//! service is involved. Every mutation is one conditional `UPDATE`, and
//! SQLite serializes writers, so two concurrent `acquire` calls for the same
//! city can never both see a row change.
//!
//! There is no fencing token. A process that dies between `acquire` and
//! `release` leaves the lock for [`StaleLockSweeper`](super::StaleLockSweeper).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};
use wayfarer_common::time::{before_now, from_db_timestamp, to_db_timestamp};
use wayfarer_common::Result;

use crate::models::EnrichmentLock;
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// Atomic per-city lock primitives
///
/// The orchestrator depends only on this trait, so a lease-based
/// distributed lock can replace the SQLite implementation.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock if it is free. `false` if held (or the city is unknown).
    async fn acquire(&self, city_id: &str) -> Result<bool>;

    /// Clear the lock regardless of who holds it. Releasing a free lock is a no-op.
    async fn release(&self, city_id: &str) -> Result<()>;

    /// Clear every lock taken more than `max_age` ago; returns how many were cleared
    async fn force_release_older_than(&self, max_age: Duration) -> Result<u64>;

    /// Current lock state
    async fn lock_state(&self, city_id: &str) -> Result<Option<EnrichmentLock>>;
}

/// Lock store backed by the `cities` table
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn acquire(&self, city_id: &str) -> Result<bool> {
        let locked_at = to_db_timestamp(Utc::now());
        let max_wait_ms = max_lock_wait_ms(&self.pool).await;

        let changed = retry_on_lock("acquire_enrichment_lock", max_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE cities
                SET enrichment_locked_at = ?
                WHERE id = ? AND enrichment_locked_at IS NULL
                "#,
            )
            .bind(&locked_at)
            .bind(city_id)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
        .await?;

        let acquired = changed == 1;
        debug!(city_id, acquired, "Enrichment lock acquisition attempted");
        Ok(acquired)
    }

    async fn release(&self, city_id: &str) -> Result<()> {
        let max_wait_ms = max_lock_wait_ms(&self.pool).await;

        retry_on_lock("release_enrichment_lock", max_wait_ms, || async {
            sqlx::query("UPDATE cities SET enrichment_locked_at = NULL WHERE id = ?")
                .bind(city_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await?;

        debug!(city_id, "Enrichment lock released");
        Ok(())
    }

    async fn force_release_older_than(&self, max_age: Duration) -> Result<u64> {
        let cutoff = to_db_timestamp(before_now(max_age));
        let max_wait_ms = max_lock_wait_ms(&self.pool).await;

        let cleared: Vec<String> = retry_on_lock("force_release_stale_locks", max_wait_ms, || async {
            let ids = sqlx::query_scalar::<_, String>(
                r#"
                UPDATE cities
                SET enrichment_locked_at = NULL
                WHERE enrichment_locked_at IS NOT NULL AND enrichment_locked_at < ?
                RETURNING id
                "#,
            )
            .bind(&cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        })
        .await?;

        for city_id in &cleared {
            warn!(city_id = %city_id, cutoff = %cutoff, "Force-released stale enrichment lock");
        }

        Ok(cleared.len() as u64)
    }

    async fn lock_state(&self, city_id: &str) -> Result<Option<EnrichmentLock>> {
        let locked_at: Option<Option<String>> =
            sqlx::query_scalar("SELECT enrichment_locked_at FROM cities WHERE id = ?")
                .bind(city_id)
                .fetch_optional(&self.pool)
                .await?;

        locked_at
            .flatten()
            .map(|value| from_db_timestamp(&value).map(|locked_at| EnrichmentLock { locked_at }))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cities::insert_city;
    use tempfile::TempDir;
    use wayfarer_common::db::init_database;

    async fn store_with_city() -> (TempDir, SqliteLockStore) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("locks.db")).await.unwrap();
        insert_city(&pool, "paris", "Paris", "France").await.unwrap();
        (temp_dir, SqliteLockStore::new(pool))
    }

    #[tokio::test]
    async fn test_acquire_free_lock() {
        let (_dir, store) = store_with_city().await;

        assert!(store.acquire("paris").await.unwrap());
        let state = store.lock_state("paris").await.unwrap();
        assert!(state.is_some());
    }

    #[tokio::test]
    async fn test_second_acquire_fails_without_change() {
        let (_dir, store) = store_with_city().await;

        assert!(store.acquire("paris").await.unwrap());
        let first = store.lock_state("paris").await.unwrap();

        assert!(!store.acquire("paris").await.unwrap());
        let second = store.lock_state("paris").await.unwrap();
        assert_eq!(first, second, "Losing acquire must not touch lockedAt");
    }

    #[tokio::test]
    async fn test_acquire_unknown_city() {
        let (_dir, store) = store_with_city().await;
        assert!(!store.acquire("atlantis").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_dir, store) = store_with_city().await;

        store.release("paris").await.unwrap();
        assert!(store.acquire("paris").await.unwrap());
        store.release("paris").await.unwrap();
        store.release("paris").await.unwrap();

        assert!(store.lock_state("paris").await.unwrap().is_none());
        assert!(store.acquire("paris").await.unwrap());
    }
}
