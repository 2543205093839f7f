//! Database Test Utilities

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use wayfarer_common::db::init_database;
use wayfarer_common::time::to_db_timestamp;
use wayfarer_enrich::db::cities;

/// Create temporary test database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = init_database(&temp_dir.path().join("test_wayfarer.db"))
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// Insert an unenriched city
pub async fn seed_city(pool: &SqlitePool, id: &str, name: &str, country: &str) {
    cities::insert_city(pool, id, name, country)
        .await
        .expect("Failed to seed city");
}

/// Write a lock timestamp directly, simulating a holder that took the lock at `locked_at`
pub async fn lock_city_at(pool: &SqlitePool, id: &str, locked_at: DateTime<Utc>) {
    sqlx::query("UPDATE cities SET enrichment_locked_at = ? WHERE id = ?")
        .bind(to_db_timestamp(locked_at))
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to set lock");
}
