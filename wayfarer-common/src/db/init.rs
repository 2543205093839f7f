//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date on
//! every start. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Setting key: total time a write may spend retrying "database is locked"
pub const SETTING_MAX_LOCK_WAIT_MS: &str = "db_max_lock_wait_ms";

/// SQLite busy_timeout applied to every pooled connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    // busy_timeout is a per-connection setting
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(connect_options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index used by the Wayfarer services
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_cities_table(pool).await?;
    create_city_visits_table(pool).await?;
    create_enrichment_logs_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the cities table
///
/// Owned by the wider application. The enrichment service only touches
/// `is_enriched`, `enrichment_locked_at`, `enriched_fields`, `enriched_at`,
/// `refresh_attempted_at` and `visitor_count`.
pub async fn create_cities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            is_enriched INTEGER NOT NULL DEFAULT 0,
            enrichment_locked_at TEXT,
            enriched_fields TEXT,
            enriched_at TEXT,
            refresh_attempted_at TEXT,
            visitor_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before scheduled refresh tracked its attempts
    ensure_column(pool, "cities", "refresh_attempted_at", "TEXT").await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cities_enrichment_locked_at ON cities(enrichment_locked_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cities_enriched_at ON cities(is_enriched, enriched_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Add a nullable column to an existing table if it is missing
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, sql_type: &str) -> Result<()> {
    let query = format!("SELECT name FROM pragma_table_info('{}')", table);
    let columns: Vec<String> = sqlx::query_scalar(&query).fetch_all(pool).await?;

    if columns.iter().any(|name| name == column) {
        return Ok(());
    }

    let alter = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type);
    sqlx::query(&alter).execute(pool).await?;
    info!("Added missing column {}.{}", table, column);

    Ok(())
}

/// Create the city_visits table (one row per page view)
pub async fn create_city_visits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS city_visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            city_id TEXT NOT NULL,
            visitor_id TEXT,
            visited_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_city_visits_city_id ON city_visits(city_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the append-only enrichment_logs table
///
/// No foreign key to `cities`: log rows outlive city deletions.
pub async fn create_enrichment_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_logs (
            id TEXT PRIMARY KEY,
            city_id TEXT NOT NULL,
            success INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            error TEXT,
            error_code TEXT,
            fields_populated INTEGER,
            source_url TEXT,
            initiated_by TEXT NOT NULL CHECK (initiated_by IN ('user_visit', 'stale_refresh')),
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enrichment_logs_city ON enrichment_logs(city_id, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, SETTING_MAX_LOCK_WAIT_MS, "5000").await?;
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE handles concurrent initialization
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    if reset > 0 {
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}
