//! Runtime settings stored in the `settings` table

use crate::{Error, Result};
use sqlx::SqlitePool;

/// Read a setting as a string
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(value.flatten())
}

/// Read a numeric setting, using `default` when missing or NULL
pub async fn get_setting_u64(pool: &SqlitePool, key: &str, default: u64) -> Result<u64> {
    match get_setting(pool, key).await? {
        Some(value) => value.trim().parse::<u64>().map_err(|e| {
            Error::Config(format!("Setting '{}' has invalid value '{}': {}", key, value, e))
        }),
        None => Ok(default),
    }
}

/// Insert or replace a setting
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
