//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite writer contention
//! ("database is locked"). Bounded by the `db_max_lock_wait_ms` setting.

use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use wayfarer_common::db::{get_setting_u64, SETTING_MAX_LOCK_WAIT_MS};
use wayfarer_common::{Error, Result};

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;
const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Configured retry budget, falling back to the default when unreadable
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> u64 {
    match get_setting_u64(pool, SETTING_MAX_LOCK_WAIT_MS, DEFAULT_MAX_LOCK_WAIT_MS).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read {}, using default", SETTING_MAX_LOCK_WAIT_MS);
            DEFAULT_MAX_LOCK_WAIT_MS
        }
    }
}

/// Retry a database operation with exponential backoff until max_wait_ms elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If "database is locked": back off and retry while time remains, else fail
/// 4. Any other error is returned immediately
///
/// Backoff starts at 10ms and doubles up to 1000ms.
///
/// Only use this for statements that have no effect when they fail with a
/// lock error (single statements, or whole transactions).
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_database_locked() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
