//! Stale-lock recovery
//!
//! An invocation that dies while holding a city's lock (process crash,
//! runtime shutdown mid-fetch) never releases it. The sweeper clears any
//! lock older than a threshold far above the fetch timeout, so it only ever
//! touches locks whose holder is gone.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wayfarer_common::Result;

use super::LockStore;

/// Default lock age after which a lock is considered abandoned
pub const DEFAULT_STALE_LOCK_MAX_AGE: Duration = Duration::from_secs(10 * 60);

pub struct StaleLockSweeper {
    locks: Arc<dyn LockStore>,
    max_age: Duration,
}

impl StaleLockSweeper {
    pub fn new(locks: Arc<dyn LockStore>, max_age: Duration) -> Self {
        Self { locks, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Force-release every lock older than the threshold; returns how many were cleared
    pub async fn sweep(&self) -> Result<u64> {
        let cleared = self.locks.force_release_older_than(self.max_age).await?;

        if cleared > 0 {
            warn!(
                cleared,
                max_age_secs = self.max_age.as_secs(),
                "Stale-lock sweep released abandoned enrichment locks"
            );
        } else {
            debug!("Stale-lock sweep found nothing to release");
        }

        Ok(cleared)
    }
}
