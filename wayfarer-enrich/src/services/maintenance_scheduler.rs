//! Periodic maintenance jobs
//!
//! Three independent interval loops share one cancellation token:
//! - stale-lock sweep (runs once at startup, then every `sweep_interval`)
//! - stale-content refresh (first run after one `refresh_interval`)
//! - visitor-count recomputation (first run after one `visitor_recount_interval`)
//!
//! A failing job is logged and retried on its next tick. Missed ticks are
//! skipped rather than bunched up.

use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use wayfarer_common::config::MaintenanceConfig;

use super::{EnrichmentOrchestrator, RefreshSummary, StaleLockSweeper};
use crate::db::cities;

pub struct MaintenanceScheduler {
    db: SqlitePool,
    orchestrator: Arc<EnrichmentOrchestrator>,
    sweeper: Arc<StaleLockSweeper>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        db: SqlitePool,
        orchestrator: Arc<EnrichmentOrchestrator>,
        sweeper: Arc<StaleLockSweeper>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            db,
            orchestrator,
            sweeper,
            config,
        }
    }

    /// Start all jobs; they stop when `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            refresh_interval_secs = self.config.refresh_interval_secs,
            visitor_recount_interval_secs = self.config.visitor_recount_interval_secs,
            "Starting maintenance scheduler"
        );

        let now = Instant::now();
        let sweep_period = self.config.sweep_interval();
        let refresh_period = self.config.refresh_interval();
        let recount_period = self.config.visitor_recount_interval();

        let sweep = {
            let scheduler = Arc::clone(&self);
            spawn_job("stale_lock_sweep", now, sweep_period, cancel.clone(), move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.run_sweep().await;
                }
            })
        };

        let refresh = {
            let scheduler = Arc::clone(&self);
            spawn_job(
                "stale_content_refresh",
                now + refresh_period,
                refresh_period,
                cancel.clone(),
                move || {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        scheduler.run_refresh().await;
                    }
                },
            )
        };

        let recount = {
            let scheduler = Arc::clone(&self);
            spawn_job(
                "visitor_recount",
                now + recount_period,
                recount_period,
                cancel,
                move || {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        scheduler.run_visitor_recount().await;
                    }
                },
            )
        };

        vec![sweep, refresh, recount]
    }

    /// One stale-lock sweep; returns the number of locks cleared
    pub async fn run_sweep(&self) -> Option<u64> {
        match self.sweeper.sweep().await {
            Ok(cleared) => Some(cleared),
            Err(e) => {
                error!(error = %e, "Stale-lock sweep failed");
                None
            }
        }
    }

    /// One stale-content refresh pass
    pub async fn run_refresh(&self) -> Option<RefreshSummary> {
        let max_age = self.config.refresh_max_age();
        match self
            .orchestrator
            .refresh_stale(max_age, self.config.refresh_batch_size)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "Stale-content refresh failed");
                None
            }
        }
    }

    /// One visitor-count recomputation
    pub async fn run_visitor_recount(&self) -> Option<u64> {
        match cities::recompute_visitor_counts(&self.db).await {
            Ok(updated) => {
                info!(cities_updated = updated, "Visitor counts recomputed");
                Some(updated)
            }
            Err(e) => {
                error!(error = %e, "Visitor count recomputation failed");
                None
            }
        }
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    start: Instant,
    period: Duration,
    cancel: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = interval_at(start, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(job = name, "Maintenance job stopped");
                    break;
                }
                _ = timer.tick() => {
                    debug!(job = name, "Maintenance job running");
                    job().await;
                }
            }
        }
    })
}
