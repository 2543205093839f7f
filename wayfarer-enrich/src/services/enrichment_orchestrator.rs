//! Enrichment orchestrator
//!
//! Per-invocation state machine:
//!
//! ```text
//! Idle ──acquire──> Locked ──fetch/normalize/persist──> Enriched ──release──> Idle
//!   │                  └──────────any error or panic──> Failed ───release──> Idle
//!   └──lock held──> Failed (LOCK_CONTENDED, no release)
//! ```
//!
//! The locked region runs as a spawned task under `catch_unwind`, and release
//! runs after it on every path, including when the caller stops waiting. The
//! audit entry is written afterwards, outside the lock.
//! [`EnrichmentOrchestrator::enrich_city`] never returns an error and never
//! lets a panic escape; failures come back as an [`EnrichmentOutcome`].

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use sqlx::SqlitePool;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{AuditLog, ContentNormalizer, ContentSource, FetchError, LockStore};
use crate::db::cities;
use crate::models::{City, EnrichedFields, EnrichmentLogEntry, InitiatedBy};
use crate::types::{EnrichmentOutcome, ErrorCode};

/// Why an enrichment attempt failed
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("Lock acquisition failed - enrichment already in progress")]
    LockContended,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Database(wayfarer_common::Error),

    #[error("Lock store error: {0}")]
    LockStore(wayfarer_common::Error),

    #[error("Enrichment panicked: {0}")]
    Panicked(String),
}

impl EnrichError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EnrichError::CityNotFound(_) => ErrorCode::EnrichmentError,
            EnrichError::LockContended => ErrorCode::LockContended,
            EnrichError::Fetch(e) => e.code(),
            // The city vanished between load and persist
            EnrichError::Database(wayfarer_common::Error::NotFound(_)) => ErrorCode::EnrichmentError,
            EnrichError::Database(e) | EnrichError::LockStore(e) => {
                ErrorCode::from_message(&e.to_string())
            }
            EnrichError::Panicked(message) => ErrorCode::from_message(message),
        }
    }
}

/// Result of one stale-content refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub candidates: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `failed` that lost the lock race
    pub contended: usize,
}

pub struct EnrichmentOrchestrator {
    pipeline: Arc<Pipeline>,
}

/// Collaborators shared with the spawned locked region
struct Pipeline {
    db: SqlitePool,
    locks: Arc<dyn LockStore>,
    source: Arc<dyn ContentSource>,
    normalizer: ContentNormalizer,
    audit: Arc<dyn AuditLog>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        db: SqlitePool,
        locks: Arc<dyn LockStore>,
        source: Arc<dyn ContentSource>,
        normalizer: ContentNormalizer,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                db,
                locks,
                source,
                normalizer,
                audit,
            }),
        }
    }

    /// Enrich one city, at most one invocation per city at a time
    ///
    /// Once the lock is held the rest of the invocation runs as its own task.
    /// Dropping this future (client disconnect, caller timeout) only stops
    /// the wait; the task still releases the lock and writes the audit entry.
    pub async fn enrich_city(&self, city_id: &str) -> EnrichmentOutcome {
        let started = Instant::now();
        let pipeline = &self.pipeline;

        let city = match cities::get_city(&pipeline.db, city_id).await {
            Ok(Some(city)) => city,
            Ok(None) => {
                let err = EnrichError::CityNotFound(city_id.to_string());
                return pipeline.finish(city_id, InitiatedBy::UserVisit, started, Err(err)).await;
            }
            Err(e) => {
                let err = EnrichError::Database(e);
                return pipeline.finish(city_id, InitiatedBy::UserVisit, started, Err(err)).await;
            }
        };

        let initiated_by = InitiatedBy::for_city(city.is_enriched);

        match pipeline.locks.acquire(city_id).await {
            Ok(true) => {}
            // Someone else holds the lock; it is theirs to release
            Ok(false) => {
                let err = EnrichError::LockContended;
                return pipeline.finish(city_id, initiated_by, started, Err(err)).await;
            }
            Err(e) => {
                let err = EnrichError::LockStore(e);
                return pipeline.finish(city_id, initiated_by, started, Err(err)).await;
            }
        }

        debug!(city_id, %initiated_by, "Enrichment lock acquired");

        let locked = tokio::spawn(Arc::clone(pipeline).run_and_release(city, initiated_by, started));

        match locked.await {
            Ok(outcome) => outcome,
            // Task aborted by runtime shutdown, or a panic outside catch_unwind
            Err(e) => {
                pipeline.release(city_id).await;
                let err = EnrichError::Panicked(e.to_string());
                pipeline.finish(city_id, initiated_by, started, Err(err)).await
            }
        }
    }

    /// Page-visit trigger
    ///
    /// Starts a background enrichment when the city has no content yet and
    /// nobody holds its lock. Returns whether one was started; never waits.
    pub fn trigger_on_visit(self: &Arc<Self>, city: &City) -> bool {
        if city.is_enriched || city.is_locked() {
            return false;
        }

        let orchestrator = Arc::clone(self);
        let city_id = city.id.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.enrich_city(&city_id).await;
            debug!(
                city_id = %city_id,
                success = outcome.success,
                error_code = ?outcome.error_code,
                "Visit-triggered enrichment finished"
            );
        });

        true
    }

    /// Re-enrich up to `limit` unlocked cities whose content is older than `max_age`
    ///
    /// Cities are processed one at a time, least recently attempted first.
    /// Each attempt is stamped before it starts, so cities that keep failing
    /// rotate behind the rest of the queue.
    pub async fn refresh_stale(
        &self,
        max_age: Duration,
        limit: u32,
    ) -> wayfarer_common::Result<RefreshSummary> {
        let candidates = cities::find_stale_enriched(&self.pipeline.db, max_age, limit).await?;

        let mut summary = RefreshSummary {
            candidates: candidates.len(),
            ..RefreshSummary::default()
        };

        for city_id in &candidates {
            if let Err(e) = cities::mark_refresh_attempted(&self.pipeline.db, city_id, Utc::now()).await {
                warn!(city_id = %city_id, error = %e, "Failed to record refresh attempt");
            }

            let outcome = self.enrich_city(city_id).await;
            if outcome.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
                if outcome.is_contended() {
                    summary.contended += 1;
                }
            }
        }

        if summary.candidates > 0 {
            info!(
                candidates = summary.candidates,
                succeeded = summary.succeeded,
                failed = summary.failed,
                contended = summary.contended,
                "Stale-content refresh pass complete"
            );
        }

        Ok(summary)
    }
}

impl Pipeline {
    /// Fetch, normalize and persist under the lock, then release and audit
    async fn run_and_release(
        self: Arc<Self>,
        city: City,
        initiated_by: InitiatedBy,
        started: Instant,
    ) -> EnrichmentOutcome {
        let result = AssertUnwindSafe(self.run_locked(&city))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EnrichError::Panicked(panic_message(panic.as_ref()))));

        self.release(&city.id).await;

        self.finish(&city.id, initiated_by, started, result).await
    }

    /// Fetch, normalize and persist while holding the lock
    async fn run_locked(&self, city: &City) -> Result<EnrichedFields, EnrichError> {
        let content = self.source.fetch(&city.name, &city.country).await?;

        let scraped_at = Utc::now();
        let fields = self
            .normalizer
            .normalize(&content.raw_text, &content.source_url, scraped_at);

        cities::save_enrichment(&self.db, &city.id, &fields, scraped_at)
            .await
            .map_err(EnrichError::Database)?;

        Ok(fields)
    }

    async fn release(&self, city_id: &str) {
        if let Err(e) = self.locks.release(city_id).await {
            error!(
                city_id,
                error = %e,
                "Failed to release enrichment lock; stale-lock sweep will recover it"
            );
        }
    }

    /// Log, audit and shape the outcome
    async fn finish(
        &self,
        city_id: &str,
        initiated_by: InitiatedBy,
        started: Instant,
        result: Result<EnrichedFields, EnrichError>,
    ) -> EnrichmentOutcome {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (entry, outcome) = match result {
            Ok(fields) => {
                let fields_populated = u32::try_from(fields.populated_count()).unwrap_or(u32::MAX);
                info!(
                    city_id,
                    %initiated_by,
                    duration_ms,
                    fields_populated,
                    "City enrichment succeeded"
                );
                (
                    EnrichmentLogEntry::success(
                        city_id,
                        initiated_by,
                        duration_ms,
                        fields_populated,
                        fields.source_url.clone(),
                    ),
                    EnrichmentOutcome::succeeded(duration_ms),
                )
            }
            Err(err) => {
                let code = err.code();
                let message = err.to_string();
                if code == ErrorCode::LockContended {
                    debug!(city_id, %initiated_by, "City enrichment skipped: lock held");
                } else {
                    warn!(
                        city_id,
                        %initiated_by,
                        duration_ms,
                        error_code = %code,
                        error = %message,
                        "City enrichment failed"
                    );
                }
                (
                    EnrichmentLogEntry::failure(city_id, initiated_by, duration_ms, message.clone(), code),
                    EnrichmentOutcome::failed(duration_ms, message, code),
                )
            }
        };

        if let Err(e) = self.audit.record(&entry).await {
            warn!(city_id, error = %e, "Failed to record enrichment audit entry");
        }

        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
