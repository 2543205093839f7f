//! Enrichment services
//!
//! Leaf first: lock store, content fetcher, normalizer, audit log, then the
//! orchestrator that composes them and the maintenance jobs around it.

pub mod audit_logger;
pub mod content_fetcher;
pub mod content_normalizer;
pub mod enrichment_orchestrator;
pub mod lock_store;
pub mod maintenance_scheduler;
pub mod stale_lock_sweeper;

pub use audit_logger::{AuditLog, SqliteAuditLog};
pub use content_fetcher::{ContentSource, FetchError, FetchedContent, HttpContentFetcher};
pub use content_normalizer::{count_populated_fields, ContentNormalizer};
pub use enrichment_orchestrator::{EnrichError, EnrichmentOrchestrator, RefreshSummary};
pub use lock_store::{LockStore, SqliteLockStore};
pub use maintenance_scheduler::MaintenanceScheduler;
pub use stale_lock_sweeper::StaleLockSweeper;
