//! Database access for wayfarer-enrich
//!
//! Schema creation lives in `wayfarer_common::db`; this module holds the
//! queries the enrichment service runs. The `enrichment_locked_at` column is
//! written only by `services::lock_store`.

pub mod cities;
pub mod enrichment_logs;
