//! Data models for wayfarer-enrich
//!
//! - City record fields touched by enrichment
//! - Append-only enrichment audit entries

pub mod city;
pub mod enrichment_log;

pub use city::{City, EnrichedFields, EnrichmentLock};
pub use enrichment_log::{EnrichmentLogEntry, InitiatedBy};
