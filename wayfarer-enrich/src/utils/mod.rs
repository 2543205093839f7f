//! Utility modules for wayfarer-enrich

pub mod db_retry;

pub use db_retry::{max_lock_wait_ms, retry_on_lock};
