//! # Wayfarer Common Library
//!
//! Shared code for the Wayfarer travel-journal services including:
//! - Error and result types
//! - Bootstrap configuration loading and root folder resolution
//! - Database initialization (pool, pragmas, schema)
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
