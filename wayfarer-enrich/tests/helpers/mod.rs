//! Test Helper Utilities
//!
//! Shared utilities for testing wayfarer-enrich

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{create_test_db, lock_city_at, seed_city};
pub use fakes::{
    build_orchestrator, build_orchestrator_with_audit, spawn_stub_server, FailingAuditLog,
    Script, ScriptedSource, PARIS_PAGE,
};
