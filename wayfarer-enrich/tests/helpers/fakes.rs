//! Fake collaborators and stub servers

use async_trait::async_trait;
use axum::Router;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wayfarer_common::{Error, Result};
use wayfarer_enrich::models::EnrichmentLogEntry;
use wayfarer_enrich::services::{
    AuditLog, ContentNormalizer, ContentSource, EnrichmentOrchestrator, FetchError, FetchedContent,
    SqliteAuditLog, SqliteLockStore,
};

pub const PARIS_PAGE: &str = "\
# Paris

From Wikipedia, the free encyclopedia

Paris is the capital and largest city of France.[1]

## History

The Parisii settled the area around 250 BC.

## Geography

Paris lies in a bend of the Seine.

## Climate

Oceanic climate.

## Transport

Extensive metro network.
";

/// What a [`ScriptedSource`] does on every fetch
#[derive(Debug, Clone)]
pub enum Script {
    Page(String),
    NotFound,
    RateLimited,
    HardTimeout,
    Panic(&'static str),
    /// Sleep, then serve the page
    Slow(Duration, String),
    /// 404 for the named city, the page for every other
    MissingFor(&'static str, String),
}

/// Content source that follows a fixed script and counts calls
pub struct ScriptedSource {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn page(text: &str) -> Arc<Self> {
        Self::new(Script::Page(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn source_url(name: &str, country: &str) -> String {
    format!(
        "https://en.wikipedia.org/wiki/{},_{}",
        name.replace(' ', "_"),
        country.replace(' ', "_")
    )
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch(&self, name: &str, country: &str) -> std::result::Result<FetchedContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.script {
            Script::Page(text) => Ok(FetchedContent {
                raw_text: text.clone(),
                source_url: source_url(name, country),
            }),
            Script::NotFound => Err(FetchError::Status {
                status: 404,
                message: "Not Found".to_string(),
            }),
            Script::RateLimited => Err(FetchError::Status {
                status: 429,
                message: "Too Many Requests".to_string(),
            }),
            Script::HardTimeout => Err(FetchError::Timeout(Duration::from_secs(30))),
            Script::Panic(message) => panic!("{}", message),
            Script::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(FetchedContent {
                    raw_text: text.clone(),
                    source_url: source_url(name, country),
                })
            }
            Script::MissingFor(missing, _) if name == *missing => Err(FetchError::Status {
                status: 404,
                message: "Not Found".to_string(),
            }),
            Script::MissingFor(_, text) => Ok(FetchedContent {
                raw_text: text.clone(),
                source_url: source_url(name, country),
            }),
        }
    }
}

/// Audit log whose writes always fail
pub struct FailingAuditLog;

#[async_trait]
impl AuditLog for FailingAuditLog {
    async fn record(&self, _entry: &EnrichmentLogEntry) -> Result<()> {
        Err(Error::Internal("audit store unavailable".to_string()))
    }
}

/// Orchestrator with the SQLite lock store and audit log
pub fn build_orchestrator(pool: &SqlitePool, source: Arc<dyn ContentSource>) -> Arc<EnrichmentOrchestrator> {
    build_orchestrator_with_audit(pool, source, Arc::new(SqliteAuditLog::new(pool.clone())))
}

pub fn build_orchestrator_with_audit(
    pool: &SqlitePool,
    source: Arc<dyn ContentSource>,
    audit: Arc<dyn AuditLog>,
) -> Arc<EnrichmentOrchestrator> {
    Arc::new(EnrichmentOrchestrator::new(
        pool.clone(),
        Arc::new(SqliteLockStore::new(pool.clone())),
        source,
        ContentNormalizer::default(),
        audit,
    ))
}

/// Serve `router` on an ephemeral local port
pub async fn spawn_stub_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub server");
    let addr = listener.local_addr().expect("Stub server has no address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    addr
}
