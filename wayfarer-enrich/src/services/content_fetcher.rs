//! Content source client
//!
//! One GET per fetch to `<base>/<City_Name>,_<Country_Name>`. The whole
//! exchange (send + body) is bounded by a hard timeout; expiry is reported
//! as [`ErrorCode::FirecrawlTimeout`], distinct from transport timeouts.
//!
//! The source may be the encyclopedia itself (HTML/plain text) or a
//! scraping proxy returning JSON; both shapes are accepted.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use wayfarer_common::config::EnrichmentConfig;

use crate::types::ErrorCode;

/// Keys that carry page text in proxy JSON responses, in preference order
const TEXT_KEYS: [&str; 4] = ["markdown", "content", "extract", "text"];

/// Raw page text plus the URL it was actually served from
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub raw_text: String,
    pub source_url: String,
}

/// Content fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("FIRECRAWL_TIMEOUT: content fetch exceeded {0:?}")]
    Timeout(Duration),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Content source returned an empty payload")]
    EmptyPayload,

    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Stable code for the audit log
    ///
    /// Structural where the error carries structure; message classification
    /// only for opaque text.
    pub fn code(&self) -> ErrorCode {
        match self {
            FetchError::Status { status, message } => ErrorCode::from_status(*status)
                .unwrap_or_else(|| ErrorCode::classify(&format!("HTTP {} {}", status, message))),
            FetchError::Transport(e) if e.is_timeout() => ErrorCode::Timeout,
            FetchError::Transport(e) if e.is_connect() => ErrorCode::NetworkError,
            FetchError::Transport(e) => ErrorCode::classify(&e.to_string()),
            FetchError::Timeout(_) => ErrorCode::FirecrawlTimeout,
            FetchError::Upstream(message) => ErrorCode::from_message(message),
            FetchError::EmptyPayload | FetchError::InvalidUrl(_) => ErrorCode::EnrichmentError,
        }
    }
}

/// Anything that can fetch raw content for a place
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, name: &str, country: &str) -> Result<FetchedContent, FetchError>;
}

/// Page URL for a city: spaces become underscores, the segment is percent-encoded
pub fn build_source_url(base: &Url, name: &str, country: &str) -> Result<Url, FetchError> {
    let segment = format!(
        "{},_{}",
        name.trim().replace(' ', "_"),
        country.trim().replace(' ', "_")
    );

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .push(&segment);

    Ok(url)
}

/// HTTP implementation of [`ContentSource`]
pub struct HttpContentFetcher {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpContentFetcher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.source_base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", config.source_base_url, e)))?;

        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl(config.source_base_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            api_key: config.api_key.clone(),
            timeout: config.fetch_timeout(),
        })
    }

    /// Override the hard timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch_once(&self, url: Url) -> Result<FetchedContent, FetchError> {
        let mut request = self.http_client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let resolved_url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: status_message(status, &body),
            });
        }

        let body = response.text().await?;
        extract_payload(&body, resolved_url)
    }
}

#[async_trait]
impl ContentSource for HttpContentFetcher {
    async fn fetch(&self, name: &str, country: &str) -> Result<FetchedContent, FetchError> {
        let url = build_source_url(&self.base_url, name, country)?;
        debug!(url = %url, "Fetching city content");

        match tokio::time::timeout(self.timeout, self.fetch_once(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

fn status_message(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown status");
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("error").map(error_text));

    match detail {
        Some(detail) => format!("{} ({})", reason, detail),
        None => reason.to_string(),
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Pull page text out of a successful response body
fn extract_payload(body: &str, resolved_url: String) -> Result<FetchedContent, FetchError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            return extract_json_payload(&json, resolved_url);
        }
    }

    if body.trim().is_empty() {
        return Err(FetchError::EmptyPayload);
    }

    Ok(FetchedContent {
        raw_text: body.to_string(),
        source_url: resolved_url,
    })
}

fn extract_json_payload(json: &Value, resolved_url: String) -> Result<FetchedContent, FetchError> {
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        return Err(FetchError::Upstream(error_text(error)));
    }

    let data = json.get("data").unwrap_or(json);
    let raw_text = [data, json]
        .into_iter()
        .flat_map(|scope| TEXT_KEYS.iter().filter_map(move |key| scope.get(*key)))
        .filter_map(Value::as_str)
        .find(|text| !text.trim().is_empty())
        .ok_or(FetchError::EmptyPayload)?;

    let source_url = data
        .get("metadata")
        .and_then(|meta| meta.get("sourceURL").or_else(|| meta.get("url")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(resolved_url);

    Ok(FetchedContent {
        raw_text: raw_text.to_string(),
        source_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://en.wikipedia.org/wiki").unwrap()
    }

    #[test]
    fn test_build_source_url_underscores() {
        let url = build_source_url(&base(), "New York", "United States").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/wiki/New_York,_United_States"
        );
    }

    #[test]
    fn test_build_source_url_percent_encodes() {
        let url = build_source_url(&base(), "São Paulo", "Brazil").unwrap();
        assert_eq!(url.as_str(), "https://en.wikipedia.org/wiki/S%C3%A3o_Paulo,_Brazil");

        let url = build_source_url(&base(), "Foo/Bar?", "X").unwrap();
        assert_eq!(url.as_str(), "https://en.wikipedia.org/wiki/Foo%2FBar%3F,_X");
    }

    #[test]
    fn test_build_source_url_trailing_slash_base() {
        let base = Url::parse("http://localhost:8080/pages/").unwrap();
        let url = build_source_url(&base, "Paris", "France").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/pages/Paris,_France");
    }

    #[test]
    fn test_status_codes_map_structurally() {
        let not_found = FetchError::Status { status: 404, message: "Not Found".into() };
        assert_eq!(not_found.code(), ErrorCode::WikipediaNotFound);

        let gone = FetchError::Status { status: 410, message: "Gone".into() };
        assert_eq!(gone.code(), ErrorCode::WikipediaNotFound);

        let throttled = FetchError::Status { status: 429, message: "Too Many Requests".into() };
        assert_eq!(throttled.code(), ErrorCode::RateLimited);

        let forbidden = FetchError::Status { status: 403, message: "Forbidden".into() };
        assert_eq!(forbidden.code(), ErrorCode::AuthFailed);

        let server = FetchError::Status { status: 500, message: "Internal Server Error".into() };
        assert_eq!(server.code(), ErrorCode::EnrichmentError);
    }

    #[test]
    fn test_hard_timeout_maps_to_firecrawl_timeout() {
        let error = FetchError::Timeout(Duration::from_secs(30));
        assert_eq!(error.code(), ErrorCode::FirecrawlTimeout);
        assert_eq!(ErrorCode::from_message(&error.to_string()), ErrorCode::FirecrawlTimeout);
    }

    #[test]
    fn test_upstream_and_empty_payload_codes() {
        assert_eq!(
            FetchError::Upstream("Invalid API key".into()).code(),
            ErrorCode::AuthFailed
        );
        assert_eq!(FetchError::EmptyPayload.code(), ErrorCode::EnrichmentError);
    }

    #[test]
    fn test_extract_plain_body() {
        let content = extract_payload("Paris is the capital.", "https://x/Paris".into()).unwrap();
        assert_eq!(content.raw_text, "Paris is the capital.");
        assert_eq!(content.source_url, "https://x/Paris");

        assert!(matches!(
            extract_payload("  \n ", "https://x".into()),
            Err(FetchError::EmptyPayload)
        ));
    }

    #[test]
    fn test_extract_proxy_json() {
        let body = json!({
            "success": true,
            "data": {
                "markdown": "# Paris\nCapital of France.",
                "metadata": { "sourceURL": "https://en.wikipedia.org/wiki/Paris" }
            }
        })
        .to_string();

        let content = extract_payload(&body, "https://proxy/Paris,_France".into()).unwrap();
        assert!(content.raw_text.starts_with("# Paris"));
        assert_eq!(content.source_url, "https://en.wikipedia.org/wiki/Paris");
    }

    #[test]
    fn test_extract_json_error_field() {
        let body = json!({ "success": false, "error": "Rate limit exceeded" }).to_string();
        match extract_payload(&body, "https://proxy".into()) {
            Err(FetchError::Upstream(message)) => assert_eq!(message, "Rate limit exceeded"),
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_without_text() {
        let body = json!({ "data": { "markdown": "" } }).to_string();
        assert!(matches!(
            extract_payload(&body, "https://proxy".into()),
            Err(FetchError::EmptyPayload)
        ));
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let config = EnrichmentConfig {
            source_base_url: "not a url".to_string(),
            ..EnrichmentConfig::default()
        };
        assert!(matches!(
            HttpContentFetcher::new(&config),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
