//! City record as seen by the enrichment service
//!
//! The wider application owns the `cities` table; only the enrichment
//! fields are written here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::content_normalizer::count_populated_fields;

/// Presence of this record means "currently being enriched"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentLock {
    pub locked_at: DateTime<Utc>,
}

/// Structured content produced by the normalizer
///
/// Every field is independently optional; a missing section is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedFields {
    pub description: Option<String>,
    pub history: Option<String>,
    pub geography: Option<String>,
    pub climate: Option<String>,
    pub transportation: Option<String>,
    pub source_url: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

impl EnrichedFields {
    /// Number of populated fields, for the audit log
    pub fn populated_count(&self) -> usize {
        serde_json::to_value(self)
            .map(|value| count_populated_fields(&value))
            .unwrap_or(0)
    }

    /// True when no content section survived normalization
    pub fn has_no_sections(&self) -> bool {
        [
            &self.description,
            &self.history,
            &self.geography,
            &self.climate,
            &self.transportation,
        ]
        .iter()
        .all(|section| section.is_none())
    }
}

/// City record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    /// Opaque identifier, stable for the record lifetime
    pub id: String,
    pub name: String,
    pub country: String,
    /// True once at least one enrichment has succeeded
    pub is_enriched: bool,
    pub enrichment_lock: Option<EnrichmentLock>,
    pub enriched_fields: Option<EnrichedFields>,
    /// Time of the last successful enrichment
    pub enriched_at: Option<DateTime<Utc>>,
    pub visitor_count: i64,
}

impl City {
    pub fn is_locked(&self) -> bool {
        self.enrichment_lock.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fields_count_zero() {
        let fields = EnrichedFields::default();
        assert_eq!(fields.populated_count(), 0);
        assert!(fields.has_no_sections());
    }

    #[test]
    fn test_populated_count_includes_metadata() {
        let fields = EnrichedFields {
            description: Some("Paris is the capital of France.".to_string()),
            history: Some("   ".to_string()),
            source_url: Some("https://en.wikipedia.org/wiki/Paris,_France".to_string()),
            scraped_at: Some(Utc::now()),
            ..EnrichedFields::default()
        };

        // description, sourceUrl, scrapedAt; whitespace-only history does not count
        assert_eq!(fields.populated_count(), 3);
        assert!(!fields.has_no_sections());
    }

    #[test]
    fn test_city_serializes_camel_case() {
        let city = City {
            id: "paris".to_string(),
            name: "Paris".to_string(),
            country: "France".to_string(),
            is_enriched: false,
            enrichment_lock: None,
            enriched_fields: None,
            enriched_at: None,
            visitor_count: 0,
        };

        let json = serde_json::to_value(&city).unwrap();
        assert_eq!(json["isEnriched"], false);
        assert!(json["enrichmentLock"].is_null());
        assert!(!city.is_locked());
    }
}
