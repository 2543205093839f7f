//! Content normalization
//!
//! Turns a raw encyclopedia page (HTML, wikitext or markdown) into
//! [`EnrichedFields`]. Heuristic by nature: anything that cannot be
//! recognized is simply left out, never reported as an error.
//!
//! Pipeline:
//! 1. HTML pages are flattened to text, headings kept as markdown `#` lines
//! 2. Boilerplate lines are dropped and inline markup reduced to its text
//! 3. The text is segmented by headings; the lead becomes `description`
//! 4. Sections are matched to fields by keyword, collapsed and truncated

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::EnrichedFields;

pub const DEFAULT_MAX_SECTION_CHARS: usize = 4000;

static HTML_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(html|body|p|div|h[1-6]|span|table)[\s>]").unwrap());
static HTML_DROP_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|nav|footer|sup|table)\b[^>]*>.*?</(script|style|nav|footer|sup|table)>")
        .unwrap()
});
static HTML_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]>").unwrap());
static HTML_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|li|ul|ol)>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

static MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static WIKI_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[(file|image):[^\]]*\]\]").unwrap());
static EDIT_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\s*edit(\s+source)?\s*\](\([^)]*\))?").unwrap());
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static WIKI_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[(?:[^|\]]*\|)?([^\]]+)\]\]").unwrap());
static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(\d+|[a-z]|note \d+|citation needed|clarification needed)\]").unwrap());
static TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"'{2,}|\*{2,}|__").unwrap());
static COORDINATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(coordinates\s*:|\d{1,3}°\s*\d{1,2}′)").unwrap());

static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").unwrap());
static WIKI_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(={1,6})\s*([^=\s].*?)\s*={1,6}\s*$").unwrap());
static SETEXT_UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(=+|-+)\s*$").unwrap());
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*+•]|\d+\.)\s+").unwrap());

/// Lines dropped wherever they appear
const BOILERPLATE_LINES: [&str; 6] = [
    "jump to content",
    "from wikipedia, the free encyclopedia",
    "jump to navigation",
    "jump to search",
    "main menu",
    "toggle the table of contents",
];

/// Lines that start the page footer; nothing after them is content
const FOOTER_PREFIXES: [&str; 3] = ["retrieved from", "categories:", "hidden categories:"];

/// Heading keywords per target field, checked in this order
const SECTION_KEYWORDS: [(Field, &[&str]); 4] = [
    (Field::History, &["history", "historical"]),
    (Field::Climate, &["climate", "weather"]),
    (Field::Geography, &["geography", "topography", "geology", "location"]),
    (Field::Transportation, &["transport", "transit", "getting around"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    History,
    Geography,
    Climate,
    Transportation,
}

#[derive(Debug)]
struct Heading {
    level: usize,
    title: String,
}

/// Cleans and sections raw page content
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    max_section_chars: usize,
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SECTION_CHARS)
    }
}

impl ContentNormalizer {
    pub fn new(max_section_chars: usize) -> Self {
        Self { max_section_chars }
    }

    /// Build the structured fields for one fetched page
    pub fn normalize(&self, raw: &str, source_url: &str, scraped_at: DateTime<Utc>) -> EnrichedFields {
        let text = if HTML_MARKER.is_match(raw) {
            html_to_text(raw)
        } else {
            raw.to_string()
        };

        let lines = clean_lines(&text);

        let mut fields = EnrichedFields {
            source_url: Some(source_url.to_string()).filter(|url| !url.is_empty()),
            scraped_at: Some(scraped_at),
            ..EnrichedFields::default()
        };

        let mut lead: Vec<&str> = Vec::new();
        let mut seen_heading = false;
        // (field, heading level, collected lines) of the section being read
        let mut current: Option<(Option<Field>, usize, Vec<&str>)> = None;

        let mut index = 0;
        while index < lines.len() {
            let (heading, consumed) = match parse_heading(&lines, index) {
                Some(found) => found,
                None => {
                    let line = lines[index].as_str();
                    match current.as_mut() {
                        Some((_, _, body)) => body.push(line),
                        None => lead.push(line),
                    }
                    index += 1;
                    continue;
                }
            };
            index += consumed;

            // Page title before any content
            if heading.level == 1 && !seen_heading && lead.iter().all(|l| l.trim().is_empty()) {
                continue;
            }
            seen_heading = true;

            // Subsections stay with a mapped parent section
            if let Some((Some(_), level, body)) = current.as_mut() {
                if heading.level > *level {
                    body.push("");
                    continue;
                }
            }

            if let Some((field, _, body)) = current.take() {
                self.store(&mut fields, field, &body);
            }

            current = Some((match_field(&heading.title), heading.level, Vec::new()));
        }

        if let Some((field, _, body)) = current.take() {
            self.store(&mut fields, field, &body);
        }

        fields.description = self.finish_section(&lead);
        fields
    }

    fn store(&self, fields: &mut EnrichedFields, field: Option<Field>, body: &[&str]) {
        let Some(field) = field else {
            return;
        };

        let slot = match field {
            Field::History => &mut fields.history,
            Field::Geography => &mut fields.geography,
            Field::Climate => &mut fields.climate,
            Field::Transportation => &mut fields.transportation,
        };

        // First matching section wins
        if slot.is_none() {
            *slot = self.finish_section(body);
        }
    }

    fn finish_section(&self, lines: &[&str]) -> Option<String> {
        let text = collapse_paragraphs(lines);
        if text.is_empty() {
            return None;
        }
        Some(truncate_chars(&text, self.max_section_chars))
    }
}

fn match_field(title: &str) -> Option<Field> {
    let lowered = title.to_lowercase();
    SECTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(field, _)| *field)
}

/// Heading at `index`, and how many lines it spans
fn parse_heading(lines: &[String], index: usize) -> Option<(Heading, usize)> {
    let line = lines[index].trim_end();

    if let Some(caps) = MD_HEADING.captures(line) {
        return Some((
            Heading {
                level: caps[1].len(),
                title: caps[2].to_string(),
            },
            1,
        ));
    }

    if let Some(caps) = WIKI_HEADING.captures(line) {
        return Some((
            Heading {
                level: caps[1].len(),
                title: caps[2].to_string(),
            },
            1,
        ));
    }

    let next = lines.get(index + 1)?;
    if !line.trim().is_empty() && LIST_MARKER.find(line).is_none() {
        if let Some(caps) = SETEXT_UNDERLINE.captures(next.trim_end()) {
            let level = if caps[1].starts_with('=') { 1 } else { 2 };
            return Some((
                Heading {
                    level,
                    title: line.trim().to_string(),
                },
                2,
            ));
        }
    }

    None
}

fn html_to_text(html: &str) -> String {
    let text = HTML_DROP_BLOCK.replace_all(html, "");
    let text = HTML_HEADING.replace_all(&text, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(2);
        let title = HTML_TAG.replace_all(&caps[2], "");
        format!("\n{} {}\n", "#".repeat(level), title.trim())
    });
    let text = HTML_BREAK.replace_all(&text, "\n\n");
    let text = HTML_TAG.replace_all(&text, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Drop boilerplate lines, reduce inline markup, stop at the footer
fn clean_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();

    for line in text.lines() {
        let lowered = line.trim().to_lowercase();

        if FOOTER_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
            break;
        }
        if BOILERPLATE_LINES.contains(&lowered.as_str()) || COORDINATES.is_match(&lowered) {
            continue;
        }
        // Tables
        if lowered.starts_with('|') || lowered.starts_with("{|") {
            continue;
        }

        let line = MD_IMAGE.replace_all(line, "");
        let line = WIKI_FILE.replace_all(&line, "");
        let line = EDIT_LINK.replace_all(&line, "");
        let line = MD_LINK.replace_all(&line, "$1");
        let line = WIKI_LINK.replace_all(&line, "$1");
        let line = CITATION.replace_all(&line, "");
        let line = TEMPLATE.replace_all(&line, "");
        let line = EMPHASIS.replace_all(&line, "");

        lines.push(line.trim_end().to_string());
    }

    lines
}

/// Join wrapped lines into paragraphs separated by blank lines
fn collapse_paragraphs(lines: &[&str]) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if !current.is_empty() {
            paragraphs.push(current.join(" "));
            current.clear();
        }
    };

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut current);
            continue;
        }

        // List items are paragraphs of their own
        if let Some(marker) = LIST_MARKER.find(trimmed) {
            flush(&mut current);
            current.push(trimmed[marker.end()..].trim());
            flush(&mut current);
            continue;
        }

        if trimmed.chars().any(char::is_alphanumeric) {
            current.push(trimmed);
        }
    }
    flush(&mut current);

    paragraphs
        .iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut to at most `max_chars` characters, preferring a word boundary
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let head = &text[..cut];
    let boundary = head
        .rfind(char::is_whitespace)
        .filter(|&pos| pos >= cut * 4 / 5)
        .unwrap_or(cut);

    head[..boundary].trim_end().to_string()
}

/// Count populated fields of a normalized payload
///
/// A field counts when it is a non-empty string (after trimming), a
/// non-empty array, a non-empty object, or any other non-null scalar.
/// Non-object payloads count zero.
pub fn count_populated_fields(payload: &Value) -> usize {
    let Some(object) = payload.as_object() else {
        return 0;
    };

    object
        .values()
        .filter(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        })
        .count()
}
