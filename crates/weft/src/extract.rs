//! Entity extraction tiers
//!
//! Wiki-link parsing is deterministic and runs on every save. Entity
//! extraction has two local tiers: a reasoning provider prompted for JSON,
//! and a rule tier built from regexes that needs no model at all. The
//! networked backend tier lives in [`crate::remote`].

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use llm::Provider;

use crate::entity::{normalize_name, parse_entity_kind, EntityKind, RawEntity};

/// Targets of `[[...]]` links in order of first appearance.
///
/// Display aliases (`[[target|shown text]]`) are dropped; duplicates are
/// case-insensitively collapsed to the first spelling.
pub fn parse_wiki_links(text: &str) -> Vec<String> {
    let link_re = Regex::new(r"\[\[([^\]]+)\]\]").unwrap();
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for caps in link_re.captures_iter(text) {
        let target = caps[1].split('|').next().unwrap_or_default().trim();
        if target.is_empty() {
            continue;
        }
        if seen.insert(target.to_lowercase()) {
            links.push(target.to_string());
        }
    }
    links
}

/// Rule-based extraction: `@handle` mentions, `#REF-123` tickets, and
/// capitalized phrases. Each extracted entity carries its containing line
/// as the asserted fact. Concepts are capped at `max_concepts`; handles and
/// tickets are not.
pub fn rules_extract(text: &str, max_concepts: usize) -> Vec<RawEntity> {
    let handle_re = Regex::new(r"@([A-Za-z][A-Za-z0-9_-]*)").unwrap();
    let ticket_re = Regex::new(r"#([A-Z][A-Z0-9]*-\d+)").unwrap();
    let concept_re = Regex::new(r"[A-Z][a-zA-Z0-9]+(?: [A-Z][a-zA-Z0-9]+)*").unwrap();

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    let mut concepts = 0usize;

    for line in text.lines() {
        let fact = line.trim();
        if fact.is_empty() {
            continue;
        }
        for caps in handle_re.captures_iter(line) {
            let start = caps.get(0).map(|g| g.start()).unwrap_or_default();
            // Reject the domain half of e-mail addresses.
            if prev_char(line, start).is_some_and(|c| c.is_alphanumeric()) {
                continue;
            }
            let name = caps[1].to_string();
            if seen.insert(normalize_name(&name)) {
                entities.push(RawEntity::new(name, EntityKind::Person).with_fact(fact));
            }
        }
        for caps in ticket_re.captures_iter(line) {
            let name = caps[1].to_string();
            if seen.insert(normalize_name(&name)) {
                entities.push(RawEntity::new(name, EntityKind::Task).with_fact(fact));
            }
        }
        for m in concept_re.find_iter(line) {
            if concepts >= max_concepts {
                break;
            }
            // Link targets and marked-up tokens are covered by other rules.
            if prev_char(line, m.start()).is_some_and(|c| matches!(c, '[' | '#' | '@')) {
                continue;
            }
            let Some(name) = strip_leading_stopwords(m.as_str()) else {
                continue;
            };
            if name.len() < 3 {
                continue;
            }
            if seen.insert(normalize_name(name)) {
                entities.push(RawEntity::new(name, EntityKind::Concept).with_fact(fact));
                concepts += 1;
            }
        }
    }
    entities
}

fn prev_char(line: &str, start: usize) -> Option<char> {
    line[..start].chars().next_back()
}

/// Drop sentence-initial stopwords from a capitalized phrase; `None` when
/// nothing remains.
fn strip_leading_stopwords(phrase: &str) -> Option<&str> {
    let mut rest = phrase.trim();
    loop {
        let word = rest.split(' ').next().unwrap_or_default();
        if word.is_empty() || !STOPWORDS.contains(&word.to_lowercase().as_str()) {
            break;
        }
        rest = rest[word.len()..].trim_start();
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "this", "that", "these", "those", "a", "an", "and", "but", "or", "if", "then",
    "when", "where", "what", "who", "how", "why", "it", "its", "is", "was", "are", "were",
    "be", "been", "we", "you", "he", "she", "they", "in", "on", "at", "of", "for", "with",
    "from", "to", "by", "as", "not", "all", "any", "each", "see", "also", "note", "todo",
];

#[derive(Debug, Deserialize)]
struct RawExtractedEntity {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    fact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtractionResponse {
    #[serde(default)]
    entities: Vec<RawExtractedEntity>,
}

/// Provider-tier extraction: one completion prompted for a JSON entity list.
pub async fn provider_extract(
    provider: &dyn Provider,
    title: &str,
    text: &str,
) -> Result<Vec<RawEntity>> {
    let user = format!("Page title: {title}\n\nPage content:\n{text}");
    let raw = provider.complete(EXTRACTION_PROMPT, &user).await?;
    let parsed: RawExtractionResponse = serde_json::from_str(extract_json(&raw))
        .context("Failed to parse extraction response")?;
    Ok(parsed
        .entities
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .map(|e| {
            let mut entity =
                RawEntity::new(e.name.trim(), parse_entity_kind(&e.kind));
            if let Some(fact) = e.fact {
                entity = entity.with_fact(fact);
            }
            entity
        })
        .collect())
}

/// The valid-time window a provider read off a fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidWindow {
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawValidWindow {
    #[serde(default)]
    valid_at: Option<String>,
    #[serde(default)]
    invalid_at: Option<String>,
}

/// Ask a provider when a fact became true (and, if stated, stopped being
/// true). Timestamps the model cannot justify come back as `None`.
pub async fn extract_valid_window(
    provider: &dyn Provider,
    fact: &str,
    reference: DateTime<Utc>,
) -> Result<ValidWindow> {
    let user = format!(
        "Reference time: {}\nFact: {fact}",
        reference.to_rfc3339()
    );
    let raw = provider.complete(VALID_TIME_PROMPT, &user).await?;
    let parsed: RawValidWindow = serde_json::from_str(extract_json(&raw))
        .context("Failed to parse valid-time response")?;
    Ok(ValidWindow {
        valid_at: parse_optional_time(parsed.valid_at.as_deref()),
        invalid_at: parse_optional_time(parsed.invalid_at.as_deref()),
    })
}

fn parse_optional_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strip Markdown code fences from a model reply, returning the JSON body.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

const EXTRACTION_PROMPT: &str = r#"You extract entities from wiki pages into a knowledge graph.

Identify the people, tasks, projects and concepts the page talks about. For each one, emit:
- "name": the entity name exactly as the page spells it
- "type": one of "person", "task", "project", "concept", "document"
- "fact": one short sentence from the page asserting something about the entity

Respond with JSON only, no prose:
{"entities": [{"name": "...", "type": "...", "fact": "..."}]}

Rules:
- At most 20 entities, most important first.
- Skip generic words and section headings.
- The fact must restate what the page says, not your own knowledge."#;

const VALID_TIME_PROMPT: &str = r#"You read a fact taken from a wiki page and decide when it holds.

Given the reference time (when the page was saved) and the fact, respond with JSON only:
{"valid_at": "<RFC3339 timestamp or null>", "invalid_at": "<RFC3339 timestamp or null>"}

Rules:
- "valid_at" is when the fact became true. Use an explicit date in the fact if it names one, otherwise null.
- "invalid_at" is when the fact stopped being true, or null if it still holds.
- Never invent dates; when the fact gives no temporal hint, return null for both."#;
