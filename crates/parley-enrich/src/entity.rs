//! Pattern-based entity extraction.

use async_trait::async_trait;
use regex::Regex;

use parley_core::{BackendError, EnrichmentKind, EnrichmentValue, Entity};

use crate::gateway::EnrichmentBackend;

/// Extracts entities (URLs, dates, money, hashtags, capitalized names) from
/// text with pre-compiled patterns.
///
/// Matches are reported in text order. When spans overlap, the earlier
/// pattern in the list above wins.
pub struct PatternEntityBackend {
    patterns: Vec<(&'static str, Regex)>,
    name_regex: Regex,
}

impl PatternEntityBackend {
    pub fn new() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("static entity pattern");
        Self {
            patterns: vec![
                ("URL", compile(r#"https?://[^\s<>")\]]+"#)),
                ("DATE", compile(r#"\b\d{4}-\d{2}-\d{2}\b"#)),
                (
                    "DATE",
                    compile(
                        r#"(?i)\b(yesterday|today|tomorrow|tonight|(?:last|next)\s+(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|week|month|year))\b"#,
                    ),
                ),
                (
                    "MONEY",
                    compile(
                        r#"(?i)(?:\$\d[\d,]*(?:\.\d{2})?|\b\d[\d,]*(?:\.\d{2})?\s*(?:USD|EUR|GBP|dollars?|euros?))"#,
                    ),
                ),
                ("TAG", compile(r#"#[a-zA-Z][a-zA-Z0-9_-]+"#)),
            ],
            name_regex: compile(r#"\b[A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+)*\b"#),
        }
    }

    /// Extract all recognized entities from `text`.
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = Vec::new();

        for (label, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                push_unless_overlapping(&mut entities, label, m.start(), m.as_str());
            }
        }

        for m in self.name_regex.find_iter(text) {
            let (start, name) = strip_common_prefix(m.start(), m.as_str());
            if !name.is_empty() && !is_common_word(name) {
                push_unless_overlapping(&mut entities, "NAME", start, name);
            }
        }

        entities.sort_by_key(|e| e.start);
        entities
    }
}

impl Default for PatternEntityBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichmentBackend for PatternEntityBackend {
    fn name(&self) -> &str {
        "pattern-entities"
    }

    async fn run(&self, kind: &EnrichmentKind, text: &str) -> Result<EnrichmentValue, BackendError> {
        if *kind != EnrichmentKind::ENTITIES {
            return Err(BackendError::Unsupported(format!(
                "{} cannot serve '{}'",
                self.name(),
                kind
            )));
        }
        Ok(EnrichmentValue::Entities(self.extract(text)))
    }
}

fn push_unless_overlapping(entities: &mut Vec<Entity>, label: &str, start: usize, text: &str) {
    let end = start + text.len();
    if entities.iter().any(|e| start < e.end && e.start < end) {
        return;
    }
    entities.push(Entity {
        text: text.to_string(),
        label: label.to_string(),
        start,
        end,
    });
}

/// Drop leading capitalized function words ("What Paris" -> "Paris") that
/// the name pattern picks up at sentence starts.
fn strip_common_prefix(mut start: usize, mut name: &str) -> (usize, &str) {
    loop {
        let Some((first, rest)) = name.split_once(char::is_whitespace) else {
            return (start, name);
        };
        if !is_common_word(first) {
            return (start, name);
        }
        let trimmed = rest.trim_start();
        start += name.len() - trimmed.len();
        name = trimmed;
    }
}

/// Returns true for capitalized words that are rarely names.
fn is_common_word(s: &str) -> bool {
    matches!(
        s,
        "The"
            | "A"
            | "An"
            | "I"
            | "I'm"
            | "It"
            | "Is"
            | "Are"
            | "Was"
            | "Do"
            | "Does"
            | "Did"
            | "Can"
            | "Could"
            | "Would"
            | "Should"
            | "Will"
            | "Please"
            | "Tell"
            | "Show"
            | "See"
            | "Ask"
            | "Find"
            | "Give"
            | "Get"
            | "Let"
            | "Make"
            | "Yes"
            | "No"
            | "Ok"
            | "Okay"
            | "Hi"
            | "Hello"
            | "Thanks"
            | "This"
            | "That"
            | "These"
            | "Those"
            | "There"
            | "Here"
            | "When"
            | "Where"
            | "What"
            | "Which"
            | "Who"
            | "Why"
            | "How"
            | "They"
            | "We"
            | "You"
            | "My"
            | "Your"
            | "Monday"
            | "Tuesday"
            | "Wednesday"
            | "Thursday"
            | "Friday"
            | "Saturday"
            | "Sunday"
            | "January"
            | "February"
            | "March"
            | "April"
            | "May"
            | "June"
            | "July"
            | "August"
            | "September"
            | "October"
            | "November"
            | "December"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> PatternEntityBackend {
        PatternEntityBackend::new()
    }

    fn texts(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn test_extract_place_name_from_question() {
        let entities = extractor().extract("What is the weather in Paris?");
        assert_eq!(texts(&entities), vec!["Paris"]);
        assert_eq!(entities[0].label, "NAME");
        assert_eq!(entities[0].start, 23);
        assert_eq!(entities[0].end, 28);
    }

    #[test]
    fn test_extract_multiword_name() {
        let entities = extractor().extract("I met Ada Lovelace in London yesterday.");
        assert_eq!(texts(&entities), vec!["Ada Lovelace", "London", "yesterday"]);
        assert_eq!(entities[2].label, "DATE");
    }

    #[test]
    fn test_sentence_initial_function_word_is_stripped() {
        let entities = extractor().extract("Where Rust Belt towns grew");
        assert_eq!(texts(&entities), vec!["Rust Belt"]);
        assert_eq!(entities[0].start, 6);
    }

    #[test]
    fn test_extract_urls_dates_money_tags() {
        let text = "See https://example.com/Docs on 2024-03-01, budget $1,200.50 for #launch";
        let entities = extractor().extract(text);
        let labels: Vec<&str> = entities.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["URL", "DATE", "MONEY", "TAG"]);
        assert_eq!(entities[0].text, "https://example.com/Docs");
    }

    #[test]
    fn test_capitalized_word_inside_url_not_reported_twice() {
        let entities = extractor().extract("https://example.com/Paris");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, "URL");
    }

    #[test]
    fn test_no_entities() {
        assert!(extractor().extract("nothing to see here").is_empty());
        assert!(extractor().extract("").is_empty());
    }

    #[test]
    fn test_offsets_index_into_source() {
        let text = "Ask Grace about the #migration";
        for e in extractor().extract(text) {
            assert_eq!(&text[e.start..e.end], e.text);
        }
    }

    #[tokio::test]
    async fn test_backend_serves_entities_only() {
        let backend = extractor();
        let value = backend
            .run(&EnrichmentKind::ENTITIES, "Hello Berlin")
            .await
            .unwrap();
        match value {
            EnrichmentValue::Entities(list) => assert_eq!(list[0].text, "Berlin"),
            other => panic!("unexpected payload {:?}", other),
        }

        let err = backend
            .run(&EnrichmentKind::SENTIMENT, "Hello Berlin")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}
