//! Key phrase extraction.
//!
//! A phrase is a maximal run of content words between stopwords or
//! punctuation. Importance is the number of words in the phrase, so longer
//! noun runs rank first.

use std::collections::HashSet;

use async_trait::async_trait;

use parley_core::{BackendError, EnrichmentKind, EnrichmentValue, KeyPhrase};

use crate::gateway::EnrichmentBackend;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from",
    "had", "has", "have", "he", "her", "him", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "just", "me", "more", "my", "no", "not", "of", "on", "or", "our", "out", "please",
    "she", "should", "so", "some", "tell", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "up", "us", "very", "was", "we", "were",
    "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Extracts key phrases ordered by descending importance.
pub struct KeyPhraseBackend {
    stopwords: HashSet<&'static str>,
    max_phrases: usize,
}

impl KeyPhraseBackend {
    pub fn new() -> Self {
        Self {
            stopwords: STOPWORDS.iter().copied().collect(),
            max_phrases: 10,
        }
    }

    /// Extract key phrases from `text`.
    ///
    /// Ties keep their order of appearance. Repeated phrases are reported
    /// once (case-insensitive).
    pub fn extract(&self, text: &str) -> Vec<KeyPhrase> {
        let mut phrases: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for raw in text.split_whitespace() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
            let ends_clause = raw
                .chars()
                .last()
                .map(|c| matches!(c, ',' | '.' | ';' | ':' | '!' | '?'))
                .unwrap_or(false);

            if word.is_empty() || self.stopwords.contains(word.to_lowercase().as_str()) {
                flush(&mut phrases, &mut current);
            } else {
                current.push(word);
            }
            if ends_clause {
                flush(&mut phrases, &mut current);
            }
        }
        flush(&mut phrases, &mut current);

        let mut seen = HashSet::new();
        let mut result: Vec<KeyPhrase> = phrases
            .into_iter()
            .filter(|words| !words.iter().all(|w| w.chars().all(|c| c.is_numeric())))
            .map(|words| words.join(" "))
            .filter(|phrase| seen.insert(phrase.to_lowercase()))
            .map(|phrase| KeyPhrase {
                importance: phrase.split(' ').count() as f32,
                text: phrase,
            })
            .collect();

        // Stable sort keeps appearance order among equal scores.
        result.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        result.truncate(self.max_phrases);
        result
    }
}

impl Default for KeyPhraseBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn flush<'a>(phrases: &mut Vec<Vec<&'a str>>, current: &mut Vec<&'a str>) {
    if !current.is_empty() {
        phrases.push(std::mem::take(current));
    }
}

#[async_trait]
impl EnrichmentBackend for KeyPhraseBackend {
    fn name(&self) -> &str {
        "key-phrases"
    }

    async fn run(&self, kind: &EnrichmentKind, text: &str) -> Result<EnrichmentValue, BackendError> {
        if *kind != EnrichmentKind::KEY_PHRASES {
            return Err(BackendError::Unsupported(format!(
                "{} cannot serve '{}'",
                self.name(),
                kind
            )));
        }
        Ok(EnrichmentValue::KeyPhrases(self.extract(text)))
    }
}
