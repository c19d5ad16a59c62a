//! Extractive summaries.

use std::collections::HashSet;

use async_trait::async_trait;

use parley_core::{BackendError, EnrichmentKind, EnrichmentValue};

use crate::gateway::EnrichmentBackend;

/// Picks the highest-scoring sentences of a text and joins them in their
/// original order.
pub struct ExtractiveSummaryBackend {
    max_sentences: usize,
}

impl ExtractiveSummaryBackend {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    pub fn summarize(&self, text: &str) -> String {
        let sentences: Vec<&str> = split_sentences(text)
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if sentences.len() <= self.max_sentences {
            return sentences.join(" ");
        }

        let mut picked = rank_sentences(&sentences, self.max_sentences);
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|idx| sentences[idx])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for ExtractiveSummaryBackend {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl EnrichmentBackend for ExtractiveSummaryBackend {
    fn name(&self) -> &str {
        "extractive-summary"
    }

    async fn run(&self, kind: &EnrichmentKind, text: &str) -> Result<EnrichmentValue, BackendError> {
        if *kind != EnrichmentKind::SUMMARY {
            return Err(BackendError::Unsupported(format!(
                "{} cannot serve '{}'",
                self.name(),
                kind
            )));
        }
        Ok(EnrichmentValue::Text(self.summarize(text)))
    }
}

/// Split on `.` `!` `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    result.push(&text[start..end]);
                    start = end;
                }
            }
        }
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

/// Indices of the `top_k` best sentences, scored as
/// unique terms * sqrt(total terms). Ties favor earlier sentences.
fn rank_sentences(sentences: &[&str], top_k: usize) -> Vec<usize> {
    let mut scored: Vec<(f64, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(idx, sent)| {
            let words: Vec<String> = sent
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect();
            let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
            let score = (unique.len() as f64) * (words.len() as f64).sqrt();
            (score, idx)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, idx)| idx).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_returned_whole() {
        let backend = ExtractiveSummaryBackend::default();
        assert_eq!(backend.summarize("  One line only.  "), "One line only.");
        assert_eq!(backend.summarize(""), "");
    }

    #[test]
    fn test_keeps_longest_sentences_in_original_order() {
        let backend = ExtractiveSummaryBackend::new(2);
        let text = "Short one. The deployment pipeline now runs integration tests on every \
                    merge request. Ok. Release notes are generated from merged pull request titles.";
        let summary = backend.summarize(text);
        assert_eq!(
            summary,
            "The deployment pipeline now runs integration tests on every merge request. \
             Release notes are generated from merged pull request titles."
        );
    }

    #[test]
    fn test_split_sentences_handles_terminal_punctuation() {
        let parts = split_sentences("Is it? Yes! Done.");
        assert_eq!(parts, vec!["Is it?", " Yes!", " Done."]);
        assert_eq!(split_sentences("v1.2 is out"), vec!["v1.2 is out"]);
    }

    #[tokio::test]
    async fn test_backend_produces_text_payload() {
        let value = ExtractiveSummaryBackend::default()
            .run(&EnrichmentKind::SUMMARY, "Hello there.")
            .await
            .unwrap();
        assert_eq!(value, EnrichmentValue::Text("Hello there.".into()));
    }
}
