//! Lexicon-based sentiment scoring.

use std::collections::HashSet;

use async_trait::async_trait;

use parley_core::{BackendError, EnrichmentKind, EnrichmentValue, Sentiment, SentimentLabel};

use crate::gateway::EnrichmentBackend;

const POSITIVE: &[&str] = &[
    "amazing", "appreciate", "awesome", "beautiful", "best", "better", "brilliant", "calm",
    "delighted", "enjoy", "excellent", "excited", "fantastic", "fine", "glad", "good", "great",
    "happy", "helpful", "love", "lovely", "nice", "perfect", "pleased", "sunny", "thank",
    "thanks", "useful", "win", "wonderful",
];

const NEGATIVE: &[&str] = &[
    "angry", "annoyed", "awful", "bad", "boring", "broken", "bug", "confused", "crash", "fail",
    "failed", "frustrated", "hate", "horrible", "problem", "sad", "slow", "sorry", "stuck",
    "terrible", "tired", "ugly", "upset", "useless", "worried", "worse", "worst", "wrong",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "wasn't", "can't", "won't",
];

/// Polarity above this is positive, below its negation negative.
const NEUTRAL_BAND: f32 = 0.1;

/// Scores sentiment by counting lexicon hits. A negator flips the next
/// sentiment word within two tokens.
pub struct LexiconSentimentBackend {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
    negators: HashSet<&'static str>,
}

impl LexiconSentimentBackend {
    pub fn new() -> Self {
        Self {
            positive: POSITIVE.iter().copied().collect(),
            negative: NEGATIVE.iter().copied().collect(),
            negators: NEGATORS.iter().copied().collect(),
        }
    }

    pub fn score(&self, text: &str) -> Sentiment {
        let mut total = 0i32;
        let mut hits = 0i32;
        let mut negate_window = 0u8;

        for raw in text.split_whitespace() {
            let word = raw
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            if self.negators.contains(word.as_str()) {
                negate_window = 2;
                continue;
            }

            let value = if self.positive.contains(word.as_str()) {
                1
            } else if self.negative.contains(word.as_str()) {
                -1
            } else {
                0
            };

            if value != 0 {
                total += if negate_window > 0 { -value } else { value };
                hits += 1;
                negate_window = 0;
            } else {
                negate_window = negate_window.saturating_sub(1);
            }
        }

        let polarity = if hits == 0 {
            0.0
        } else {
            (total as f32 / hits as f32).clamp(-1.0, 1.0)
        };

        let (label, score) = if polarity > NEUTRAL_BAND {
            (SentimentLabel::Positive, 0.5 + 0.5 * polarity)
        } else if polarity < -NEUTRAL_BAND {
            (SentimentLabel::Negative, 0.5 + 0.5 * polarity.abs())
        } else {
            (SentimentLabel::Neutral, 1.0 - polarity.abs())
        };

        Sentiment {
            label,
            score,
            polarity,
        }
    }
}

impl Default for LexiconSentimentBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichmentBackend for LexiconSentimentBackend {
    fn name(&self) -> &str {
        "lexicon-sentiment"
    }

    async fn run(&self, kind: &EnrichmentKind, text: &str) -> Result<EnrichmentValue, BackendError> {
        if *kind != EnrichmentKind::SENTIMENT {
            return Err(BackendError::Unsupported(format!(
                "{} cannot serve '{}'",
                self.name(),
                kind
            )));
        }
        Ok(EnrichmentValue::Sentiment(self.score(text)))
    }
}
