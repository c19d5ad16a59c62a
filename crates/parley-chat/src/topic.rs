//! Topic derivation from an analysis bundle.

use parley_core::EnrichmentBundle;

/// Pick the topic of a turn from its analysis.
///
/// The entity with the longest text wins; failing that, the key phrase with
/// the highest importance. Ties go to the first occurrence in each list.
/// Text length is counted in characters.
pub fn extract_topic(analysis: &EnrichmentBundle) -> Option<String> {
    if let Some(entities) = analysis.entities() {
        let mut best: Option<(usize, &str)> = None;
        for entity in entities {
            let len = entity.text.chars().count();
            if best.map_or(true, |(best_len, _)| len > best_len) {
                best = Some((len, entity.text.as_str()));
            }
        }
        if let Some((_, text)) = best {
            return Some(text.to_string());
        }
    }

    if let Some(phrases) = analysis.key_phrases() {
        let mut best: Option<(f32, &str)> = None;
        for phrase in phrases {
            if best.map_or(true, |(score, _)| phrase.importance > score) {
                best = Some((phrase.importance, phrase.text.as_str()));
            }
        }
        if let Some((_, text)) = best {
            return Some(text.to_string());
        }
    }

    None
}

/// Whether `text` reads as a question.
pub fn is_question(text: &str) -> bool {
    text.contains(['?', '？'])
}
