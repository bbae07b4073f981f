//! ASR-related type definitions (spec §3, §4.3, §7)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single recognised word with timing and confidence (spec §3
/// "TranscriptWord").
///
/// Invariant: `end_ms > start_ms`. The `end_ms - start_ms <= 2000` bound is
/// only guaranteed *after* dialogue-assembly timestamp repair (§4.8 step 1);
/// raw engine output may violate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub p: f32,
    pub speaker: Option<u32>,
}

impl TranscriptWord {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn midpoint_ms(&self) -> f64 {
        (self.start_ms as f64 + self.end_ms as f64) / 2.0
    }
}

/// A contiguous span of words attributed to (at most) one speaker (spec §3
/// "TranscriptSegment").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub speaker: Option<u32>,
    pub words: Vec<TranscriptWord>,
}

impl TranscriptSegment {
    /// Builds a segment from words, deriving bounds as `min(start)` /
    /// `max(end)` over the words per spec §3 invariant.
    pub fn from_words(words: Vec<TranscriptWord>, speaker: Option<u32>) -> Self {
        let start_ms = words.iter().map(|w| w.start_ms).min().unwrap_or(0);
        let end_ms = words.iter().map(|w| w.end_ms).max().unwrap_or(0);
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            start_ms,
            end_ms,
            text,
            speaker,
            words,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn average_confidence(&self) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }
        self.words.iter().map(|w| w.p).sum::<f32>() / self.words.len() as f32
    }
}

/// ASR processing errors (spec §7).
#[derive(Debug, Error)]
pub enum ASRError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// Not a failure in the propagation sense; callers should treat this the
    /// same as an empty result (spec §7).
    #[error("input too short for inference")]
    InputTooShort,

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Which language a word or segment should be checked against, inferred
/// from script (spec §4.5 criterion D, §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptLanguage {
    Ru,
    En,
}

/// Detects language from script: any Cyrillic codepoint implies Russian,
/// otherwise English (spec §4.5 criterion D / §4.12).
pub fn detect_script_language(text: &str) -> ScriptLanguage {
    if text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c)) {
        ScriptLanguage::Ru
    } else {
        ScriptLanguage::En
    }
}

/// True if `text` contains at least one Latin letter (spec §4.5 criterion B).
pub fn contains_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_bounds_derive_from_words() {
        let words = vec![
            TranscriptWord { start_ms: 500, end_ms: 900, text: "hi".into(), p: 0.9, speaker: None },
            TranscriptWord { start_ms: 900, end_ms: 1400, text: "there".into(), p: 0.8, speaker: None },
        ];
        let seg = TranscriptSegment::from_words(words, Some(0));
        assert_eq!(seg.start_ms, 500);
        assert_eq!(seg.end_ms, 1400);
        assert_eq!(seg.text, "hi there");
    }

    #[test]
    fn script_detection_cyrillic_vs_latin() {
        assert_eq!(detect_script_language("привет"), ScriptLanguage::Ru);
        assert_eq!(detect_script_language("hello"), ScriptLanguage::En);
        assert!(contains_latin("Genesis"));
        assert!(!contains_latin("джинезис"));
    }
}
