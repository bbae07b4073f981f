//! E2E BPE engine (FluidASR-style, spec §4.3): "same collapsing rules as CTC
//! but the vocabulary is BPE, and `▁`-prefixed tokens start new words; tokens
//! without `▁` concatenate to the current word."
//!
//! Shares the blank-skip/repeat-collapse rule with [`crate::asr::ctc`] but
//! groups at the subword-piece level rather than the character level.

use crate::asr::ctc::{CtcFrame, WORD_BOUNDARY_TOKEN};
use crate::asr::engine::Engine;
use crate::asr::types::{ASRError, TranscriptSegment, TranscriptWord};
use async_trait::async_trait;
use tokio::sync::Mutex;

pub trait BpeBackend: Send + Sync {
    fn run(&self, samples: &[f32]) -> Result<Vec<CtcFrame>, ASRError>;
    /// Full subword pieces; a piece prefixed with `▁` starts a new word.
    fn vocab(&self) -> &[String];
    fn blank_index(&self) -> usize;
    fn frame_duration_ms(&self) -> u64;
    fn name(&self) -> &str;
}

struct UnloadedBackend;

impl BpeBackend for UnloadedBackend {
    fn run(&self, _samples: &[f32]) -> Result<Vec<CtcFrame>, ASRError> {
        Err(ASRError::ModelNotLoaded("no BPE model loaded".to_string()))
    }
    fn vocab(&self) -> &[String] {
        &[]
    }
    fn blank_index(&self) -> usize {
        0
    }
    fn frame_duration_ms(&self) -> u64 {
        20
    }
    fn name(&self) -> &str {
        "unloaded"
    }
}

/// Greedy BPE decode: blank-skip and repeat-collapse as in CTC, grouping
/// pieces into words on the `▁` prefix (spec §4.3).
pub fn greedy_bpe_decode(
    frames: &[CtcFrame],
    vocab: &[String],
    blank_index: usize,
    frame_duration_ms: u64,
) -> Vec<TranscriptWord> {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut start_frame: Option<usize> = None;
    let mut end_frame = 0usize;
    let mut probs: Vec<f32> = Vec::new();
    let mut prev_index: Option<usize> = None;

    macro_rules! flush {
        () => {
            if !text.is_empty() {
                let p = probs.iter().sum::<f32>() / probs.len().max(1) as f32;
                words.push(TranscriptWord {
                    start_ms: start_frame.unwrap_or(0) as u64 * frame_duration_ms,
                    end_ms: (end_frame as u64 + 1) * frame_duration_ms,
                    text: std::mem::take(&mut text),
                    p,
                    speaker: None,
                });
            }
            text.clear();
            start_frame = None;
            probs.clear();
        };
    }

    for (i, frame) in frames.iter().enumerate() {
        if frame.index == blank_index {
            prev_index = None;
            continue;
        }
        if Some(frame.index) == prev_index {
            // repeat collapse: same piece re-emitted, just extends the span
            end_frame = i;
            probs.push(frame.p);
            continue;
        }
        prev_index = Some(frame.index);

        let piece = match vocab.get(frame.index) {
            Some(p) => p.as_str(),
            None => continue,
        };

        if let Some(stripped) = piece.strip_prefix(WORD_BOUNDARY_TOKEN) {
            flush!();
            start_frame = Some(i);
            text.push_str(stripped);
        } else {
            if start_frame.is_none() {
                start_frame = Some(i);
            }
            text.push_str(piece);
        }
        end_frame = i;
        probs.push(frame.p);
    }
    flush!();

    words
}

pub struct BpeEngine {
    name: String,
    backend: Mutex<Box<dyn BpeBackend>>,
    language: Mutex<Option<String>>,
    supported_languages: Vec<String>,
}

impl BpeEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: Mutex::new(Box::new(UnloadedBackend)),
            language: Mutex::new(None),
            supported_languages: vec!["en".to_string(), "ru".to_string()],
        }
    }

    pub async fn install_backend(&self, backend: Box<dyn BpeBackend>) {
        *self.backend.lock().await = backend;
    }

    async fn decode(&self, samples: &[f32]) -> Result<Vec<TranscriptWord>, ASRError> {
        if samples.len() < 1600 {
            return Err(ASRError::InputTooShort);
        }
        let backend = self.backend.lock().await;
        let frames = backend.run(samples)?;
        Ok(greedy_bpe_decode(&frames, backend.vocab(), backend.blank_index(), backend.frame_duration_ms()))
    }
}

#[async_trait]
impl Engine for BpeEngine {
    async fn transcribe(&self, samples: &[f32], _use_context: bool) -> Result<String, ASRError> {
        let words = self.decode(samples).await?;
        Ok(words.into_iter().map(|w| w.text).collect::<Vec<_>>().join(" "))
    }

    async fn transcribe_with_segments(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError> {
        let words = self.decode(samples).await?;
        if words.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TranscriptSegment::from_words(words, None)])
    }

    async fn transcribe_high_quality(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError> {
        self.transcribe_with_segments(samples).await
    }

    fn set_language(&mut self, language: Option<String>) {
        *self.language.get_mut() = language;
    }

    fn set_model(&mut self, _path_or_id: String) -> Result<(), ASRError> {
        Ok(())
    }

    fn close(&mut self) {
        *self.backend.get_mut() = Box::new(UnloadedBackend);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_languages(&self) -> &[String] {
        &self.supported_languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<String> {
        vec!["<blank>", "\u{2581}hello", "\u{2581}wor", "ld"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn boundary_prefixed_piece_starts_new_word() {
        let v = vocab();
        let frames = vec![
            CtcFrame { index: 1, p: 0.9 }, // ▁hello
            CtcFrame { index: 2, p: 0.9 }, // ▁wor
            CtcFrame { index: 3, p: 0.8 }, // ld (continues)
        ];
        let words = greedy_bpe_decode(&frames, &v, 0, 20);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hello");
        assert_eq!(words[1].text, "world");
    }

    #[test]
    fn repeat_collapses_like_ctc() {
        let v = vocab();
        let frames = vec![
            CtcFrame { index: 1, p: 0.9 },
            CtcFrame { index: 1, p: 0.8 }, // repeat, collapses
        ];
        let words = greedy_bpe_decode(&frames, &v, 0, 20);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "hello");
    }

    #[test]
    fn blank_resets_collapse_state() {
        let v = vocab();
        let frames = vec![
            CtcFrame { index: 1, p: 0.9 },
            CtcFrame { index: 0, p: 0.9 }, // blank
            CtcFrame { index: 1, p: 0.9 }, // same piece again, distinct word start
        ];
        let words = greedy_bpe_decode(&frames, &v, 0, 20);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hello");
        assert_eq!(words[1].text, "hello");
    }
}
