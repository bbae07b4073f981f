//! GigaAM-RNNT engine: frame-synchronous transducer decoding (spec §4.3).
//!
//! Per frame, the joint network may emit up to `max_symbols_per_step` (10)
//! non-blank symbols before the decoder advances to the next encoder frame;
//! the predictor's recurrent state only advances on a non-blank emission.
//! The encoder, predictor, and joint network themselves are external
//! collaborators; this module owns the frame-stepping control flow.

use crate::asr::ctc::WORD_BOUNDARY_TOKEN;
use crate::asr::engine::Engine;
use crate::asr::types::{ASRError, TranscriptSegment, TranscriptWord};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Spec §4.3: "at each frame emit up to max_symbols_per_step=10 non-blank
/// symbols, halting on blank".
pub const MAX_SYMBOLS_PER_STEP: usize = 10;

/// Opaque per-frame encoder output; the transducer backend is the only code
/// that interprets its contents.
#[derive(Debug, Clone)]
pub struct EncoderFrame(pub Vec<f32>);

/// Opaque recurrent predictor state, threaded through the decode loop and
/// only replaced on a non-blank emission.
#[derive(Debug, Clone)]
pub struct PredictorState(pub Vec<f32>);

/// One joint-network evaluation: either a non-blank symbol with its
/// posterior, or blank.
#[derive(Debug, Clone, Copy)]
pub struct JointStep {
    pub symbol: usize,
    pub p: f32,
}

pub trait RnntBackend: Send + Sync {
    fn encode(&self, samples: &[f32]) -> Result<Vec<EncoderFrame>, ASRError>;
    fn initial_state(&self) -> PredictorState;
    /// One joint-network step given the current encoder frame and predictor
    /// state.
    fn predict_and_join(&self, frame: &EncoderFrame, state: &PredictorState) -> JointStep;
    /// Advances the predictor's recurrent state after emitting `symbol`.
    fn advance_state(&self, state: &PredictorState, symbol: usize) -> PredictorState;
    fn vocab(&self) -> &[String];
    fn blank_index(&self) -> usize;
    fn word_boundary_index(&self) -> usize;
    fn frame_duration_ms(&self) -> u64;
    fn name(&self) -> &str;
}

struct UnloadedBackend;

impl RnntBackend for UnloadedBackend {
    fn encode(&self, _samples: &[f32]) -> Result<Vec<EncoderFrame>, ASRError> {
        Err(ASRError::ModelNotLoaded("no RNNT model loaded".to_string()))
    }
    fn initial_state(&self) -> PredictorState {
        PredictorState(Vec::new())
    }
    fn predict_and_join(&self, _frame: &EncoderFrame, _state: &PredictorState) -> JointStep {
        JointStep { symbol: 0, p: 0.0 }
    }
    fn advance_state(&self, state: &PredictorState, _symbol: usize) -> PredictorState {
        state.clone()
    }
    fn vocab(&self) -> &[String] {
        &[]
    }
    fn blank_index(&self) -> usize {
        0
    }
    fn word_boundary_index(&self) -> usize {
        1
    }
    fn frame_duration_ms(&self) -> u64 {
        20
    }
    fn name(&self) -> &str {
        "unloaded"
    }
}

/// A single emitted symbol with the encoder frame index it was produced at,
/// for timing purposes.
#[derive(Debug, Clone, Copy)]
struct Emission {
    frame_index: usize,
    symbol: usize,
    p: f32,
}

/// Greedy frame-synchronous RNNT decode (spec §4.3): per encoder frame, step
/// the joint network until it emits blank or `max_symbols_per_step` non-blank
/// symbols have been produced; the predictor state advances only on
/// non-blank emissions.
fn decode_emissions(frames: &[EncoderFrame], backend: &dyn RnntBackend) -> Vec<Emission> {
    let mut emissions = Vec::new();
    let mut state = backend.initial_state();

    for (frame_index, frame) in frames.iter().enumerate() {
        let mut symbols_this_step = 0;
        loop {
            if symbols_this_step >= MAX_SYMBOLS_PER_STEP {
                break;
            }
            let step = backend.predict_and_join(frame, &state);
            if step.symbol == backend.blank_index() {
                break;
            }
            emissions.push(Emission { frame_index, symbol: step.symbol, p: step.p });
            state = backend.advance_state(&state, step.symbol);
            symbols_this_step += 1;
        }
    }

    emissions
}

fn emissions_to_words(
    emissions: &[Emission],
    vocab: &[String],
    word_boundary_index: usize,
    frame_duration_ms: u64,
) -> Vec<TranscriptWord> {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut start_frame: Option<usize> = None;
    let mut end_frame = 0usize;
    let mut probs: Vec<f32> = Vec::new();

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

    for emission in emissions {
        if emission.symbol == word_boundary_index {
            flush!();
            continue;
        }
        if start_frame.is_none() {
            start_frame = Some(emission.frame_index);
        }
        if let Some(symbol) = vocab.get(emission.symbol) {
            text.push_str(symbol);
        }
        end_frame = emission.frame_index;
        probs.push(emission.p);
    }
    flush!();

    let _ = WORD_BOUNDARY_TOKEN; // shared constant, kept for doc cross-reference
    words
}

pub struct RnntEngine {
    name: String,
    backend: Mutex<Box<dyn RnntBackend>>,
    language: Mutex<Option<String>>,
    supported_languages: Vec<String>,
}

impl RnntEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: Mutex::new(Box::new(UnloadedBackend)),
            language: Mutex::new(None),
            supported_languages: vec!["ru".to_string()],
        }
    }

    pub async fn install_backend(&self, backend: Box<dyn RnntBackend>) {
        *self.backend.lock().await = backend;
    }

    async fn decode(&self, samples: &[f32]) -> Result<Vec<TranscriptWord>, ASRError> {
        if samples.len() < 1600 {
            return Err(ASRError::InputTooShort);
        }
        let backend = self.backend.lock().await;
        let frames = backend.encode(samples)?;
        let emissions = decode_emissions(&frames, backend.as_ref());
        Ok(emissions_to_words(
            &emissions,
            backend.vocab(),
            backend.word_boundary_index(),
            backend.frame_duration_ms(),
        ))
    }
}

#[async_trait]
impl Engine for RnntEngine {
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

    struct ScriptedBackend {
        vocab: Vec<String>,
        // one scripted joint step per call, consumed in order
        script: std::sync::Mutex<Vec<JointStep>>,
        frame_count: usize,
    }

    impl RnntBackend for ScriptedBackend {
        fn encode(&self, _samples: &[f32]) -> Result<Vec<EncoderFrame>, ASRError> {
            Ok((0..self.frame_count).map(|_| EncoderFrame(vec![0.0])).collect())
        }
        fn initial_state(&self) -> PredictorState {
            PredictorState(vec![0.0])
        }
        fn predict_and_join(&self, _frame: &EncoderFrame, _state: &PredictorState) -> JointStep {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                JointStep { symbol: 0, p: 1.0 }
            } else {
                script.remove(0)
            }
        }
        fn advance_state(&self, state: &PredictorState, _symbol: usize) -> PredictorState {
            state.clone()
        }
        fn vocab(&self) -> &[String] {
            &self.vocab
        }
        fn blank_index(&self) -> usize {
            0
        }
        fn word_boundary_index(&self) -> usize {
            1
        }
        fn frame_duration_ms(&self) -> u64 {
            20
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn vocab() -> Vec<String> {
        vec!["<blank>", "\u{2581}", "h", "i"].into_iter().map(String::from).collect()
    }

    #[test]
    fn halts_step_loop_on_blank() {
        let backend = ScriptedBackend {
            vocab: vocab(),
            script: std::sync::Mutex::new(vec![
                JointStep { symbol: 2, p: 0.9 }, // h
                JointStep { symbol: 3, p: 0.9 }, // i
                JointStep { symbol: 0, p: 0.9 }, // blank, halt this frame
            ]),
            frame_count: 1,
        };
        let frames = backend.encode(&[]).unwrap();
        let emissions = decode_emissions(&frames, &backend);
        assert_eq!(emissions.len(), 2);
        assert_eq!(emissions[0].symbol, 2);
        assert_eq!(emissions[1].symbol, 3);
    }

    #[test]
    fn caps_at_max_symbols_per_step() {
        let mut steps: Vec<JointStep> = (0..20).map(|_| JointStep { symbol: 2, p: 0.5 }).collect();
        steps.push(JointStep { symbol: 0, p: 1.0 });
        let backend = ScriptedBackend { vocab: vocab(), script: std::sync::Mutex::new(steps), frame_count: 1 };
        let frames = backend.encode(&[]).unwrap();
        let emissions = decode_emissions(&frames, &backend);
        assert_eq!(emissions.len(), MAX_SYMBOLS_PER_STEP);
    }

    #[test]
    fn word_boundary_splits_emissions_into_words() {
        let emissions = vec![
            Emission { frame_index: 0, symbol: 2, p: 0.9 },
            Emission { frame_index: 1, symbol: 3, p: 0.8 },
            Emission { frame_index: 2, symbol: 1, p: 0.95 },
            Emission { frame_index: 3, symbol: 2, p: 0.9 },
        ];
        let words = emissions_to_words(&emissions, &vocab(), 1, 20);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hi");
        assert_eq!(words[1].text, "h");
    }
}
