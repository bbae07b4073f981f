//! ASR engine interface (spec §4.3, C3) and the GPU-conflict classifier
//! (spec §5, §9).

use crate::asr::types::{ASRError, TranscriptSegment};
use async_trait::async_trait;

/// Uniform contract every ASR engine implements (spec §4.3).
///
/// Object-safe via `async_trait` so the hybrid transcriber (C6) can hold two
/// `Box<dyn Engine>` values without knowing their concrete family — the
/// "sum type or object-safe trait" choice spec §9 calls out explicitly.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Plain-text transcription. `use_context` lets callers opt into
    /// whatever contextual conditioning (previous segments, speaker
    /// adaptation) the engine supports.
    async fn transcribe(&self, samples: &[f32], use_context: bool) -> Result<String, ASRError>;

    /// Segment-level transcription, ordered by start time, words ordered
    /// within a segment (spec §4.3 output contract).
    async fn transcribe_with_segments(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError>;

    /// Slower, higher-accuracy pass used for full-session re-transcription
    /// (spec §4.11).
    async fn transcribe_high_quality(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError>;

    fn set_language(&mut self, language: Option<String>);

    fn set_model(&mut self, path_or_id: String) -> Result<(), ASRError>;

    fn close(&mut self);

    fn name(&self) -> &str;

    fn supported_languages(&self) -> &[String];
}

/// GPU backend an engine's inference runs on, used only to decide whether
/// two engines may run concurrently (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackend {
    None,
    Metal,
    CoreML,
}

/// Concurrent execution of a Metal engine and a CoreML engine is known to
/// crash the GPU driver on Apple hardware (spec §5); every other pairing,
/// including same-backend pairs, is safe to parallelise.
pub fn requires_sequential_execution(a: GpuBackend, b: GpuBackend) -> bool {
    matches!(
        (a, b),
        (GpuBackend::Metal, GpuBackend::CoreML) | (GpuBackend::CoreML, GpuBackend::Metal)
    )
}
