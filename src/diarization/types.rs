//! Diarisation type definitions (spec §3 "SpeakerSegment", §4.7, §7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output of diarisation (spec §3): speaker IDs are dense, normalised
/// starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub start_s: f64,
    pub end_s: f64,
    pub speaker_id: u32,
}

impl SpeakerSegment {
    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }

    /// Overlap in seconds with `[start_s, end_s)`, used to map speakers onto
    /// transcript segments (spec §4.7).
    pub fn overlap_seconds(&self, start_s: f64, end_s: f64) -> f64 {
        (self.end_s.min(end_s) - self.start_s.max(start_s)).max(0.0)
    }
}

/// A fixed-length, L2-normalised speaker embedding for one candidate segment
/// (spec §4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding {
    pub vector: Vec<f32>,
    pub start_s: f64,
    pub end_s: f64,
}

impl SpeakerEmbedding {
    /// Cosine similarity in `[-1, 1]`; assumes (but does not require) that
    /// `vector` is L2-normalised.
    pub fn cosine_similarity(&self, other: &SpeakerEmbedding) -> f32 {
        let dot: f32 = self.vector.iter().zip(other.vector.iter()).map(|(a, b)| a * b).sum();
        let norm_a = self.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b = other.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    /// Cosine distance (`1 - similarity`), the quantity clustering compares
    /// against a threshold (spec §4.7).
    pub fn cosine_distance(&self, other: &SpeakerEmbedding) -> f32 {
        1.0 - self.cosine_similarity(other)
    }

    pub fn l2_normalize(&mut self) {
        let norm = self.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.vector {
                *v /= norm;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiarizationConfig {
    /// Cosine-distance threshold below which two embeddings are unioned into
    /// the same speaker (spec §4.7 default 0.65).
    pub clustering_threshold: f32,
    /// Candidate segments shorter than this are skipped before embedding
    /// extraction (spec §4.7: "segments < 0.1 s skipped").
    pub min_segment_duration_s: f64,
    /// Minimum gap between segments forwarded to the external pipeline
    /// (spec §6).
    pub min_gap_duration_s: f64,
    /// VBx iteration cap forwarded to the external pipeline (spec §6).
    pub vbx_max_iterations: u32,
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            clustering_threshold: 0.65,
            min_segment_duration_s: 0.1,
            min_gap_duration_s: 0.2,
            vbx_max_iterations: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiarizationError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("embedding extraction failed: {0}")]
    EmbeddingFailed(String),

    #[error("subprocess failed (exit {exit_code:?}): {stderr}")]
    SubprocessFailed { exit_code: Option<i32>, stderr: String },

    #[error("decoding error: {0}")]
    Decoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_embeddings_have_similarity_one() {
        let a = SpeakerEmbedding { vector: vec![1.0, 0.0, 0.0], start_s: 0.0, end_s: 1.0 };
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_embeddings_have_zero_similarity() {
        let a = SpeakerEmbedding { vector: vec![1.0, 0.0], start_s: 0.0, end_s: 1.0 };
        let b = SpeakerEmbedding { vector: vec![0.0, 1.0], start_s: 0.0, end_s: 1.0 };
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn overlap_seconds_computes_intersection() {
        let seg = SpeakerSegment { start_s: 1.0, end_s: 3.0, speaker_id: 0 };
        assert!((seg.overlap_seconds(2.0, 4.0) - 1.0).abs() < 1e-6);
        assert!((seg.overlap_seconds(5.0, 6.0)).abs() < 1e-6);
    }
}
