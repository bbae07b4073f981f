//! Speaker embedding extraction (spec §4.7).
//!
//! The real embedding model (3D-Speaker ERes2NetV2 in the teacher, loaded via
//! ONNX Runtime) is a native-runtime binding and out of scope (spec §1, §4.7
//! AMBIENT note). What stays in scope is the trait boundary plus one
//! deterministic reference implementation good enough to exercise clustering
//! in tests: log-mel-style frame statistics, L2-normalised, grounded in the
//! teacher's own spectral-feature fallback (`compute_audio_based_embedding`)
//! and its cosine-similarity method on `SpeakerEmbedding`.

use super::types::SpeakerEmbedding;

/// Minimum audio length accepted for embedding extraction (spec §4.7:
/// "segments < 0.1 s skipped").
pub const MIN_SEGMENT_SAMPLES_AT_16K: usize = 1600;

pub trait SpeakerEmbedder: Send + Sync {
    /// Extracts a fixed-length, L2-normalised embedding from one candidate
    /// segment of mono audio at `sample_rate`. Returns `None` if the segment
    /// is too short to embed reliably.
    fn embed(&self, samples: &[f32], sample_rate: u32, start_s: f64, end_s: f64) -> Option<SpeakerEmbedding>;

    fn dimension(&self) -> usize;
}

/// Deterministic reference embedder: five spectral/temporal statistics
/// (energy, zero-crossing rate, spectral centroid, spectral rolloff, frame-
/// to-frame energy flux) computed over overlapping frames, then summarised
/// as mean/stddev/min/max plus a binned histogram per statistic — the same
/// shape the teacher's fallback uses, minus the audio-hash filler dimensions
/// (those existed only to make the teacher's placeholder look model-like).
pub struct SpectralStatsEmbedder {
    pub dimension: usize,
}

impl Default for SpectralStatsEmbedder {
    fn default() -> Self {
        Self { dimension: 512 }
    }
}

impl SpectralStatsEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn zero_crossing_rate(frame: &[f32]) -> f32 {
        if frame.len() < 2 {
            return 0.0;
        }
        let crossings = frame.windows(2).filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0)).count();
        crossings as f32 / frame.len() as f32
    }

    fn spectral_centroid(frame: &[f32], sample_rate: u32) -> f32 {
        let mut weighted = 0.0;
        let mut magnitude_sum = 0.0;
        for (i, &s) in frame.iter().enumerate() {
            let freq = i as f32 * sample_rate as f32 / frame.len() as f32 / 2.0;
            let magnitude = s.abs();
            weighted += freq * magnitude;
            magnitude_sum += magnitude;
        }
        if magnitude_sum > 0.0 {
            weighted / magnitude_sum
        } else {
            0.0
        }
    }

    fn spectral_rolloff(frame: &[f32], sample_rate: u32) -> f32 {
        let mut magnitudes: Vec<f32> = frame.iter().map(|x| x.abs()).collect();
        magnitudes.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let total: f32 = magnitudes.iter().sum();
        let threshold = total * 0.85;
        let mut cumulative = 0.0;
        for (i, &m) in magnitudes.iter().enumerate() {
            cumulative += m;
            if cumulative >= threshold {
                return i as f32 * sample_rate as f32 / frame.len() as f32 / 2.0;
            }
        }
        sample_rate as f32 / 2.0
    }

    fn frame_features(frame: &[f32], sample_rate: u32, prev_energy: Option<f32>) -> [f32; 5] {
        let energy = frame.iter().map(|x| x * x).sum::<f32>().sqrt();
        let zcr = Self::zero_crossing_rate(frame);
        let centroid = Self::spectral_centroid(frame, sample_rate);
        let rolloff = Self::spectral_rolloff(frame, sample_rate);
        let flux = prev_energy.map(|p| (energy - p).abs()).unwrap_or(0.0);
        [energy, zcr, centroid, rolloff, flux]
    }
}

impl SpeakerEmbedder for SpectralStatsEmbedder {
    fn embed(&self, samples: &[f32], sample_rate: u32, start_s: f64, end_s: f64) -> Option<SpeakerEmbedding> {
        if samples.len() < MIN_SEGMENT_SAMPLES_AT_16K {
            return None;
        }

        let frame_size = 1024.min(samples.len());
        let hop_size = (frame_size / 2).max(1);

        let mut features: Vec<[f32; 5]> = Vec::new();
        let mut prev_energy = None;
        let mut i = 0;
        while i + frame_size <= samples.len() {
            let frame = &samples[i..i + frame_size];
            let feats = Self::frame_features(frame, sample_rate, prev_energy);
            prev_energy = Some(feats[0]);
            features.push(feats);
            i += hop_size;
        }
        if features.is_empty() {
            return None;
        }

        let mut vector = vec![0.0f32; self.dimension];
        let per_feature_dims = self.dimension / 5;
        for feat_idx in 0..5 {
            let values: Vec<f32> = features.iter().map(|f| f[feat_idx]).collect();
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
            let min_val = values.iter().fold(f32::INFINITY, |a, &b| a.min(b));
            let max_val = values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

            let base = feat_idx * per_feature_dims;
            if base + 3 < vector.len() {
                vector[base] = mean;
                vector[base + 1] = variance.sqrt();
                vector[base + 2] = min_val;
                vector[base + 3] = max_val;
            }

            let hist_start = base + 4;
            let hist_len = per_feature_dims.saturating_sub(4);
            if hist_len > 0 && max_val > min_val {
                let bin_width = (max_val - min_val) / hist_len as f32;
                for &v in &values {
                    let bin = (((v - min_val) / bin_width).floor() as usize).min(hist_len - 1);
                    vector[hist_start + bin] += 1.0;
                }
                let total: f32 = vector[hist_start..hist_start + hist_len].iter().sum();
                if total > 0.0 {
                    for slot in &mut vector[hist_start..hist_start + hist_len] {
                        *slot /= total;
                    }
                }
            }
        }

        let mut embedding = SpeakerEmbedding { vector, start_s, end_s };
        embedding.l2_normalize();
        Some(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.2)
            .collect()
    }

    #[test]
    fn too_short_segment_returns_none() {
        let embedder = SpectralStatsEmbedder::default();
        let samples = vec![0.0f32; 100];
        assert!(embedder.embed(&samples, 16_000, 0.0, 0.006).is_none());
    }

    #[test]
    fn embedding_is_l2_normalized() {
        let embedder = SpectralStatsEmbedder::default();
        let samples = sine(220.0, 16_000, 1.0);
        let embedding = embedder.embed(&samples, 16_000, 0.0, 1.0).unwrap();
        let norm: f32 = embedding.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn similar_audio_yields_higher_similarity_than_dissimilar_audio() {
        let embedder = SpectralStatsEmbedder::default();
        let a1 = embedder.embed(&sine(220.0, 16_000, 1.0), 16_000, 0.0, 1.0).unwrap();
        let a2 = embedder.embed(&sine(225.0, 16_000, 1.0), 16_000, 1.0, 2.0).unwrap();
        let b = embedder.embed(&sine(880.0, 16_000, 1.0), 16_000, 2.0, 3.0).unwrap();

        let sim_same = a1.cosine_similarity(&a2);
        let sim_diff = a1.cosine_similarity(&b);
        assert!(sim_same > sim_diff);
    }
}
