//! Voice activity gate (spec §4.2, C2) and the adaptive speech-activity
//! analysis used by diarisation (spec §4.7: "diarisation has its own
//! thresholds").
//!
//! Grounded on the teacher's `SileroVAD` energy/spectral heuristics
//! (`audio::vad::SileroVAD` in the source repo); the real Silero model
//! invocation is a native-runtime binding shim and out of scope per spec §1,
//! so `SpeechActivityAnalyzer` below keeps the teacher's energy-based
//! approximation rather than the ONNX model it stood in for.

use crate::audio::types::{AudioError, Sample, SpeechSegment, VADConfig, VADError, VADResult};

/// Minimum buffer length for the cheap pre-inference gate: 0.1 s at 16 kHz.
pub const MIN_GATE_SAMPLES: usize = 1_600;
const RMS_FLOOR: f32 = 0.005;
const MAX_AMPLITUDE_FLOOR: f32 = 0.01;

/// Rejects a buffer ("no speech") per spec §4.2: too short, too quiet (low
/// RMS), or effectively DC/constant (low peak amplitude). Used before
/// invoking any ASR engine; cheaper and coarser than
/// [`SpeechActivityAnalyzer`], which diarisation uses instead.
pub fn voice_activity_gate(samples: &[Sample]) -> bool {
    if samples.len() < MIN_GATE_SAMPLES {
        return false;
    }

    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms < RMS_FLOOR {
        return false;
    }

    let max_abs = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if max_abs < MAX_AMPLITUDE_FLOOR {
        return false;
    }

    true
}

/// Adaptive energy/spectral speech-activity analyzer used by diarisation,
/// which needs finer-grained speech-segment boundaries (and its own
/// threshold) rather than the binary pipeline gate above.
pub struct SpeechActivityAnalyzer {
    config: VADConfig,
    current_threshold: f32,
}

impl SpeechActivityAnalyzer {
    pub fn new(config: VADConfig) -> Result<Self, VADError> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(VADError::InvalidThreshold(config.threshold));
        }
        Ok(Self {
            current_threshold: config.threshold,
            config,
        })
    }

    pub fn analyze(&self, samples: &[Sample], sample_rate: u32) -> Result<VADResult, VADError> {
        if samples.is_empty() {
            return Err(VADError::EmptyAudio);
        }
        if sample_rate != crate::audio::types::CANONICAL_SAMPLE_RATE {
            return Err(VADError::UnsupportedSampleRate(sample_rate));
        }

        let clipped = samples.iter().filter(|&&s| s.abs() > 1.0).count();
        let has_clipping = clipped > samples.len() / 100;
        let estimated_snr = self.estimate_snr(samples);
        let speech_segments = self.detect_segments(samples, sample_rate);
        let has_speech = !speech_segments.is_empty();
        let confidence = if has_speech {
            speech_segments.iter().map(|s| s.confidence).sum::<f32>() / speech_segments.len() as f32
        } else {
            0.1
        };

        Ok(VADResult {
            has_speech,
            confidence,
            speech_segments,
            estimated_snr,
            has_clipping_warning: has_clipping,
        })
    }

    fn estimate_snr(&self, samples: &[Sample]) -> Option<f32> {
        let signal_power: f32 = samples.iter().map(|&x| x * x).sum::<f32>() / samples.len() as f32;
        let mut sorted: Vec<f32> = samples.iter().map(|x| x.abs()).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let noise_floor = sorted[sorted.len() / 4];
        if noise_floor > 0.0 {
            Some(10.0 * (signal_power / (noise_floor * noise_floor)).log10())
        } else {
            None
        }
    }

    fn detect_segments(&self, samples: &[Sample], sample_rate: u32) -> Vec<SpeechSegment> {
        let sr = sample_rate as f32;
        let window = (sr * 0.1) as usize;
        let hop = (window / 2).max(1);
        let mut segments = Vec::new();
        let mut current: Option<SpeechSegment> = None;

        for (i, win) in samples.chunks(hop).enumerate() {
            let t = (i * hop) as f32 / sr;
            let energy: f32 = win.iter().map(|&x| x * x).sum::<f32>() / win.len() as f32;
            let probability = if energy > 0.01 { 1.0 } else { 0.0 };
            let is_speech = probability > self.current_threshold;

            match (&mut current, is_speech) {
                (None, true) => {
                    current = Some(SpeechSegment {
                        start_time: t,
                        end_time: t + hop as f32 / sr,
                        confidence: probability,
                    });
                }
                (Some(seg), true) => {
                    seg.end_time = t + hop as f32 / sr;
                    seg.confidence = (seg.confidence + probability) / 2.0;
                }
                (Some(seg), false) => {
                    let duration_ms = (seg.end_time - seg.start_time) * 1000.0;
                    if duration_ms >= self.config.min_speech_duration_ms as f32 {
                        segments.push(seg.clone());
                    }
                    current = None;
                }
                (None, false) => {}
            }
        }
        if let Some(seg) = current {
            let duration_ms = (seg.end_time - seg.start_time) * 1000.0;
            if duration_ms >= self.config.min_speech_duration_ms as f32 {
                segments.push(seg);
            }
        }
        segments
    }
}

impl From<VADError> for AudioError {
    fn from(e: VADError) -> Self {
        AudioError::ProcessingFailed {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        assert!(!voice_activity_gate(&[0.5; 100]));
    }

    #[test]
    fn rejects_silence() {
        assert!(!voice_activity_gate(&[0.0; 4_000]));
    }

    #[test]
    fn rejects_low_rms_noise() {
        let samples: Vec<f32> = (0..4_000).map(|i| if i % 50 == 0 { 0.02 } else { 0.0 }).collect();
        assert!(!voice_activity_gate(&samples));
    }

    #[test]
    fn accepts_clear_speech_like_signal() {
        let samples: Vec<f32> = (0..4_000)
            .map(|i| 0.3 * (i as f32 * 0.05).sin())
            .collect();
        assert!(voice_activity_gate(&samples));
    }

    #[test]
    fn analyzer_rejects_wrong_sample_rate() {
        let analyzer = SpeechActivityAnalyzer::new(VADConfig::default()).unwrap();
        let err = analyzer.analyze(&[0.1; 1600], 8000).unwrap_err();
        assert!(matches!(err, VADError::UnsupportedSampleRate(8000)));
    }
}
