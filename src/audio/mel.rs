//! Log-mel spectrogram front-end (spec §4.1, C1)
//!
//! Computes `mel[frame][mel]` from canonical 16 kHz mono samples, with the
//! two presets used by the fusion engines (§6 "Mel configuration presets").
//! Grounded on the teacher's `rustfft`-based spectral stack (see
//! `audio::capture` and the now-removed `spectrum-analyzer` dependency the
//! teacher never exercised); this module replaces that unused dependency
//! with a direct, spec-exact Hann/FFT/HTK-mel pipeline.

use rustfft::{num_complex::Complex32, FftPlanner};
use serde::{Deserialize, Serialize};

/// Framing / filterbank configuration for the mel front-end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub n_mels: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_fft: usize,
    pub center: bool,
}

impl MelConfig {
    /// "v2-like" preset from spec §6.
    pub fn v2_like() -> Self {
        Self {
            sample_rate: 16_000,
            n_mels: 64,
            hop_length: 160,
            win_length: 400,
            n_fft: 400,
            center: true,
        }
    }

    /// "v3-like" preset from spec §6.
    pub fn v3_like() -> Self {
        Self {
            sample_rate: 16_000,
            n_mels: 64,
            hop_length: 160,
            win_length: 320,
            n_fft: 320,
            center: false,
        }
    }
}

/// A lazily-nothing-but-materialised mel matrix: `frames` rows of `n_mels`
/// log-energies each, row-major in `data`.
#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    pub data: Vec<f32>,
    pub n_frames: usize,
    pub n_mels: usize,
}

impl MelSpectrogram {
    pub fn frame(&self, i: usize) -> &[f32] {
        &self.data[i * self.n_mels..(i + 1) * self.n_mels]
    }
}

const LOG_FLOOR: f32 = 1e-9;

/// Computes the log-mel spectrogram for `samples` under `config`.
pub fn log_mel_spectrogram(samples: &[f32], config: &MelConfig) -> MelSpectrogram {
    let window = hann_window(config.win_length);
    let n_frames = frame_count(samples.len(), config);
    let filterbank = mel_filterbank(config);
    let half_fft = config.n_fft / 2 + 1;

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(config.n_fft);

    let mut data = vec![0.0f32; n_frames * config.n_mels];
    let mut fft_buf = vec![Complex32::new(0.0, 0.0); config.n_fft];
    let mut power = vec![0.0f32; half_fft];

    for frame_idx in 0..n_frames {
        let start = frame_start(frame_idx, config, samples.len());
        fill_windowed_frame(samples, start, &window, config, &mut fft_buf);
        fft.process(&mut fft_buf);

        for (bin, value) in power.iter_mut().enumerate() {
            let c = fft_buf[bin];
            *value = c.re * c.re + c.im * c.im;
        }

        for (mel_idx, weights) in filterbank.iter().enumerate() {
            let mut energy = 0.0f32;
            for &(bin, weight) in weights {
                energy += power[bin] * weight;
            }
            data[frame_idx * config.n_mels + mel_idx] = energy.max(LOG_FLOOR).ln();
        }
    }

    MelSpectrogram {
        data,
        n_frames,
        n_mels: config.n_mels,
    }
}

/// Number of frames the framing convention produces for `n_samples` input
/// samples, per spec §4.1 / §8 ("Mel consistency").
pub fn frame_count(n_samples: usize, config: &MelConfig) -> usize {
    if config.center {
        // Frame k centred at sample k*hop; equivalent to reflective padding
        // of win_length/2 on both ends, one frame per hop across the
        // (virtually) padded signal.
        if n_samples == 0 {
            return 0;
        }
        n_samples / config.hop_length + 1
    } else if n_samples < config.win_length {
        1
    } else {
        (n_samples - config.win_length) / config.hop_length + 1
    }
}

fn frame_start(frame_idx: usize, config: &MelConfig, n_samples: usize) -> isize {
    if config.center {
        frame_idx as isize * config.hop_length as isize - (config.win_length / 2) as isize
    } else {
        (frame_idx * config.hop_length).min(n_samples.saturating_sub(1)) as isize
    }
}

/// Copies (or reflect-pads) `win_length` samples starting at `start`,
/// applies the Hann window, and zero-pads the remainder up to `n_fft`.
fn fill_windowed_frame(
    samples: &[f32],
    start: isize,
    window: &[f32],
    config: &MelConfig,
    out: &mut [Complex32],
) {
    let n = samples.len() as isize;
    for i in 0..config.n_fft {
        out[i] = Complex32::new(0.0, 0.0);
    }
    for i in 0..config.win_length {
        let idx = start + i as isize;
        let sample = if idx < 0 {
            // Reflect around the start of the signal.
            let reflected = -idx - 1;
            if reflected >= 0 && reflected < n {
                samples[reflected as usize]
            } else {
                0.0
            }
        } else if idx >= n {
            let reflected = 2 * n - idx - 1;
            if reflected >= 0 && reflected < n {
                samples[reflected as usize]
            } else {
                0.0
            }
        } else {
            samples[idx as usize]
        };
        out[i] = Complex32::new(sample * window[i], 0.0);
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| {
            0.5 * (1.0
                - (2.0 * std::f32::consts::PI * n as f32 / (len as f32 - 1.0)).cos())
        })
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Sparse triangular mel filterbank: for each mel bin, the list of
/// `(fft_bin, weight)` pairs contributing to it. Built in Hz-space per the
/// HTK formula (spec §4.1), not quantised to bin centres before slope
/// computation.
fn mel_filterbank(config: &MelConfig) -> Vec<Vec<(usize, f32)>> {
    let half_fft = config.n_fft / 2 + 1;
    let nyquist = config.sample_rate as f32 / 2.0;

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(nyquist);
    let n_points = config.n_mels + 2;
    let mel_points: Vec<f32> = (0..n_points)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_points as f32 - 1.0))
        .collect();
    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();

    let bin_freq = |bin: usize| bin as f32 * config.sample_rate as f32 / config.n_fft as f32;

    let mut filterbank = Vec::with_capacity(config.n_mels);
    for m in 0..config.n_mels {
        let f_left = hz_points[m];
        let f_center = hz_points[m + 1];
        let f_right = hz_points[m + 2];
        let mut weights = Vec::new();
        for bin in 0..half_fft {
            let f = bin_freq(bin);
            let weight = if f < f_left || f > f_right {
                0.0
            } else if f <= f_center {
                ((f - f_left) / (f_center - f_left)).clamp(0.0, 1.0)
            } else {
                ((f_right - f) / (f_right - f_center)).clamp(0.0, 1.0)
            };
            if weight > 0.0 {
                weights.push((bin, weight));
            }
        }
        filterbank.push(weights);
    }
    filterbank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_center_false_matches_spec_formula() {
        let config = MelConfig::v3_like();
        for k in 0..8usize {
            let n_samples = config.win_length + k * config.hop_length;
            assert_eq!(frame_count(n_samples, &config), k + 1);
        }
    }

    #[test]
    fn frame_count_center_true_is_at_least_one() {
        let config = MelConfig::v2_like();
        assert_eq!(frame_count(1, &config), 1);
    }

    #[test]
    fn produces_expected_shape() {
        let config = MelConfig::v3_like();
        let samples = vec![0.0f32; config.win_length + 5 * config.hop_length];
        let mel = log_mel_spectrogram(&samples, &config);
        assert_eq!(mel.n_frames, 6);
        assert_eq!(mel.n_mels, 64);
        assert_eq!(mel.data.len(), 6 * 64);
    }

    #[test]
    fn silence_yields_floor_energy() {
        let config = MelConfig::v3_like();
        let samples = vec![0.0f32; config.win_length * 2];
        let mel = log_mel_spectrogram(&samples, &config);
        for &v in &mel.data {
            assert!((v - LOG_FLOOR.ln()).abs() < 1e-4);
        }
    }

    #[test]
    fn filterbank_weights_are_in_unit_range() {
        let config = MelConfig::v2_like();
        let fb = mel_filterbank(&config);
        assert_eq!(fb.len(), config.n_mels);
        for weights in &fb {
            for &(_, w) in weights {
                assert!((0.0..=1.0).contains(&w));
            }
        }
    }
}
