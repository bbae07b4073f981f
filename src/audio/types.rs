//! Audio-related type definitions
//!
//! Common types used throughout the capture and chunking pipeline.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

/// A single canonical-format audio sample: 32-bit float in `[-1, 1]`, mono,
/// 16 kHz (spec §3 "Sample"). Kept as an alias rather than a newtype so DSP
/// crates (`dasp`, `rustfft`) operate on plain `&[f32]` slices.
pub type Sample = f32;

pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Which physical source a buffer of samples came from.
///
/// Spec §3 only distinguishes `Mic` and `System`; `File` is kept for the
/// import path (§3 "Session": "import of a pre-recorded file").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum AudioSource {
    Mic,
    System,
    File,
}

/// Audio data structure containing samples and metadata. Used at the
/// capture/device boundary before samples are tagged into `ChannelData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioData {
    pub samples: Vec<Sample>,
    pub sample_rate: u32,
    pub channels: u8,
    pub timestamp: SystemTime,
    pub source_channel: AudioSource,
    pub duration_seconds: f32,
}

/// A tagged buffer of canonical-format (16 kHz mono float) samples, produced
/// by the capture engine and consumed by the chunker (spec §3 "ChannelData").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelData {
    pub channel: AudioSource,
    pub samples: Vec<Sample>,
}

impl ChannelData {
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / CANONICAL_SAMPLE_RATE as f32
    }
}

impl From<AudioData> for ChannelData {
    /// Mixes to mono (equal-weight average) if the source was stereo; the
    /// caller is responsible for having already resampled to 16 kHz
    /// (§3: "Stereo inputs are channel-averaged unless two-channel capture
    /// is explicitly enabled").
    fn from(data: AudioData) -> Self {
        let samples = if data.channels <= 1 {
            data.samples
        } else {
            let channels = data.channels as usize;
            data.samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };
        ChannelData {
            channel: data.source_channel,
            samples,
        }
    }
}

/// Audio device information, returned by device enumeration (an external
/// collaborator per spec §1; this type is the contract shape the pipeline
/// expects back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_input_device: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: u8,
}

/// Audio capture / format errors.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("audio permission denied for device {device}")]
    PermissionDenied { device: String },

    #[error("audio device disconnected: {device}")]
    DeviceDisconnected { device: String },

    #[error("no audio capture method available, tried: {attempted_methods:?}")]
    NoAudioMethodAvailable { attempted_methods: Vec<String> },

    #[error("no fallback device available")]
    NoFallbackDevice,

    #[error("audio system initialization failed: {source}")]
    InitializationFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("audio buffer overflow")]
    BufferOverflow,

    #[error("audio processing failed: {message}")]
    ProcessingFailed { message: String },
}

/// VAD-specific errors, raised by the adaptive (Silero-style) detector used
/// during diarisation (spec §4.2: "diarisation has its own thresholds").
/// The cheap go/no-go gate in front of ASR inference (§4.2) returns a plain
/// `bool`, not this error type — a rejected buffer there is not a failure.
#[derive(Debug, Error)]
pub enum VADError {
    #[error("invalid threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidThreshold(f32),

    #[error("empty audio provided")]
    EmptyAudio,

    #[error("unsupported sample rate: {0} (expected 16000)")]
    UnsupportedSampleRate(u32),
}

/// Result of the adaptive speech-activity analysis used by diarisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VADResult {
    pub has_speech: bool,
    pub confidence: f32,
    pub speech_segments: Vec<SpeechSegment>,
    pub estimated_snr: Option<f32>,
    pub has_clipping_warning: bool,
}

/// Speech segment within audio, produced by the adaptive VAD pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start_time: f32,
    pub end_time: f32,
    pub confidence: f32,
}

/// Configuration for the adaptive (diarisation-side) VAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VADConfig {
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub max_speech_duration_ms: u32,
}

impl Default for VADConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 500,
            max_speech_duration_ms: 30_000,
        }
    }
}
