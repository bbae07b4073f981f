//! Dual-channel capture engine (spec §4.9, C9)
//!
//! Drives an independent microphone stream and an independent system-audio
//! stream, each with its own ring buffer and backend, and fans both out as
//! tagged [`ChannelData`] onto a single queue consumed by the chunker.
//! Device enumeration and the platform-specific system-audio backends
//! themselves are external collaborators (spec §1); this module owns the
//! buffer hygiene, backend *selection* policy, and the single-writer queue
//! discipline (spec §5: "Capture queue: single-producer-per-channel,
//! single-consumer").
//!
//! Grounded on the teacher's `AudioCaptureService` (cpal host/device
//! selection, `mpsc` fan-out, stream lifecycle) generalised from one stream
//! to two independently-started/stopped streams.

use crate::audio::types::{
    AudioData, AudioDevice, AudioError, AudioSource, ChannelData, CANONICAL_SAMPLE_RATE,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// High-water mark for the fan-out queue: generous enough to absorb a CPU
/// stall without dropping frames under nominal load (spec §4.9).
pub const QUEUE_CAPACITY: usize = 512;

/// System-audio backends available on macOS, in fallback order (spec §4.9).
/// Selection among them, and their actual platform implementation, are
/// external collaborators; this engine only encodes the declared ordering
/// and drives whichever backend device enumeration hands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemAudioBackend {
    Loopback,
    ScreenCaptureKit,
    CoreAudioProcessTap,
}

impl SystemAudioBackend {
    /// Declared fallback order: loopback device, then ScreenCaptureKit, then
    /// the Core Audio process tap.
    pub const FALLBACK_ORDER: [SystemAudioBackend; 3] = [
        SystemAudioBackend::Loopback,
        SystemAudioBackend::ScreenCaptureKit,
        SystemAudioBackend::CoreAudioProcessTap,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub buffer_size_ms: u32,
    pub mic_device_id: Option<String>,
    pub system_device_id: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CANONICAL_SAMPLE_RATE,
            buffer_size_ms: 100,
            mic_device_id: None,
            system_device_id: None,
        }
    }
}

struct ChannelStream {
    stream: Arc<Mutex<Stream>>,
}

/// Drives mic and system-audio capture as two independently lifecycled
/// streams that share one output queue.
///
/// `Stream` is `!Send` on some platforms' cpal backends; wrapping it in
/// `Arc<Mutex<_>>` (as the teacher does) lets `CaptureEngine` itself be
/// `Send` so it can live behind the pipeline orchestrator's async tasks.
pub struct CaptureEngine {
    config: CaptureConfig,
    mic_stream: Option<ChannelStream>,
    system_stream: Option<ChannelStream>,
    sender: mpsc::Sender<ChannelData>,
    receiver: Option<mpsc::Receiver<ChannelData>>,
    started_order: Vec<AudioSource>,
}

// Stream itself is not Sync on all backends; mutex serialises access and we
// never hand out `&Stream` across an await point.
unsafe impl Send for CaptureEngine {}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            config,
            mic_stream: None,
            system_stream: None,
            sender,
            receiver: Some(receiver),
            started_order: Vec::new(),
        }
    }

    /// Enumerate available input devices (delegates entirely to cpal; the
    /// richer device-catalogue/backend-health story lives outside this
    /// crate per spec §1).
    pub fn list_devices() -> Result<Vec<AudioDevice>, AudioError> {
        let host = cpal::default_host();
        let mut devices = Vec::new();
        let input_devices = host
            .input_devices()
            .map_err(|e| AudioError::InitializationFailed { source: Box::new(e) })?;
        for device in input_devices {
            let name = device.name().map_err(|e| AudioError::ProcessingFailed {
                message: format!("failed to get device name: {e}"),
            })?;
            devices.push(AudioDevice {
                id: name.clone(),
                name,
                is_input_device: true,
                is_default: false,
                sample_rates: vec![CANONICAL_SAMPLE_RATE],
                channels: 1,
            });
        }
        Ok(devices)
    }

    /// Starts both streams. On failure of either, already-started streams
    /// are stopped (reverse order) before the error propagates, so a failed
    /// `start_capture` never leaves a half-started engine running.
    pub async fn start_capture(&mut self) -> Result<(), AudioError> {
        let host = cpal::default_host();

        let mic_device = Self::select_device(&host, self.config.mic_device_id.as_deref())?;
        let mic_stream = self.build_stream(&mic_device, AudioSource::Mic)?;
        mic_stream.play().map_err(|e| AudioError::InitializationFailed { source: Box::new(e) })?;
        self.mic_stream = Some(ChannelStream { stream: Arc::new(Mutex::new(mic_stream)) });
        self.started_order.push(AudioSource::Mic);

        let system_device = match Self::select_device(&host, self.config.system_device_id.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                warn!("system audio device unavailable, stopping mic stream: {e}");
                self.stop_capture().await?;
                return Err(e);
            }
        };
        match self.build_stream(&system_device, AudioSource::System) {
            Ok(stream) => {
                stream.play().map_err(|e| AudioError::InitializationFailed { source: Box::new(e) })?;
                self.system_stream = Some(ChannelStream { stream: Arc::new(Mutex::new(stream)) });
                self.started_order.push(AudioSource::System);
            }
            Err(e) => {
                self.stop_capture().await?;
                return Err(e);
            }
        }

        info!("capture engine started (mic + system)");
        Ok(())
    }

    /// Halts all backends in reverse order of start (spec §4.9).
    pub async fn stop_capture(&mut self) -> Result<(), AudioError> {
        while let Some(source) = self.started_order.pop() {
            let channel_stream = match source {
                AudioSource::Mic => self.mic_stream.take(),
                AudioSource::System => self.system_stream.take(),
                AudioSource::File => None,
            };
            if let Some(cs) = channel_stream {
                if let Ok(stream) = cs.stream.lock() {
                    if let Err(e) = stream.pause() {
                        warn!("failed to pause {:?} stream: {}", source, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drops any residual queued frames before a new recording (spec §4.9
    /// invariant: "a session-wide clear_buffers call is available").
    pub fn clear_buffers(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            while receiver.try_recv().is_ok() {}
        }
    }

    /// The single `ChannelData` queue the chunker consumes from. Only valid
    /// to take once; the capture engine is the sole writer.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<ChannelData>> {
        self.receiver.take()
    }

    pub fn is_capturing(&self) -> bool {
        !self.started_order.is_empty()
    }

    fn select_device(host: &cpal::Host, device_id: Option<&str>) -> Result<Device, AudioError> {
        if let Some(id) = device_id {
            let mut devices = host
                .input_devices()
                .map_err(|e| AudioError::InitializationFailed { source: Box::new(e) })?;
            if let Some(device) = devices.find(|d| d.name().map(|n| n == id).unwrap_or(false)) {
                return Ok(device);
            }
        }
        host.default_input_device().ok_or(AudioError::NoAudioMethodAvailable {
            attempted_methods: vec!["default_input_device".to_string()],
        })
    }

    fn build_stream(&self, device: &Device, source: AudioSource) -> Result<Stream, AudioError> {
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(
                self.config.sample_rate * self.config.buffer_size_ms / 1_000,
            ),
        };
        let sample_rate = self.config.sample_rate;
        let sender = self.sender.clone();

        device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let audio = AudioData {
                        samples: data.to_vec(),
                        sample_rate,
                        channels: 1,
                        timestamp: SystemTime::now(),
                        source_channel: source,
                        duration_seconds: data.len() as f32 / sample_rate as f32,
                    };
                    if let Err(e) = sender.try_send(ChannelData::from(audio)) {
                        warn!("dropped {:?} frame, queue full: {}", source, e);
                    }
                },
                move |err| {
                    warn!("audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::InitializationFailed { source: Box::new(e) })
    }
}
