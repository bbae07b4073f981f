//! Chunker (spec §4.10, C10): accumulates per-channel `ChannelData` into
//! fixed-duration chunks, persists them, and hands them to the
//! orchestrator's callback.
//!
//! Grounded on the teacher's `AudioCaptureService` buffer-accumulation
//! pattern (`audio::capture`) generalised from "one stream" to "two
//! channels indexed by absolute session time", per spec §4.10: "accumulates
//! per-channel buffers indexed by absolute time from session start".

use crate::audio::types::{AudioSource, ChannelData, CANONICAL_SAMPLE_RATE};
use crate::session::store::SessionManager;
use crate::session::types::Chunk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Typical chunk size is 15-30 s (spec §4.10); default splits the
/// difference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_duration_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_duration_ms: 20_000 }
    }
}

/// A flushed chunk's audio and its persisted [`Chunk`] record, handed to
/// the orchestrator callback (spec §4.10 step 4, §4.11).
pub struct FlushedChunk {
    pub chunk: Chunk,
    pub mic_samples: Vec<f32>,
    pub system_samples: Vec<f32>,
}

/// Accumulates mic/system `ChannelData` into fixed-size windows (spec
/// §4.10). One chunker instance is owned per active session.
pub struct Chunker {
    session_id: Uuid,
    config: ChunkerConfig,
    mic_buffer: Vec<f32>,
    system_buffer: Vec<f32>,
    session_start_samples: u64,
    next_index: u32,
}

impl Chunker {
    pub fn new(session_id: Uuid, config: ChunkerConfig) -> Self {
        Self {
            session_id,
            config,
            mic_buffer: Vec::new(),
            system_buffer: Vec::new(),
            session_start_samples: 0,
            next_index: 0,
        }
    }

    fn chunk_samples(&self) -> usize {
        (self.config.chunk_duration_ms as u64 * CANONICAL_SAMPLE_RATE as u64 / 1000) as usize
    }

    /// Feeds one tagged buffer into the corresponding channel's
    /// accumulator. Returns a flushed chunk once the leading channel's
    /// accumulated duration crosses the configured chunk size.
    pub fn ingest(&mut self, data: ChannelData) -> Option<FlushedChunk> {
        match data.channel {
            AudioSource::Mic => self.mic_buffer.extend(data.samples),
            AudioSource::System => self.system_buffer.extend(data.samples),
            AudioSource::File => {}
        }
        self.maybe_flush()
    }

    fn maybe_flush(&mut self) -> Option<FlushedChunk> {
        let target = self.chunk_samples();
        let ready = self.mic_buffer.len().max(self.system_buffer.len()) >= target;
        if !ready || target == 0 {
            return None;
        }

        let mic_samples: Vec<f32> = self.mic_buffer.drain(..self.mic_buffer.len().min(target)).collect();
        let system_samples: Vec<f32> =
            self.system_buffer.drain(..self.system_buffer.len().min(target)).collect();

        let start_ms = self.session_start_samples * 1000 / CANONICAL_SAMPLE_RATE as u64;
        let frames = mic_samples.len().max(system_samples.len()) as u64;
        self.session_start_samples += frames;
        let end_ms = self.session_start_samples * 1000 / CANONICAL_SAMPLE_RATE as u64;

        let is_stereo = !mic_samples.is_empty() && !system_samples.is_empty();
        let chunk = Chunk::new_pending(self.session_id, self.next_index, start_ms, end_ms, is_stereo);
        self.next_index += 1;

        info!(session_id = %self.session_id, index = chunk.index, start_ms, end_ms, "chunk flushed");
        Some(FlushedChunk { chunk, mic_samples, system_samples })
    }

    /// Forces a flush of whatever is buffered, even if short of the target
    /// (used on session stop so the tail isn't dropped).
    pub fn flush_remainder(&mut self) -> Option<FlushedChunk> {
        if self.mic_buffer.is_empty() && self.system_buffer.is_empty() {
            return None;
        }
        let mic_samples = std::mem::take(&mut self.mic_buffer);
        let system_samples = std::mem::take(&mut self.system_buffer);

        let start_ms = self.session_start_samples * 1000 / CANONICAL_SAMPLE_RATE as u64;
        let frames = mic_samples.len().max(system_samples.len()) as u64;
        self.session_start_samples += frames;
        let end_ms = self.session_start_samples * 1000 / CANONICAL_SAMPLE_RATE as u64;

        let is_stereo = !mic_samples.is_empty() && !system_samples.is_empty();
        let chunk = Chunk::new_pending(self.session_id, self.next_index, start_ms, end_ms, is_stereo);
        self.next_index += 1;
        Some(FlushedChunk { chunk, mic_samples, system_samples })
    }
}

/// Mixes mic + system buffers to one mono buffer (equal-weight average,
/// zero-padding the shorter side) for the mono-with-diarisation pipeline
/// mode (spec §4.11).
pub fn mix_to_mono(mic: &[f32], system: &[f32]) -> Vec<f32> {
    let len = mic.len().max(system.len());
    (0..len)
        .map(|i| {
            let m = mic.get(i).copied().unwrap_or(0.0);
            let s = system.get(i).copied().unwrap_or(0.0);
            match (mic.get(i), system.get(i)) {
                (Some(_), Some(_)) => (m + s) / 2.0,
                _ => m + s,
            }
        })
        .collect()
}

/// Persists a flushed chunk into its session, writing stereo WAV when both
/// channels are present (spec §6: "16-bit PCM... mono (or 2 channels when
/// retained)").
pub fn persist_flushed_chunk(manager: &Arc<SessionManager>, flushed: FlushedChunk) -> crate::error::CoreResult<()> {
    let FlushedChunk { chunk, mic_samples, system_samples } = flushed;
    if chunk.is_stereo {
        let len = mic_samples.len().max(system_samples.len());
        let mut interleaved = Vec::with_capacity(len * 2);
        for i in 0..len {
            interleaved.push(mic_samples.get(i).copied().unwrap_or(0.0));
            interleaved.push(system_samples.get(i).copied().unwrap_or(0.0));
        }
        manager.append_chunk(chunk.session_id, chunk.clone(), &interleaved, 2)
    } else {
        let mono = if !mic_samples.is_empty() { mic_samples } else { system_samples };
        manager.append_chunk(chunk.session_id, chunk.clone(), &mono, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::AudioSource;

    #[test]
    fn flushes_once_duration_threshold_crossed() {
        let mut chunker = Chunker::new(Uuid::new_v4(), ChunkerConfig { chunk_duration_ms: 1000 });
        let flushed = chunker.ingest(ChannelData { channel: AudioSource::Mic, samples: vec![0.0; 16_000] });
        assert!(flushed.is_some());
        let flushed = flushed.unwrap();
        assert_eq!(flushed.chunk.start_ms, 0);
        assert_eq!(flushed.chunk.end_ms, 1000);
        assert_eq!(flushed.chunk.index, 0);
    }

    #[test]
    fn stereo_flag_set_when_both_channels_present() {
        let mut chunker = Chunker::new(Uuid::new_v4(), ChunkerConfig { chunk_duration_ms: 1000 });
        chunker.ingest(ChannelData { channel: AudioSource::Mic, samples: vec![0.0; 16_000] });
        let flushed = chunker
            .ingest(ChannelData { channel: AudioSource::System, samples: vec![0.0; 16_000] })
            .unwrap();
        assert!(flushed.chunk.is_stereo);
    }

    #[test]
    fn indices_increase_strictly_across_flushes() {
        let mut chunker = Chunker::new(Uuid::new_v4(), ChunkerConfig { chunk_duration_ms: 1000 });
        let mut indices = Vec::new();
        for _ in 0..3 {
            if let Some(f) = chunker.ingest(ChannelData { channel: AudioSource::Mic, samples: vec![0.0; 16_000] }) {
                indices.push(f.chunk.index);
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn flush_remainder_emits_short_tail_chunk() {
        let mut chunker = Chunker::new(Uuid::new_v4(), ChunkerConfig { chunk_duration_ms: 1000 });
        chunker.ingest(ChannelData { channel: AudioSource::Mic, samples: vec![0.0; 8_000] });
        let flushed = chunker.flush_remainder().unwrap();
        assert_eq!(flushed.chunk.end_ms, 500);
    }

    #[test]
    fn mix_to_mono_averages_overlapping_samples() {
        let mic = vec![1.0, 1.0];
        let system = vec![0.5, 0.5, 0.5];
        let mixed = mix_to_mono(&mic, &system);
        assert_eq!(mixed.len(), 3);
        assert!((mixed[0] - 0.75).abs() < 1e-6);
        assert!((mixed[2] - 0.5).abs() < 1e-6);
    }
}
