//! Session and chunk data model (spec §3 "Chunk"/"Session", §6 metadata
//! JSON shapes).

use crate::asr::types::TranscriptSegment;
use crate::dialogue::{Channel, Speaker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Chunk lifecycle state (spec §3, §4.13 state machine:
/// `[init] -> Pending -> Transcribing -> {Completed | Failed}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStatus {
    Pending,
    Transcribing,
    Completed,
    Failed,
}

/// Session lifecycle state (spec §3, §4.13: `[init] -> Recording -> Completed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Recording,
    Completed,
}

/// A single dialogue utterance in the serialisable, per-chunk shape (spec
/// §3 Chunk field `dialogue`). `speaker_channel`/`speaker_id` together
/// reconstruct a [`crate::dialogue::Speaker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker_channel: DialogueChannel,
    pub speaker_id: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueChannel {
    Mic,
    System,
}

impl From<Channel> for DialogueChannel {
    fn from(c: Channel) -> Self {
        match c {
            Channel::Mic => DialogueChannel::Mic,
            Channel::System => DialogueChannel::System,
        }
    }
}

impl From<crate::dialogue::DialogueUtterance> for DialogueEntry {
    fn from(u: crate::dialogue::DialogueUtterance) -> Self {
        let (channel, speaker_id) = match u.speaker {
            Speaker::Mic => (DialogueChannel::Mic, None),
            Speaker::System(id) => (DialogueChannel::System, id),
        };
        Self { start_ms: u.start_ms, end_ms: u.end_ms, speaker_channel: channel, speaker_id, text: u.text }
    }
}

/// A fixed-duration slice of a recording, persisted as WAV + JSON; the unit
/// of ASR dispatch (spec §3 "Chunk").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: Uuid,
    pub session_id: Uuid,
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub is_stereo: bool,
    pub status: ChunkStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transcription: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_segments: Option<Vec<TranscriptSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_segments: Option<Vec<TranscriptSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<Vec<DialogueEntry>>,
}

impl Chunk {
    /// A chunk is created `Pending` when the chunker flushes a full buffer
    /// (spec §3 "Chunk" lifecycle).
    pub fn new_pending(session_id: Uuid, index: u32, start_ms: u64, end_ms: u64, is_stereo: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            index,
            start_ms,
            end_ms,
            duration_ms: end_ms.saturating_sub(start_ms),
            is_stereo,
            status: ChunkStatus::Pending,
            created_at: Utc::now(),
            transcribed_at: None,
            processing_start_time: None,
            processing_time_ms: None,
            error: None,
            transcription: String::new(),
            mic_text: None,
            sys_text: None,
            mic_segments: None,
            sys_segments: None,
            dialogue: None,
        }
    }

    /// `Pending -> Transcribing` (spec §4.13). Re-dispatching a `Failed`
    /// chunk also returns it to `Transcribing` (spec §4.13 "retry requires
    /// re-dispatch").
    pub fn mark_transcribing(&mut self) {
        self.status = ChunkStatus::Transcribing;
        self.processing_start_time = Some(Utc::now());
        self.error = None;
    }

    /// `Transcribing -> Completed` (spec §4.13).
    pub fn mark_completed(&mut self, transcription: String) {
        let now = Utc::now();
        self.transcription = transcription;
        self.status = ChunkStatus::Completed;
        self.transcribed_at = Some(now);
        if let Some(start) = self.processing_start_time {
            self.processing_time_ms = Some((now - start).num_milliseconds().max(0) as u64);
        }
    }

    /// `Transcribing -> Failed` (spec §4.13, terminal per spec §7: "the
    /// chunk is marked Failed with the detail preserved").
    pub fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.status = ChunkStatus::Failed;
        self.error = Some(error);
        if let Some(start) = self.processing_start_time {
            self.processing_time_ms = Some((now - start).num_milliseconds().max(0) as u64);
        }
    }
}

/// A recording session (spec §3 "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub language: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub total_duration_ms: u64,
    pub sample_count: u64,
    pub chunks: Vec<Chunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Session {
    pub fn new(data_dir: PathBuf, language: String, model: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Recording,
            language,
            model,
            title: None,
            total_duration_ms: 0,
            sample_count: 0,
            chunks: Vec::new(),
            summary: None,
            data_dir,
        }
    }

    /// Directory holding this session's data (spec §6 "Session directory
    /// layout").
    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join(self.id.to_string())
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.session_dir().join("chunks")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.session_dir().join("meta.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.session_dir().join("summary.txt")
    }

    /// `Recording -> Completed` (spec §3 Session lifecycle: "on explicit
    /// stop or on import of a pre-recorded file").
    pub fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn next_chunk_index(&self) -> u32 {
        self.chunks.len() as u32
    }
}

/// On-disk shape of `meta.json` (spec §6): field names and units differ
/// from the in-memory [`Session`] (camelCase keys, durations in
/// milliseconds, `chunksCount` instead of the full chunk list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetaFile {
    pub id: Uuid,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub language: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "totalDuration")]
    pub total_duration: u64,
    #[serde(rename = "sampleCount")]
    pub sample_count: u64,
    #[serde(rename = "chunksCount")]
    pub chunks_count: u32,
}

impl From<&Session> for SessionMetaFile {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            start_time: session.start_time,
            end_time: session.end_time,
            status: session.status,
            language: session.language.clone(),
            model: session.model.clone(),
            title: session.title.clone(),
            total_duration: session.total_duration_ms,
            sample_count: session.sample_count,
            chunks_count: session.chunks.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_lifecycle_transitions() {
        let session_id = Uuid::new_v4();
        let mut chunk = Chunk::new_pending(session_id, 0, 0, 15_000, false);
        assert_eq!(chunk.status, ChunkStatus::Pending);

        chunk.mark_transcribing();
        assert_eq!(chunk.status, ChunkStatus::Transcribing);

        chunk.mark_completed("hello world".to_string());
        assert_eq!(chunk.status, ChunkStatus::Completed);
        assert_eq!(chunk.transcription, "hello world");
        assert!(chunk.transcribed_at.is_some());
    }

    #[test]
    fn failed_chunk_can_be_redispatched() {
        let mut chunk = Chunk::new_pending(Uuid::new_v4(), 0, 0, 1000, false);
        chunk.mark_transcribing();
        chunk.mark_failed("boom".to_string());
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(chunk.error.as_deref(), Some("boom"));

        chunk.mark_transcribing();
        assert_eq!(chunk.status, ChunkStatus::Transcribing);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn duration_equals_end_minus_start() {
        let chunk = Chunk::new_pending(Uuid::new_v4(), 0, 1000, 16_000, false);
        assert_eq!(chunk.duration_ms, chunk.end_ms - chunk.start_ms);
    }
}
