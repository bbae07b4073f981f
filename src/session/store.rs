//! Session and chunk lifecycle store (spec §4.10, C10): on-disk,
//! append-only record of sessions and chunks with crash-safe persistence.
//!
//! Grounded on the teacher's on-disk WAV writing (`hound`) and on
//! `askidmobile-AIWisper`'s `samples_to_wav_bytes` (`rust/crates/
//! aiwisper-audio/src/file_io.rs`) for the int16 PCM conversion, combined
//! with the teacher's mutex-discipline pattern (`asr::manager`: a global
//! lock around a small map, released before any blocking I/O) for the
//! concurrency story in spec §5 ("Session manager: one global mutex...
//! callers must not hold the global mutex while writing files").

use super::types::{Chunk, Session, SessionMetaFile, SessionStatus};
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Writes `data` to `path` via the "write to tmp, rename" pattern (spec
/// §4.10 step 2, §6): never leaves a partially-written file at the final
/// path.
fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
    }
    {
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        file.write_all(data).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        file.sync_all().map_err(|e| CoreError::PersistFailed(e.to_string()))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
    Ok(())
}

/// Encodes canonical-format samples as 16-bit PCM mono WAV bytes (spec §6
/// "WAV on disk"), grounded on `askidmobile-AIWisper`'s
/// `samples_to_wav_bytes`.
pub fn samples_to_wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> CoreResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        for &sample in samples {
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        }
        writer.finalize().map_err(|e| CoreError::PersistFailed(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Persists one chunk's WAV + JSON under `chunks/NNN.{wav,json}` (spec
/// §4.10 steps 2-3), both atomically.
pub fn persist_chunk(session: &Session, chunk: &Chunk, samples: &[f32], channels: u16) -> CoreResult<()> {
    let dir = session.chunks_dir();
    let name = format!("{:03}", chunk.index);
    let wav_bytes = samples_to_wav_bytes(samples, crate::audio::types::CANONICAL_SAMPLE_RATE, channels)?;
    write_atomic(&dir.join(format!("{name}.wav")), &wav_bytes)?;
    let json = serde_json::to_vec_pretty(chunk)?;
    write_atomic(&dir.join(format!("{name}.json")), &json)?;
    Ok(())
}

/// Persists `meta.json` (spec §6, §4.10 "State persistence").
pub fn persist_session_meta(session: &Session) -> CoreResult<()> {
    let meta = SessionMetaFile::from(session);
    let json = serde_json::to_vec_pretty(&meta)?;
    write_atomic(&session.meta_path(), &json)?;
    Ok(())
}

/// Loads a session's chunk set from disk by scanning `chunks/*.json`,
/// sorting by index, and backfilling titles when missing (spec §4.10
/// "Load on startup").
pub fn load_session_chunks(session_dir: &Path) -> CoreResult<Vec<Chunk>> {
    let chunks_dir = session_dir.join("chunks");
    if !chunks_dir.exists() {
        return Ok(Vec::new());
    }
    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(&chunks_dir).map_err(|e| CoreError::PersistFailed(e.to_string()))? {
        let entry = entry.map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let data = std::fs::read(&path).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        match serde_json::from_slice::<Chunk>(&data) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => warn!("skipping unreadable chunk file {:?}: {e}", path),
        }
    }
    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}

/// Loads a session (meta + chunks) from its directory.
pub fn load_session(data_dir: &Path, session_id: Uuid) -> CoreResult<Session> {
    let session_dir = data_dir.join(session_id.to_string());
    let meta_bytes = std::fs::read(session_dir.join("meta.json")).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
    let meta: SessionMetaFile = serde_json::from_slice(&meta_bytes)?;
    let chunks = load_session_chunks(&session_dir)?;
    let summary_path = session_dir.join("summary.txt");
    let summary = std::fs::read_to_string(&summary_path).ok();

    Ok(Session {
        id: meta.id,
        start_time: meta.start_time,
        end_time: meta.end_time,
        status: meta.status,
        language: meta.language,
        model: meta.model,
        title: meta.title,
        total_duration_ms: meta.total_duration,
        sample_count: meta.sample_count,
        chunks,
        summary,
        data_dir: data_dir.to_path_buf(),
    })
}

/// Owns the session map and the active-session pointer (spec §5, §4.10).
/// One global mutex guards membership and the active id; each session's
/// entry is independently mutex-guarded for chunk mutation, matching the
/// discipline spec §5 names: "callers must not hold the global mutex while
/// writing files".
pub struct SessionManager {
    data_dir: PathBuf,
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<Session>>>>,
    active_id: Mutex<Option<Uuid>>,
}

impl SessionManager {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir, sessions: Mutex::new(HashMap::new()), active_id: Mutex::new(None) }
    }

    /// Rebuilds the in-memory session set by scanning `data_dir` (spec
    /// §4.10 "Load on startup").
    pub fn rebuild_from_disk(&self) -> CoreResult<()> {
        if !self.data_dir.exists() {
            return Ok(());
        }
        let mut sessions = self.sessions.lock().unwrap();
        for entry in std::fs::read_dir(&self.data_dir).map_err(|e| CoreError::PersistFailed(e.to_string()))? {
            let entry = entry.map_err(|e| CoreError::PersistFailed(e.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(id) = entry.file_name().to_string_lossy().parse::<Uuid>() else { continue };
            match load_session(&self.data_dir, id) {
                Ok(session) => {
                    if session.status == SessionStatus::Recording {
                        *self.active_id.lock().unwrap() = Some(id);
                    }
                    sessions.insert(id, Arc::new(Mutex::new(session)));
                }
                Err(e) => warn!("failed to load session {id}: {e}"),
            }
        }
        Ok(())
    }

    /// Starts a new recording session. Rejected if one is already recording
    /// (spec §3 invariant: "a process has at most one session in Recording
    /// at any time"; spec §7 `ConcurrencyViolation`).
    pub fn start_session(&self, language: String, model: String) -> CoreResult<Uuid> {
        let mut active = self.active_id.lock().unwrap();
        if active.is_some() {
            return Err(CoreError::ConcurrencyViolation(
                "a recording session is already active".to_string(),
            ));
        }
        let session = Session::new(self.data_dir.clone(), language, model);
        let id = session.id;
        std::fs::create_dir_all(session.chunks_dir()).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        persist_session_meta(&session)?;

        self.sessions.lock().unwrap().insert(id, Arc::new(Mutex::new(session)));
        *active = Some(id);
        info!(session_id = %id, "session started");
        Ok(id)
    }

    /// Imports a pre-recorded file as a session already `Completed` (spec
    /// §3: "the import path creates a session already in Completed").
    pub fn import_completed_session(&self, language: String, model: String, total_duration_ms: u64) -> CoreResult<Uuid> {
        let mut session = Session::new(self.data_dir.clone(), language, model);
        session.total_duration_ms = total_duration_ms;
        session.mark_completed();
        let id = session.id;
        std::fs::create_dir_all(session.chunks_dir()).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        persist_session_meta(&session)?;
        self.sessions.lock().unwrap().insert(id, Arc::new(Mutex::new(session)));
        Ok(id)
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        *self.active_id.lock().unwrap()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// `Recording -> Completed` for the active session (spec §3).
    pub fn stop_active_session(&self) -> CoreResult<()> {
        let mut active = self.active_id.lock().unwrap();
        let Some(id) = *active else {
            return Err(CoreError::ConcurrencyViolation("no active recording session".to_string()));
        };
        let handle = self.sessions.lock().unwrap().get(&id).cloned();
        if let Some(handle) = handle {
            let mut session = handle.lock().unwrap();
            session.mark_completed();
            persist_session_meta(&session)?;
        }
        *active = None;
        info!(session_id = %id, "session stopped");
        Ok(())
    }

    /// Appends a newly-flushed chunk to its session and persists both the
    /// chunk and the updated session meta (spec §4.10 step 4).
    pub fn append_chunk(&self, session_id: Uuid, chunk: Chunk, samples: &[f32], channels: u16) -> CoreResult<()> {
        let handle = self
            .get(session_id)
            .ok_or_else(|| CoreError::PersistFailed(format!("unknown session {session_id}")))?;
        let mut session = handle.lock().unwrap();
        persist_chunk(&session, &chunk, samples, channels)?;
        session.total_duration_ms = session.total_duration_ms.max(chunk.end_ms);
        session.sample_count += samples.len() as u64;
        session.chunks.push(chunk);
        persist_session_meta(&session)?;
        Ok(())
    }

    /// Updates a chunk's transcription/dialogue state in place and
    /// re-persists it (spec §4.11: "the orchestrator is the only writer of
    /// chunk transcription state").
    pub fn update_chunk<F: FnOnce(&mut Chunk)>(&self, session_id: Uuid, chunk_id: Uuid, f: F) -> CoreResult<()> {
        let handle = self
            .get(session_id)
            .ok_or_else(|| CoreError::PersistFailed(format!("unknown session {session_id}")))?;
        let mut session = handle.lock().unwrap();
        let chunk = session
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| CoreError::PersistFailed(format!("unknown chunk {chunk_id}")))?;
        f(chunk);
        let chunk_snapshot = chunk.clone();
        persist_chunk_json(&session.chunks_dir(), &chunk_snapshot)?;
        persist_session_meta(&session)?;
        Ok(())
    }

    /// Deletes a non-active session's directory tree (spec §4.10:
    /// "Deletion of a non-active session removes its directory tree;
    /// deletion of the active session is rejected").
    pub fn delete_session(&self, session_id: Uuid) -> CoreResult<()> {
        if self.active_session_id() == Some(session_id) {
            return Err(CoreError::ConcurrencyViolation("cannot delete the active session".to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let Some(handle) = sessions.remove(&session_id) else {
            return Err(CoreError::PersistFailed(format!("unknown session {session_id}")));
        };
        let session_dir = handle.lock().unwrap().session_dir();
        drop(sessions);
        std::fs::remove_dir_all(&session_dir).map_err(|e| CoreError::PersistFailed(e.to_string()))?;
        Ok(())
    }
}

fn persist_chunk_json(chunks_dir: &Path, chunk: &Chunk) -> CoreResult<()> {
    let name = format!("{:03}", chunk.index);
    let json = serde_json::to_vec_pretty(chunk)?;
    write_atomic(&chunks_dir.join(format!("{name}.json")), &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn only_one_session_can_be_recording() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let result = manager.start_session("en".to_string(), "whisper".to_string());
        assert!(matches!(result, Err(CoreError::ConcurrencyViolation(_))));
    }

    #[test]
    fn stop_then_start_succeeds() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        manager.stop_active_session().unwrap();
        assert!(manager.start_session("en".to_string(), "whisper".to_string()).is_ok());
    }

    #[test]
    fn deleting_active_session_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        assert!(matches!(manager.delete_session(id), Err(CoreError::ConcurrencyViolation(_))));
    }

    #[test]
    fn chunk_append_persists_wav_and_json() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let chunk = Chunk::new_pending(session_id, 0, 0, 1000, false);
        let samples = vec![0.0f32; 16_000];
        manager.append_chunk(session_id, chunk, &samples, 1).unwrap();

        let session_dir = dir.path().join(session_id.to_string());
        assert!(session_dir.join("chunks/000.wav").exists());
        assert!(session_dir.join("chunks/000.json").exists());
    }

    #[test]
    fn rebuild_from_disk_recovers_sessions_and_active_pointer() {
        let dir = tempdir().unwrap();
        let session_id;
        {
            let manager = SessionManager::new(dir.path().to_path_buf());
            session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
            let chunk = Chunk::new_pending(session_id, 0, 0, 1000, false);
            manager.append_chunk(session_id, chunk, &vec![0.0f32; 16_000], 1).unwrap();
        }

        let manager = SessionManager::new(dir.path().to_path_buf());
        manager.rebuild_from_disk().unwrap();
        assert_eq!(manager.active_session_id(), Some(session_id));
        let handle = manager.get(session_id).unwrap();
        assert_eq!(handle.lock().unwrap().chunks.len(), 1);
    }

    #[test]
    fn update_chunk_transitions_status() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf());
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let chunk = Chunk::new_pending(session_id, 0, 0, 1000, false);
        let chunk_id = chunk.id;
        manager.append_chunk(session_id, chunk, &vec![0.0f32; 16_000], 1).unwrap();

        manager.update_chunk(session_id, chunk_id, |c| c.mark_transcribing()).unwrap();
        let handle = manager.get(session_id).unwrap();
        assert_eq!(handle.lock().unwrap().chunks[0].status, super::super::types::ChunkStatus::Transcribing);
    }
}
