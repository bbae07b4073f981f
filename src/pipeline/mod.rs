//! Pipeline orchestrator (spec §4.11, C11): composes capture -> chunking ->
//! (engine | hybrid) -> diarisation -> dialogue, and is the sole writer of
//! chunk transcription state (spec §4.11, §5).
//!
//! Grounded on the teacher's coarse-mutex orchestration style
//! (`session::store::SessionManager`, generalised from the teacher's
//! `AppState`) plus `askidmobile-AIWisper`'s `recording.rs` for the
//! "per-channel transcribe, then dialogue-merge" shape that stereo mode
//! takes here.

use crate::asr::engine::Engine;
use crate::asr::manager::EngineKind;
use crate::asr::types::TranscriptSegment;
use crate::audio::vad::voice_activity_gate;
use crate::dialogue::{merge_dialogue, Channel, ChannelSegment, DialogueUtterance};
use crate::diarization::service::DiarizationService;
use crate::error::{CoreError, CoreResult};
use crate::fusion::hybrid::{HybridConfig, HybridTranscriber};
use crate::grammar::GrammarChecker;
use crate::session::chunker::mix_to_mono;
use crate::session::store::SessionManager;
use crate::session::types::{Chunk, DialogueEntry};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Which processing mode a chunk is dispatched under (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Run the engine once per channel, then merge with C8.
    Stereo,
    /// Run the engine on the mono mix, then attach speakers from C7.
    MonoWithDiarization,
}

/// Composes C1-C8 for one chunk. Holds no chunk state itself; all state
/// lives in the [`SessionManager`], which this orchestrator is the sole
/// writer of (spec §4.11).
pub struct PipelineOrchestrator {
    session_manager: Arc<SessionManager>,
    diarization: Option<Arc<DiarizationService>>,
    mode: PipelineMode,
    hybrid_config: HybridConfig,
    grammar: GrammarChecker,
}

/// Outcome of processing one chunk, used both to update the store and to
/// report back to callers.
pub struct ChunkResult {
    pub transcription: String,
    pub mic_text: Option<String>,
    pub sys_text: Option<String>,
    pub mic_segments: Option<Vec<TranscriptSegment>>,
    pub sys_segments: Option<Vec<TranscriptSegment>>,
    pub dialogue: Option<Vec<DialogueUtterance>>,
}

impl PipelineOrchestrator {
    pub fn new(session_manager: Arc<SessionManager>, diarization: Option<Arc<DiarizationService>>, mode: PipelineMode) -> Self {
        Self {
            session_manager,
            diarization,
            mode,
            hybrid_config: HybridConfig::default(),
            grammar: GrammarChecker::new(),
        }
    }

    /// Overrides the default (parallel-mode, no hotwords) fusion config used
    /// when a secondary engine is supplied to [`Self::process_chunk`].
    pub fn with_hybrid_config(mut self, hybrid_config: HybridConfig) -> Self {
        self.hybrid_config = hybrid_config;
        self
    }

    /// Processes one flushed chunk end-to-end and persists the result,
    /// performing the Transcribing -> {Completed | Failed} transition
    /// (spec §4.11).
    #[allow(clippy::too_many_arguments)]
    pub async fn process_chunk(
        &self,
        session_id: Uuid,
        chunk_id: Uuid,
        mic_samples: Vec<f32>,
        system_samples: Vec<f32>,
        primary: &dyn Engine,
        primary_kind: EngineKind,
        secondary: Option<&dyn Engine>,
        secondary_kind: Option<EngineKind>,
    ) -> CoreResult<()> {
        self.session_manager.update_chunk(session_id, chunk_id, |c| c.mark_transcribing())?;

        let outcome = self
            .transcribe_chunk(&mic_samples, &system_samples, primary, primary_kind, secondary, secondary_kind)
            .await;

        match outcome {
            Ok(result) => {
                self.session_manager.update_chunk(session_id, chunk_id, |c| apply_result(c, result))?;
                info!(session_id = %session_id, chunk_id = %chunk_id, "chunk completed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.session_manager.update_chunk(session_id, chunk_id, |c| c.mark_failed(message.clone()))?;
                error!(session_id = %session_id, chunk_id = %chunk_id, error = %message, "chunk failed");
                // Spec §7: other chunks proceed; a per-chunk failure does not
                // stop the enclosing operation, so this returns Ok once the
                // Failed transition is durably recorded.
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transcribe_chunk(
        &self,
        mic_samples: &[f32],
        system_samples: &[f32],
        primary: &dyn Engine,
        primary_kind: EngineKind,
        secondary: Option<&dyn Engine>,
        secondary_kind: Option<EngineKind>,
    ) -> CoreResult<ChunkResult> {
        match self.mode {
            PipelineMode::Stereo => {
                self.transcribe_stereo(mic_samples, system_samples, primary, primary_kind, secondary, secondary_kind).await
            }
            PipelineMode::MonoWithDiarization => {
                let mono = mix_to_mono(mic_samples, system_samples);
                self.transcribe_mono_with_diarization(&mono, primary).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transcribe_stereo(
        &self,
        mic_samples: &[f32],
        system_samples: &[f32],
        primary: &dyn Engine,
        primary_kind: EngineKind,
        secondary: Option<&dyn Engine>,
        secondary_kind: Option<EngineKind>,
    ) -> CoreResult<ChunkResult> {
        let mic_segments = self
            .transcribe_channel(mic_samples, primary, primary_kind, secondary, secondary_kind)
            .await?;
        let sys_segments = self
            .transcribe_channel(system_samples, primary, primary_kind, secondary, secondary_kind)
            .await?;

        let mic_text = Some(join_segment_text(&mic_segments));
        let sys_text = Some(join_segment_text(&sys_segments));

        let dialogue = merge_dialogue(mic_segments.clone(), sys_segments.clone());
        let transcription = render_transcript(&dialogue);

        Ok(ChunkResult {
            transcription,
            mic_text,
            sys_text,
            mic_segments: Some(mic_segments),
            sys_segments: Some(sys_segments),
            dialogue: Some(dialogue),
        })
    }

    async fn transcribe_mono_with_diarization(
        &self,
        samples: &[f32],
        primary: &dyn Engine,
    ) -> CoreResult<ChunkResult> {
        let mut segments = if voice_activity_gate(samples) {
            Self::segments_or_empty(primary.transcribe_with_segments(samples).await)?
        } else {
            Vec::new()
        };

        if let Some(diarization) = &self.diarization {
            let speaker_segments = diarization.diarize(samples, crate::audio::types::CANONICAL_SAMPLE_RATE, 1.5, 0.75);
            diarization.assign_speakers(&mut segments, &speaker_segments);
        }

        let transcription = join_segment_text(&segments);
        Ok(ChunkResult {
            transcription,
            mic_text: None,
            sys_text: None,
            mic_segments: Some(segments),
            sys_segments: None,
            dialogue: None,
        })
    }

    async fn transcribe_channel(
        &self,
        samples: &[f32],
        primary: &dyn Engine,
        primary_kind: EngineKind,
        secondary: Option<&dyn Engine>,
        secondary_kind: Option<EngineKind>,
    ) -> CoreResult<Vec<TranscriptSegment>> {
        if !voice_activity_gate(samples) {
            return Ok(Vec::new());
        }
        // When a secondary engine is injected, run C3/C6 fusion via the
        // hybrid transcriber (spec §4.11 "run C3/C6 once per channel");
        // absent one, fall back to primary-only (spec §7 "ModelNotLoaded
        // ... the orchestrator may fall back to primary-only fusion").
        match secondary {
            None => Self::segments_or_empty(primary.transcribe_with_segments(samples).await),
            Some(secondary_engine) => {
                let hybrid = HybridTranscriber {
                    primary,
                    primary_gpu: primary_kind.gpu_backend(),
                    secondary: Some(secondary_engine),
                    secondary_gpu: secondary_kind.unwrap_or(primary_kind).gpu_backend(),
                    config: self.hybrid_config.clone(),
                    grammar: &self.grammar,
                    arbiter: None,
                };
                Self::segments_or_empty(hybrid.transcribe(samples).await)
            }
        }
    }

    /// Spec §7: `InputTooShort`/`InputSilent` are "not errors; return empty
    /// segment list", unlike every other `ASRError` variant which fails the
    /// chunk.
    fn segments_or_empty(
        result: Result<Vec<TranscriptSegment>, crate::asr::types::ASRError>,
    ) -> CoreResult<Vec<TranscriptSegment>> {
        use crate::asr::types::ASRError;
        match result {
            Ok(segments) => Ok(segments),
            Err(ASRError::InputTooShort) => Ok(Vec::new()),
            Err(e) => Err(CoreError::from(e)),
        }
    }

    /// Full-session re-transcription (spec §4.11): re-runs transcription at
    /// "high quality" settings over the concatenated session audio, then
    /// distributes the resulting dialogue/segments across existing chunks
    /// by timestamp intersection, preserving chunk identity.
    pub async fn retranscribe_session(
        &self,
        session_id: Uuid,
        full_audio: &[f32],
        primary: &dyn Engine,
    ) -> CoreResult<()> {
        let segments = primary.transcribe_high_quality(full_audio).await.map_err(CoreError::from)?;
        let handle = self
            .session_manager
            .get(session_id)
            .ok_or_else(|| CoreError::PersistFailed(format!("unknown session {session_id}")))?;
        let chunks: Vec<Chunk> = handle.lock().unwrap().chunks.clone();

        for chunk in &chunks {
            let chunk_segments: Vec<TranscriptSegment> = segments
                .iter()
                .filter(|seg| (seg.start_ms as i64) < chunk.end_ms as i64 && (seg.end_ms as i64) > chunk.start_ms as i64)
                .cloned()
                .collect();
            let transcription = join_segment_text(&chunk_segments);
            let chunk_id = chunk.id;
            self.session_manager.update_chunk(session_id, chunk_id, move |c| {
                c.mic_segments = Some(chunk_segments);
                c.mark_completed(transcription);
            })?;
        }
        Ok(())
    }
}

fn apply_result(chunk: &mut Chunk, result: ChunkResult) {
    chunk.mic_text = result.mic_text;
    chunk.sys_text = result.sys_text;
    chunk.mic_segments = result.mic_segments;
    chunk.sys_segments = result.sys_segments;
    chunk.dialogue = result.dialogue.map(|d| d.into_iter().map(DialogueEntry::from).collect());
    chunk.mark_completed(result.transcription);
}

fn join_segment_text(segments: &[TranscriptSegment]) -> String {
    segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ").trim().to_string()
}

fn render_transcript(dialogue: &[DialogueUtterance]) -> String {
    let labels = crate::dialogue::DialogueLabels::default();
    dialogue.iter().map(|u| u.format(&labels)).collect::<Vec<_>>().join("\n")
}

/// Tags already-transcribed channel segments for direct use with
/// [`crate::dialogue::merge_dialogue`] outside the stereo chunk path (e.g.
/// ad-hoc reprocessing tools).
pub fn tag_channel(channel: Channel, segments: Vec<TranscriptSegment>) -> Vec<ChannelSegment> {
    segments.into_iter().map(|segment| ChannelSegment { channel, segment }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::types::{ASRError, TranscriptWord};
    use crate::session::types::ChunkStatus;
    use tempfile::tempdir;

    struct StubEngine {
        segments: Vec<TranscriptSegment>,
    }

    #[async_trait::async_trait]
    impl Engine for StubEngine {
        async fn transcribe(&self, _samples: &[f32], _use_context: bool) -> Result<String, ASRError> {
            Ok(join_segment_text(&self.segments))
        }
        async fn transcribe_with_segments(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
            Ok(self.segments.clone())
        }
        async fn transcribe_high_quality(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
            Ok(self.segments.clone())
        }
        fn set_language(&mut self, _language: Option<String>) {}
        fn set_model(&mut self, _path_or_id: String) -> Result<(), ASRError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn name(&self) -> &str {
            "stub"
        }
        fn supported_languages(&self) -> &[String] {
            &[]
        }
    }

    fn word(start_ms: u64, end_ms: u64, text: &str) -> TranscriptWord {
        TranscriptWord { start_ms, end_ms, text: text.to_string(), p: 0.9, speaker: None }
    }

    struct NamedStubEngine {
        name: String,
        segments: Vec<TranscriptSegment>,
    }

    #[async_trait::async_trait]
    impl Engine for NamedStubEngine {
        async fn transcribe(&self, _samples: &[f32], _use_context: bool) -> Result<String, ASRError> {
            Ok(join_segment_text(&self.segments))
        }
        async fn transcribe_with_segments(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
            Ok(self.segments.clone())
        }
        async fn transcribe_high_quality(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
            Ok(self.segments.clone())
        }
        fn set_language(&mut self, _language: Option<String>) {}
        fn set_model(&mut self, _path_or_id: String) -> Result<(), ASRError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn name(&self) -> &str {
            &self.name
        }
        fn supported_languages(&self) -> &[String] {
            &[]
        }
    }

    #[tokio::test]
    async fn spec_scenario_1_mono_silence_completes_empty() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(dir.path().to_path_buf()));
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let chunk = Chunk::new_pending(session_id, 0, 0, 3000, false);
        let chunk_id = chunk.id;
        manager.append_chunk(session_id, chunk, &vec![0.0f32; 48_000], 1).unwrap();

        let orchestrator = PipelineOrchestrator::new(manager.clone(), None, PipelineMode::Stereo);
        let engine = StubEngine { segments: Vec::new() };
        orchestrator
            .process_chunk(session_id, chunk_id, vec![0.0f32; 48_000], Vec::new(), &engine, EngineKind::Whisper, None, None)
            .await
            .unwrap();

        let handle = manager.get(session_id).unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.chunks[0].status, ChunkStatus::Completed);
        assert_eq!(session.chunks[0].transcription, "");
        assert!(session.chunks[0].dialogue.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_marks_chunk_failed_without_propagating() {
        struct FailingEngine;
        #[async_trait::async_trait]
        impl Engine for FailingEngine {
            async fn transcribe(&self, _samples: &[f32], _use_context: bool) -> Result<String, ASRError> {
                Err(ASRError::InferenceFailed("boom".to_string()))
            }
            async fn transcribe_with_segments(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
                Err(ASRError::InferenceFailed("boom".to_string()))
            }
            async fn transcribe_high_quality(&self, _samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
                Err(ASRError::InferenceFailed("boom".to_string()))
            }
            fn set_language(&mut self, _language: Option<String>) {}
            fn set_model(&mut self, _path_or_id: String) -> Result<(), ASRError> {
                Ok(())
            }
            fn close(&mut self) {}
            fn name(&self) -> &str {
                "failing"
            }
            fn supported_languages(&self) -> &[String] {
                &[]
            }
        }

        let dir = tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(dir.path().to_path_buf()));
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let chunk = Chunk::new_pending(session_id, 0, 0, 3000, false);
        let chunk_id = chunk.id;
        manager.append_chunk(session_id, chunk, &vec![1.0f32; 48_000], 1).unwrap();

        let orchestrator = PipelineOrchestrator::new(manager.clone(), None, PipelineMode::Stereo);
        let engine = FailingEngine;
        orchestrator
            .process_chunk(session_id, chunk_id, vec![1.0f32; 48_000], Vec::new(), &engine, EngineKind::Whisper, None, None)
            .await
            .unwrap();

        let handle = manager.get(session_id).unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.chunks[0].status, ChunkStatus::Failed);
        assert!(session.chunks[0].error.is_some());
    }

    /// Spec §4.11: stereo mode "runs C3/C6 once per channel" — when a
    /// secondary engine is injected, the orchestrator must actually run
    /// `HybridTranscriber` fusion, not silently ignore the secondary.
    #[tokio::test]
    async fn process_chunk_with_secondary_runs_hybrid_fusion() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(dir.path().to_path_buf()));
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();
        let chunk = Chunk::new_pending(session_id, 0, 0, 3000, false);
        let chunk_id = chunk.id;
        manager.append_chunk(session_id, chunk, &vec![0.5f32; 48_000], 1).unwrap();

        let primary = NamedStubEngine {
            name: "whisper".to_string(),
            segments: vec![TranscriptSegment::from_words(
                vec![TranscriptWord { start_ms: 0, end_ms: 500, text: "primary".to_string(), p: 0.3, speaker: None }],
                None,
            )],
        };
        let secondary = NamedStubEngine {
            name: "gigaam-ctc".to_string(),
            segments: vec![TranscriptSegment::from_words(
                vec![TranscriptWord { start_ms: 0, end_ms: 500, text: "secondary".to_string(), p: 0.9, speaker: None }],
                None,
            )],
        };

        let orchestrator = PipelineOrchestrator::new(manager.clone(), None, PipelineMode::Stereo);
        orchestrator
            .process_chunk(
                session_id,
                chunk_id,
                vec![0.5f32; 48_000],
                Vec::new(),
                &primary,
                EngineKind::Whisper,
                Some(&secondary),
                Some(EngineKind::GigaAmCtc),
            )
            .await
            .unwrap();

        let handle = manager.get(session_id).unwrap();
        let session = handle.lock().unwrap();
        // Average confidence differs by > 0.1 (spec §4.6 parallel mode), so
        // the whole secondary transcript wins wholesale over primary's.
        assert_eq!(session.chunks[0].mic_text.as_deref(), Some("secondary"));
    }

    #[tokio::test]
    async fn spec_scenario_5_retranscribe_distributes_by_timestamp_intersection() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(dir.path().to_path_buf()));
        let session_id = manager.start_session("en".to_string(), "whisper".to_string()).unwrap();

        for (index, (start, end)) in [(0u64, 10_000u64), (10_000, 20_000), (20_000, 25_000)].into_iter().enumerate() {
            let chunk = Chunk::new_pending(session_id, index as u32, start, end, false);
            manager.append_chunk(session_id, chunk, &vec![0.0f32; ((end - start) * 16) as usize], 1).unwrap();
        }

        let segments = vec![
            TranscriptSegment::from_words(vec![word(2000, 2500, "a")], None),
            TranscriptSegment::from_words(vec![word(12000, 12500, "b")], None),
            TranscriptSegment::from_words(vec![word(22000, 22500, "c")], None),
        ];
        let engine = StubEngine { segments };
        let orchestrator = PipelineOrchestrator::new(manager.clone(), None, PipelineMode::Stereo);
        orchestrator.retranscribe_session(session_id, &vec![0.0f32; 25_000 * 16], &engine).await.unwrap();

        let handle = manager.get(session_id).unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.chunks.len(), 3);
        assert_eq!(session.chunks[0].transcription, "a");
        assert_eq!(session.chunks[1].transcription, "b");
        assert_eq!(session.chunks[2].transcription, "c");
        for chunk in &session.chunks {
            assert_eq!(chunk.status, ChunkStatus::Completed);
        }
    }
}
