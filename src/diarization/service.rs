//! Diarisation service (spec §4.7, C7): coordinates embedding extraction,
//! clustering, and mapping speaker labels onto transcript segments.

use crate::asr::types::TranscriptSegment;

use super::clustering::cluster_embeddings;
use super::embedder::SpeakerEmbedder;
use super::types::{DiarizationConfig, SpeakerEmbedding, SpeakerSegment};

pub struct DiarizationService {
    config: DiarizationConfig,
    embedder: Box<dyn SpeakerEmbedder>,
}

impl DiarizationService {
    pub fn new(config: DiarizationConfig, embedder: Box<dyn SpeakerEmbedder>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &DiarizationConfig {
        &self.config
    }

    /// Full in-process diarisation: slices `samples` into candidate windows,
    /// embeds each, and clusters via transitive-closure union-find (spec
    /// §4.7). Windows shorter than `min_segment_duration_s` are skipped
    /// before embedding extraction.
    pub fn diarize(&self, samples: &[f32], sample_rate: u32, window_s: f64, hop_s: f64) -> Vec<SpeakerSegment> {
        if samples.is_empty() || sample_rate == 0 {
            return Vec::new();
        }

        let window_samples = (window_s * sample_rate as f64) as usize;
        let hop_samples = ((hop_s * sample_rate as f64) as usize).max(1);

        let mut embeddings: Vec<SpeakerEmbedding> = Vec::new();
        let mut pos = 0usize;
        while pos < samples.len() {
            let end = (pos + window_samples).min(samples.len());
            let window = &samples[pos..end];
            let start_s = pos as f64 / sample_rate as f64;
            let end_s = end as f64 / sample_rate as f64;

            if end_s - start_s >= self.config.min_segment_duration_s {
                if let Some(embedding) = self.embedder.embed(window, sample_rate, start_s, end_s) {
                    embeddings.push(embedding);
                }
            }

            if end == samples.len() {
                break;
            }
            pos += hop_samples;
        }

        let labels = cluster_embeddings(&embeddings, self.config.clustering_threshold);
        embeddings
            .iter()
            .zip(labels)
            .map(|(e, label)| SpeakerSegment { start_s: e.start_s, end_s: e.end_s, speaker_id: label })
            .collect()
    }

    /// Assigns each transcript segment the speaker whose overlap (in
    /// seconds) is maximal; ties resolve to the lower speaker ID (spec
    /// §4.7 "Mapping speakers to transcript segments").
    pub fn assign_speakers(
        &self,
        transcript_segments: &mut [TranscriptSegment],
        speaker_segments: &[SpeakerSegment],
    ) {
        for segment in transcript_segments.iter_mut() {
            let start_s = segment.start_ms as f64 / 1000.0;
            let end_s = segment.end_ms as f64 / 1000.0;

            let mut best: Option<(u32, f64)> = None;
            for speaker_segment in speaker_segments {
                let overlap = speaker_segment.overlap_seconds(start_s, end_s);
                if overlap <= 0.0 {
                    continue;
                }
                best = match best {
                    None => Some((speaker_segment.speaker_id, overlap)),
                    Some((id, ov)) if overlap > ov || (overlap == ov && speaker_segment.speaker_id < id) => {
                        Some((speaker_segment.speaker_id, overlap))
                    }
                    Some(existing) => Some(existing),
                };
            }

            if let Some((speaker_id, _)) = best {
                segment.speaker = Some(speaker_id);
                for word in &mut segment.words {
                    word.speaker = Some(speaker_id);
                }
            }
        }
    }
}
