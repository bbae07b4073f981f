//! Hybrid transcriber (spec §4.6, C6): runs primary (+ secondary) engines
//! and merges at word level.
//!
//! The parallel/sequential execution choice itself (spec §5, §9: "an
//! enum-driven branch, not a language primitive") lives in
//! [`crate::asr::engine::requires_sequential_execution`]; this module calls
//! it to decide how to await the two engines.

use crate::asr::engine::{requires_sequential_execution, Engine, GpuBackend};
use crate::asr::types::{ASRError, TranscriptSegment, TranscriptWord};
use crate::fusion::hotwords::surface_fix;
use crate::fusion::voting::{select_best_word, Side, VotingConfig};
use crate::grammar::GrammarChecker;

/// An external language-model arbiter for full-compare mode (spec §4.6);
/// genuinely out of scope as a concrete implementation (spec §1: "summary
/// generation via external language models") but the seam is real.
pub trait LmArbiter: Send + Sync {
    fn choose(&self, primary_text: &str, secondary_text: &str) -> ArbiterChoice;
}

#[derive(Debug, Clone)]
pub enum ArbiterChoice {
    Primary,
    Secondary,
    Merged(String),
}

#[derive(Debug, Clone)]
pub enum FusionMode {
    /// Re-transcribe only low-confidence regions with the secondary engine
    /// (spec §4.6).
    Confidence { threshold: f32, context_words: usize },
    /// Run both engines and vote per word (spec §4.6, default).
    Parallel,
    /// Transcribe independently; arbiter (if any) chooses; otherwise keep
    /// primary (spec §4.6).
    FullCompare,
}

#[derive(Clone)]
pub struct HybridConfig {
    pub mode: FusionMode,
    pub voting: VotingConfig,
    pub hotwords: Vec<String>,
    pub sample_rate: u32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::Parallel,
            voting: VotingConfig::default(),
            hotwords: Vec::new(),
            sample_rate: crate::audio::types::CANONICAL_SAMPLE_RATE,
        }
    }
}

/// Greedily pairs each primary word with at most one secondary word whose
/// midpoint falls within ±300 ms, consuming candidates at most once (spec
/// §4.5).
fn pair_words_by_midpoint<'a>(
    primary: &'a [TranscriptWord],
    secondary: &'a [TranscriptWord],
) -> Vec<Option<&'a TranscriptWord>> {
    let mut used = vec![false; secondary.len()];
    primary
        .iter()
        .map(|p_word| {
            let p_mid = p_word.midpoint_ms();
            secondary
                .iter()
                .enumerate()
                .filter(|(i, s_word)| !used[*i] && (s_word.midpoint_ms() - p_mid).abs() <= 300.0)
                .min_by(|(_, a), (_, b)| {
                    (a.midpoint_ms() - p_mid)
                        .abs()
                        .partial_cmp(&(b.midpoint_ms() - p_mid).abs())
                        .unwrap()
                })
                .map(|(i, s_word)| {
                    used[i] = true;
                    s_word
                })
        })
        .collect()
}

fn average_confidence(words: &[TranscriptWord]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    words.iter().map(|w| w.p).sum::<f32>() / words.len() as f32
}

fn flatten_words(segments: &[TranscriptSegment]) -> Vec<TranscriptWord> {
    segments.iter().flat_map(|s| s.words.clone()).collect()
}

fn apply_hotword_surface_fixes(words: &mut [TranscriptWord], hotwords: &[String]) {
    if hotwords.is_empty() {
        return;
    }
    for word in words.iter_mut() {
        if let Some(fixed) = surface_fix(&word.text, hotwords) {
            word.text = fixed;
        }
    }
}

/// Per-word voting merge of two word-aligned engine outputs (spec §4.5 and
/// the word-aligned half of §4.6 parallel mode).
pub fn vote_merge(
    primary_words: &[TranscriptWord],
    primary_engine: &str,
    secondary_words: &[TranscriptWord],
    secondary_engine: &str,
    grammar: &GrammarChecker,
    voting: &VotingConfig,
) -> Vec<TranscriptWord> {
    let pairs = pair_words_by_midpoint(primary_words, secondary_words);
    primary_words
        .iter()
        .zip(pairs)
        .map(|(p_word, matched)| match matched {
            None => p_word.clone(),
            Some(s_word) => {
                let winner = select_best_word(p_word, primary_engine, s_word, secondary_engine, grammar, voting);
                match winner {
                    Side::Primary => p_word.clone(),
                    Side::Secondary => s_word.clone(),
                }
            }
        })
        .collect()
}

/// Borrows its engines rather than owning them, so the orchestrator (which
/// only ever holds `&dyn Engine` references to the session's long-lived
/// engines) can build one of these per chunk without taking ownership
/// (spec §4.11 "run C3/C6 once per channel").
pub struct HybridTranscriber<'a> {
    pub primary: &'a dyn Engine,
    pub primary_gpu: GpuBackend,
    pub secondary: Option<&'a dyn Engine>,
    pub secondary_gpu: GpuBackend,
    pub config: HybridConfig,
    pub grammar: &'a GrammarChecker,
    pub arbiter: Option<Box<dyn LmArbiter>>,
}

impl<'a> HybridTranscriber<'a> {
    pub async fn transcribe(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
        match &self.config.mode {
            FusionMode::Confidence { threshold, context_words } => {
                self.transcribe_confidence_mode(samples, *threshold, *context_words).await
            }
            FusionMode::Parallel => self.transcribe_parallel_mode(samples).await,
            FusionMode::FullCompare => self.transcribe_full_compare_mode(samples).await,
        }
    }

    async fn run_both(&self, samples: &[f32]) -> (Result<Vec<TranscriptSegment>, ASRError>, Option<Result<Vec<TranscriptSegment>, ASRError>>) {
        let Some(secondary) = self.secondary.as_ref() else {
            return (self.primary.transcribe_with_segments(samples).await, None);
        };

        if requires_sequential_execution(self.primary_gpu, self.secondary_gpu) {
            let primary_result = self.primary.transcribe_with_segments(samples).await;
            let secondary_result = secondary.transcribe_with_segments(samples).await;
            (primary_result, Some(secondary_result))
        } else {
            let (primary_result, secondary_result) =
                tokio::join!(self.primary.transcribe_with_segments(samples), secondary.transcribe_with_segments(samples));
            (primary_result, Some(secondary_result))
        }
    }

    async fn transcribe_parallel_mode(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
        let (primary_result, secondary_result) = self.run_both(samples).await;
        let primary_segments = primary_result?;

        let Some(secondary_result) = secondary_result else {
            return Ok(primary_segments);
        };
        let secondary_segments = match secondary_result {
            Ok(s) => s,
            Err(_) => return Ok(primary_segments), // secondary unavailable: fall back to primary-only
        };

        let primary_words = flatten_words(&primary_segments);
        let secondary_words = flatten_words(&secondary_segments);

        let primary_text: String = primary_words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        let secondary_text: String = secondary_words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        if primary_text == secondary_text {
            return Ok(primary_segments);
        }

        let primary_avg = average_confidence(&primary_words);
        let secondary_avg = average_confidence(&secondary_words);

        let mut merged_words = if (primary_avg - secondary_avg).abs() > 0.1 {
            if secondary_avg > primary_avg {
                secondary_words
            } else {
                primary_words
            }
        } else {
            vote_merge(
                &primary_words,
                self.primary.name(),
                &secondary_words,
                self.secondary.as_ref().map(|s| s.name()).unwrap_or(""),
                &self.grammar,
                &self.config.voting,
            )
        };

        apply_hotword_surface_fixes(&mut merged_words, &self.config.hotwords);

        if merged_words.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TranscriptSegment::from_words(merged_words, None)])
    }

    async fn transcribe_full_compare_mode(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>, ASRError> {
        let (primary_result, secondary_result) = self.run_both(samples).await;
        let primary_segments = primary_result?;

        let Some(Ok(secondary_segments)) = secondary_result else {
            return Ok(primary_segments);
        };

        let Some(arbiter) = self.arbiter.as_ref() else {
            return Ok(primary_segments);
        };

        let primary_text: String = primary_segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
        let secondary_text: String = secondary_segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");

        match arbiter.choose(&primary_text, &secondary_text) {
            ArbiterChoice::Primary => Ok(primary_segments),
            ArbiterChoice::Secondary => Ok(secondary_segments),
            ArbiterChoice::Merged(text) => {
                let word = TranscriptWord { start_ms: 0, end_ms: 1, text, p: 1.0, speaker: None };
                Ok(vec![TranscriptSegment::from_words(vec![word], None)])
            }
        }
    }

    async fn transcribe_confidence_mode(
        &self,
        samples: &[f32],
        threshold: f32,
        context_words: usize,
    ) -> Result<Vec<TranscriptSegment>, ASRError> {
        let primary_segments = self.primary.transcribe_with_segments(samples).await?;
        let mut words = flatten_words(&primary_segments);
        if words.is_empty() || self.secondary.is_none() {
            return Ok(primary_segments);
        }

        let low_confidence_regions = find_low_confidence_regions(&words, threshold, context_words);
        let merged_regions = merge_close_regions(low_confidence_regions, &words, 500);

        let secondary = self.secondary.as_ref().unwrap();
        let sample_rate = self.config.sample_rate as f64;

        // Process from the last region backwards so splicing an earlier
        // region never invalidates the index range of a later one.
        for region in merged_regions.into_iter().rev() {
            let region_avg_p = average_confidence(&words[region.start_idx..=region.end_idx]);
            let start_ms = words[region.start_idx].start_ms.saturating_sub(100);
            let end_ms = words[region.end_idx].end_ms + 100;
            let start_sample = ((start_ms as f64 / 1000.0) * sample_rate) as usize;
            let end_sample = (((end_ms as f64 / 1000.0) * sample_rate) as usize).min(samples.len());
            if start_sample >= end_sample {
                continue;
            }

            let Ok(secondary_segments) = secondary.transcribe_with_segments(&samples[start_sample..end_sample]).await else {
                continue;
            };
            let secondary_words = flatten_words(&secondary_segments);
            if secondary_words.is_empty() {
                continue;
            }
            let secondary_avg_p = average_confidence(&secondary_words);

            if secondary_avg_p > region_avg_p {
                let offset_ms = start_ms;
                let mut replacement: Vec<TranscriptWord> = secondary_words
                    .into_iter()
                    .map(|mut w| {
                        w.start_ms += offset_ms;
                        w.end_ms += offset_ms;
                        w
                    })
                    .collect();
                words.splice(region.start_idx..=region.end_idx, replacement.drain(..));
            }
        }

        if words.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TranscriptSegment::from_words(words, None)])
    }
}

struct LowConfidenceRegion {
    start_idx: usize,
    end_idx: usize,
}

fn find_low_confidence_regions(
    words: &[TranscriptWord],
    threshold: f32,
    context_words: usize,
) -> Vec<LowConfidenceRegion> {
    let mut regions = Vec::new();
    let mut i = 0;
    while i < words.len() {
        if words[i].p < threshold {
            let start = i.saturating_sub(context_words);
            let mut j = i;
            while j + 1 < words.len() && words[j + 1].p < threshold {
                j += 1;
            }
            let end = (j + context_words).min(words.len() - 1);
            regions.push(LowConfidenceRegion { start_idx: start, end_idx: end });
            i = j + 1;
        } else {
            i += 1;
        }
    }
    regions
}

fn merge_close_regions(regions: Vec<LowConfidenceRegion>, words: &[TranscriptWord], gap_ms: u64) -> Vec<LowConfidenceRegion> {
    // Merge adjacent regions whose actual time gap (the end of the last
    // region's words to the start of the next region's words) is below the
    // threshold (spec: "merge regions closer than 500 ms within the same
    // segment").
    let mut merged: Vec<LowConfidenceRegion> = Vec::new();
    for region in regions {
        if let Some(last) = merged.last_mut() {
            let gap = words[region.start_idx].start_ms.saturating_sub(words[last.end_idx].end_ms);
            if gap < gap_ms {
                last.end_idx = last.end_idx.max(region.end_idx);
                continue;
            }
        }
        merged.push(region);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: u64, end: u64, p: f32) -> TranscriptWord {
        TranscriptWord { start_ms: start, end_ms: end, text: text.to_string(), p, speaker: None }
    }

    #[test]
    fn midpoint_pairing_consumes_candidates_at_most_once() {
        let primary = vec![word("a", 0, 200, 0.9), word("b", 1000, 1200, 0.9)];
        let secondary = vec![word("a2", 50, 250, 0.8)];
        let pairs = pair_words_by_midpoint(&primary, &secondary);
        assert!(pairs[0].is_some());
        assert!(pairs[1].is_none());
    }

    #[test]
    fn identical_texts_keep_primary_without_voting() {
        let words = vec![word("same", 0, 200, 0.5)];
        let merged = vote_merge(&words, "whisper", &words, "whisper", &GrammarChecker::new(), &VotingConfig::default());
        assert_eq!(merged[0].text, "same");
    }

    #[test]
    fn low_confidence_region_detection_respects_context_window() {
        let words = vec![
            word("a", 0, 100, 0.95),
            word("b", 100, 200, 0.3),
            word("c", 200, 300, 0.95),
        ];
        let regions = find_low_confidence_regions(&words, 0.5, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_idx, 0);
        assert_eq!(regions[0].end_idx, 2);
    }

    #[test]
    fn merge_close_regions_honors_time_gap_not_index_adjacency() {
        let words = vec![
            word("a", 0, 100, 0.2),
            word("b", 100, 200, 0.9),
            word("c", 5000, 5100, 0.2),
        ];
        let regions = vec![
            LowConfidenceRegion { start_idx: 0, end_idx: 0 },
            LowConfidenceRegion { start_idx: 2, end_idx: 2 },
        ];
        let merged = merge_close_regions(regions, &words, 500);
        assert_eq!(merged.len(), 2, "regions 4900ms apart must not merge at a 500ms threshold");
    }

    #[test]
    fn merge_close_regions_merges_when_gap_under_threshold() {
        let words = vec![
            word("a", 0, 100, 0.2),
            word("b", 100, 200, 0.9),
            word("c", 400, 500, 0.2),
        ];
        let regions = vec![
            LowConfidenceRegion { start_idx: 0, end_idx: 0 },
            LowConfidenceRegion { start_idx: 2, end_idx: 2 },
        ];
        let merged = merge_close_regions(regions, &words, 500);
        assert_eq!(merged.len(), 1, "regions 300ms apart must merge at a 500ms threshold");
        assert_eq!(merged[0].end_idx, 2);
    }
}
