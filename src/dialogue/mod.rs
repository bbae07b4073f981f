//! Dialogue assembly (spec §4.8, C8): merges per-channel transcript
//! segments into an interleaved, speaker-attributed dialogue.
//!
//! Grounded on the `merge_words_to_dialogue` family in the `aiwisper-ml`
//! crate (`examples/askidmobile-AIWisper/rust/crates/aiwisper-ml/src/
//! dialogue_merge.rs`), which implements the same four-step algorithm
//! (anomaly repair, tag+sort, overlap handling, post-process) against the
//! same thresholds this spec names (1000 ms same-speaker merge gap, 500 ms
//! overlap tolerance, 2000 ms max word duration, the three post-process
//! merge conditions). Reworked here against this crate's
//! `asr::types::{TranscriptSegment, TranscriptWord}` (millisecond `u64`
//! timestamps) rather than that crate's `i64` milliseconds, and extended so
//! a system-channel speaker carries an optional diarisation id (spec §4.7
//! output), not just a bare channel tag — `Speaker::System(Some(1))` renders
//! as "Собеседник 2", matching that crate's own test fixture naming.

use crate::asr::types::{TranscriptSegment, TranscriptWord};

/// Word cannot legitimately last longer than this; anything over is a
/// known engine artefact (spec §4.8 step 1, §3 TranscriptWord invariant).
pub const MAX_WORD_DURATION_MS: u64 = 2000;
/// Same-speaker segments closer together than this are one phrase (spec
/// §4.8 step 3).
pub const SEGMENT_MERGE_GAP_MS: u64 = 1000;
/// Overlap smaller than this between different speakers is timestamp slop,
/// not a real interruption (spec §4.8 step 3).
pub const OVERLAP_TOLERANCE_MS: u64 = 500;
/// Gap threshold for the no-word-timing fallback (spec §4.8 final
/// paragraph).
pub const SEGMENT_LEVEL_GAP_MS: u64 = 2000;

/// Which physical stream a segment came from (spec §4.8 step 2: "mark each
/// segment with its channel").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Mic,
    System,
}

/// A dialogue-level speaker identity. The microphone side is always one
/// speaker ("the conversation initiator", spec §4.8 step 2); the system
/// side may carry a diarisation id (spec §4.7) distinguishing multiple
/// remote participants. `System(None)` means "undifferentiated system
/// audio" and is considered the same speaker as any other `System(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Mic,
    System(Option<u32>),
}

impl Speaker {
    fn label(&self, mic_label: &str, system_label: &str) -> String {
        match self {
            Speaker::Mic => mic_label.to_string(),
            Speaker::System(None) => system_label.to_string(),
            Speaker::System(Some(id)) => format!("{system_label} {}", id + 1),
        }
    }
}

/// A single channel-tagged transcript segment, the input unit to dialogue
/// assembly.
#[derive(Debug, Clone)]
pub struct ChannelSegment {
    pub channel: Channel,
    pub segment: TranscriptSegment,
}

impl ChannelSegment {
    fn speaker(&self) -> Speaker {
        match self.channel {
            Channel::Mic => Speaker::Mic,
            Channel::System => Speaker::System(self.segment.speaker),
        }
    }
}

/// Custom speaker labels (spec §4.8 formatting: "unless a custom label is
/// set").
#[derive(Debug, Clone)]
pub struct DialogueLabels {
    pub mic: String,
    pub system: String,
}

impl Default for DialogueLabels {
    fn default() -> Self {
        Self { mic: "Вы".to_string(), system: "Собеседник".to_string() }
    }
}

/// One assembled utterance in the merged dialogue.
#[derive(Debug, Clone)]
pub struct DialogueUtterance {
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker: Speaker,
    pub text: String,
    pub words: Vec<TranscriptWord>,
}

impl DialogueUtterance {
    fn from_channel_segment(cs: ChannelSegment) -> Self {
        Self {
            start_ms: cs.segment.start_ms,
            end_ms: cs.segment.end_ms,
            speaker: cs.speaker(),
            text: cs.segment.text,
            words: cs.segment.words,
        }
    }

    /// Renders as `[MM:SS] <Speaker>: <text>` (spec §4.8 "Formatting").
    pub fn format(&self, labels: &DialogueLabels) -> String {
        let total_s = self.start_ms / 1000;
        let mm = total_s / 60;
        let ss = total_s % 60;
        format!("[{mm:02}:{ss:02}] {}: {}", self.speaker.label(&labels.mic, &labels.system), self.text)
    }
}

/// Step 1 (spec §4.8): shortens any word lasting more than
/// [`MAX_WORD_DURATION_MS`] to `start + 500 ms` (clipped to the next word's
/// start when that is sooner), then re-derives the segment's bounds.
fn repair_anomalous_timestamps(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    for segment in &mut segments {
        let len = segment.words.len();
        for i in 0..len {
            let duration = segment.words[i].end_ms.saturating_sub(segment.words[i].start_ms);
            if duration > MAX_WORD_DURATION_MS {
                let mut new_end = segment.words[i].start_ms + 500;
                if i + 1 < len {
                    new_end = new_end.min(segment.words[i + 1].start_ms);
                }
                segment.words[i].end_ms = new_end.max(segment.words[i].start_ms + 1);
            }
        }
        if !segment.words.is_empty() {
            segment.start_ms = segment.words.iter().map(|w| w.start_ms).min().unwrap();
            segment.end_ms = segment.words.iter().map(|w| w.end_ms).max().unwrap();
        }
    }
    segments
}

/// Step 2 (spec §4.8): tag with channel and stable-sort by start time, ties
/// broken mic-first.
fn tag_and_sort(mic: Vec<TranscriptSegment>, system: Vec<TranscriptSegment>) -> Vec<ChannelSegment> {
    let mut tagged: Vec<ChannelSegment> = mic
        .into_iter()
        .map(|segment| ChannelSegment { channel: Channel::Mic, segment })
        .chain(system.into_iter().map(|segment| ChannelSegment { channel: Channel::System, segment }))
        .collect();

    tagged.sort_by(|a, b| {
        a.segment.start_ms.cmp(&b.segment.start_ms).then_with(|| match (a.channel, b.channel) {
            (Channel::Mic, Channel::System) => std::cmp::Ordering::Less,
            (Channel::System, Channel::Mic) => std::cmp::Ordering::Greater,
            _ => std::cmp::Ordering::Equal,
        })
    });
    tagged
}

/// Step 3 (spec §4.8): iterate in sorted order, merging same-speaker
/// near-adjacent segments, clipping small cross-speaker overlaps, and
/// keeping genuine interruptions.
fn merge_with_overlap_handling(tagged: Vec<ChannelSegment>) -> Vec<DialogueUtterance> {
    let mut result: Vec<DialogueUtterance> = Vec::new();

    for cs in tagged {
        let speaker = cs.speaker();
        let utterance = DialogueUtterance::from_channel_segment(cs);

        let Some(prev) = result.last_mut() else {
            result.push(utterance);
            continue;
        };

        if prev.speaker == speaker {
            let gap_ok = utterance.start_ms >= prev.end_ms
                && utterance.start_ms - prev.end_ms < SEGMENT_MERGE_GAP_MS;
            let overlapping = utterance.start_ms < prev.end_ms;
            if gap_ok || overlapping {
                prev.end_ms = prev.end_ms.max(utterance.end_ms);
                prev.text = format!("{} {}", prev.text, utterance.text);
                prev.words.extend(utterance.words);
                continue;
            }
            result.push(utterance);
            continue;
        }

        // Different speakers: measure overlap of `utterance` into `prev`.
        if prev.end_ms > utterance.start_ms {
            let overlap_ms = prev.end_ms - utterance.start_ms;
            if overlap_ms < OVERLAP_TOLERANCE_MS {
                // Timestamp slop: clip prev to end where the new one starts.
                prev.end_ms = utterance.start_ms;
            }
            // overlap_ms >= tolerance: genuine interruption, keep both as-is.
        }
        result.push(utterance);
    }

    result
}

/// Step 4 (spec §4.8): merge adjacent same-speaker utterances whose gap
/// satisfies any of the three leniency conditions.
fn post_process(utterances: Vec<DialogueUtterance>) -> Vec<DialogueUtterance> {
    let mut result: Vec<DialogueUtterance> = Vec::new();

    for utterance in utterances {
        let Some(prev) = result.last_mut() else {
            result.push(utterance);
            continue;
        };

        if prev.speaker == utterance.speaker {
            let gap = utterance.start_ms.saturating_sub(prev.end_ms);
            let prev_duration = prev.end_ms.saturating_sub(prev.start_ms);
            let prev_word_count = prev.text.split_whitespace().count();

            let should_merge = (gap < 800 && prev_duration < 2000)
                || gap < 300
                || (gap < 1000 && prev_word_count == 1);

            if should_merge {
                prev.end_ms = prev.end_ms.max(utterance.end_ms);
                prev.text = format!("{} {}", prev.text, utterance.text);
                prev.words.extend(utterance.words);
                continue;
            }
        }
        result.push(utterance);
    }

    result
}

/// Full word-level dialogue assembly (spec §4.8 steps 1-4).
pub fn merge_dialogue(
    mic_segments: Vec<TranscriptSegment>,
    system_segments: Vec<TranscriptSegment>,
) -> Vec<DialogueUtterance> {
    if mic_segments.is_empty() && system_segments.is_empty() {
        return Vec::new();
    }

    let mic_segments = repair_anomalous_timestamps(mic_segments);
    let system_segments = repair_anomalous_timestamps(system_segments);

    let tagged = tag_and_sort(mic_segments, system_segments);
    let merged = merge_with_overlap_handling(tagged);
    post_process(merged)
}

/// Fallback when no word-level timing is available (spec §4.8 final
/// paragraph): group purely by a 2 s gap threshold between segments of the
/// same speaker, skipping the word-level repair/overlap-clip machinery
/// that needs per-word timestamps.
pub fn merge_dialogue_segment_level(
    mic_segments: Vec<TranscriptSegment>,
    system_segments: Vec<TranscriptSegment>,
) -> Vec<DialogueUtterance> {
    if mic_segments.is_empty() && system_segments.is_empty() {
        return Vec::new();
    }

    let tagged = tag_and_sort(mic_segments, system_segments);
    let mut result: Vec<DialogueUtterance> = Vec::new();

    for cs in tagged {
        let speaker = cs.speaker();
        let utterance = DialogueUtterance::from_channel_segment(cs);

        let Some(prev) = result.last_mut() else {
            result.push(utterance);
            continue;
        };

        if prev.speaker == speaker && utterance.start_ms.saturating_sub(prev.end_ms) < SEGMENT_LEVEL_GAP_MS {
            prev.end_ms = prev.end_ms.max(utterance.end_ms);
            prev.text = format!("{} {}", prev.text, utterance.text);
            prev.words.extend(utterance.words);
        } else {
            result.push(utterance);
        }
    }

    result
}
