//! Voting/fusion (C5) and the hybrid transcriber (C6) — spec §4.5, §4.6.

pub mod hotwords;
pub mod hybrid;
pub mod levenshtein;
pub mod voting;

pub use hybrid::{FusionMode, HybridConfig, HybridTranscriber};
pub use voting::{select_best_word, Side, VotingConfig};
