//! Speaker diarisation (spec §4.7, C7): turns candidate speech segments
//! into speaker-labelled segments via embedding extraction, union-find
//! clustering over cosine distance, and overlap-based assignment back onto
//! transcript segments.
//!
//! The embedding model itself (3D-Speaker ERes2NetV2 in the teacher, loaded
//! through a native ONNX runtime binding) is out of scope (spec §1); what's
//! implemented here is the `SpeakerEmbedder` trait boundary, a deterministic
//! reference embedder good enough to exercise clustering end-to-end, and the
//! clustering/assignment math itself.

pub mod clustering;
pub mod embedder;
pub mod service;
pub mod subprocess;
pub mod types;

pub use embedder::{SpeakerEmbedder, SpectralStatsEmbedder};
pub use service::DiarizationService;
pub use types::{DiarizationConfig, DiarizationError, SpeakerEmbedding, SpeakerSegment};
