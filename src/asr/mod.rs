//! Multi-engine ASR layer (spec §4.3, C3/C4).
//!
//! Each engine family implements the [`engine::Engine`] trait over an
//! already-canonicalised mono 16 kHz buffer; native model runtimes are
//! external collaborators (spec §1) behind small per-family backend traits.

pub mod bpe;
pub mod ctc;
pub mod engine;
pub mod manager;
pub mod rnnt;
pub mod subprocess;
pub mod types;
pub mod whisper;

pub use engine::{Engine, GpuBackend};
pub use types::*;
