//! Crate-wide error type
//!
//! Individual modules keep their own `thiserror`-derived error enums
//! (`AudioError`, `ASRError`, `DiarizationError`, ...); this type unifies
//! them at the boundaries callers actually cross (the pipeline orchestrator,
//! the session store), the way the spec's §7 error catalogue expects a
//! single vocabulary even though each subsystem raises its own leaf error.

use thiserror::Error;

/// Error kinds the core distinguishes, per spec §7.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("model missing: {0}")]
    ModelMissing(String),

    /// Not an error condition in the propagation sense (§7: "not errors;
    /// return empty segment list") but kept as a variant so callers that
    /// want to distinguish it from a hard failure can match on it.
    #[error("input too short for inference")]
    InputTooShort,

    #[error("input contains no detectable speech")]
    InputSilent,

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("subprocess failed (exit {exit_code:?}): {stderr}")]
    SubprocessFailed { exit_code: Option<i32>, stderr: String },

    #[error("persistence failed: {0}")]
    PersistFailed(String),

    #[error("concurrency violation: {0}")]
    ConcurrencyViolation(String),

    #[error(transparent)]
    Audio(#[from] crate::audio::types::AudioError),

    #[error(transparent)]
    Asr(#[from] crate::asr::types::ASRError),

    #[error(transparent)]
    Diarization(#[from] crate::diarization::types::DiarizationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
