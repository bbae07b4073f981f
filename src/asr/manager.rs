//! Engine manager (spec §4.3, C4): owns the active engine, constructs
//! secondary engines for fusion, and routes per-language defaults.
//!
//! Actual engine construction (loading a model, resolving a subprocess
//! binary path) is left to an injected factory — that resolution belongs to
//! the external model-download/runtime-binding layer (spec §1); this module
//! only owns *which* engine kind should be active for a given language and
//! the classification needed for the hybrid transcriber's concurrency
//! decision (spec §5).

use crate::asr::engine::{Engine, GpuBackend};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The five engine families spec §4.3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Whisper,
    GigaAmCtc,
    GigaAmRnnt,
    FluidAsrBpe,
    ParakeetTdt,
}

impl EngineKind {
    /// GPU backend each family runs its forward pass on (spec §5): only
    /// Whisper-like engines are assumed Metal-capable here, and the
    /// subprocess-wrapped Parakeet-TDT is assumed CoreML — the pairing the
    /// spec calls out as unsafe to parallelise.
    pub fn gpu_backend(self) -> GpuBackend {
        match self {
            EngineKind::Whisper => GpuBackend::Metal,
            EngineKind::ParakeetTdt => GpuBackend::CoreML,
            EngineKind::GigaAmCtc | EngineKind::GigaAmRnnt | EngineKind::FluidAsrBpe => GpuBackend::None,
        }
    }
}

/// Builds a fresh engine instance for a given kind. Supplied by the caller
/// (the runtime-binding layer) since construction needs model paths this
/// crate does not resolve.
pub type EngineFactory = Arc<dyn Fn(EngineKind) -> Box<dyn Engine> + Send + Sync>;

/// Owns the single active engine and knows how to build secondaries for
/// fusion (spec §4.3 C4).
pub struct EngineManager {
    factory: EngineFactory,
    active: Mutex<Box<dyn Engine>>,
    active_kind: Mutex<EngineKind>,
    /// Per-language default engine kind (spec: "routes per-language
    /// defaults"); a language with no entry keeps whatever engine is active.
    language_defaults: HashMap<String, EngineKind>,
}

impl EngineManager {
    pub fn new(
        factory: EngineFactory,
        initial_kind: EngineKind,
        language_defaults: HashMap<String, EngineKind>,
    ) -> Self {
        let active = factory(initial_kind);
        Self {
            factory,
            active: Mutex::new(active),
            active_kind: Mutex::new(initial_kind),
            language_defaults,
        }
    }

    pub async fn active_kind(&self) -> EngineKind {
        *self.active_kind.lock().await
    }

    /// Routes to the per-language default engine, swapping the active engine
    /// if the language's default differs from what is currently active.
    pub async fn set_language(&self, language: &str) {
        if let Some(&wanted) = self.language_defaults.get(language) {
            let mut kind = self.active_kind.lock().await;
            if *kind != wanted {
                let mut engine = self.active.lock().await;
                engine.close();
                *engine = (self.factory)(wanted);
                engine.set_language(Some(language.to_string()));
                *kind = wanted;
                return;
            }
        }
        self.active.lock().await.set_language(Some(language.to_string()));
    }

    /// Builds a fresh secondary engine of `kind` for the hybrid transcriber,
    /// independent of (and not replacing) the active engine.
    pub fn build_secondary(&self, kind: EngineKind) -> Box<dyn Engine> {
        (self.factory)(kind)
    }

    pub async fn with_active<R>(&self, f: impl FnOnce(&dyn Engine) -> R) -> R {
        let engine = self.active.lock().await;
        f(engine.as_ref())
    }
}
