//! Inference gateway: owns the one loaded model and runs single-turn
//! completions against it.
//!
//! `Engine` and `LoadedModel` are enums over the concrete backends in
//! `providers/`. Adding a backend = new module + new variants + new match
//! arms. All calls here are blocking; callers on an async runtime must go
//! through `spawn_blocking`.
//!
//! Each completion is a fresh one-message exchange: earlier turns of the
//! conversation are not replayed to the model.

pub mod providers;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::AppError;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown inference engine: {0}")]
    UnknownEngine(String),
    #[error("{0}")]
    Load(String),
    #[error("{0}")]
    Request(String),
}

// ── Engine / LoadedModel enums ────────────────────────────────────────────────

/// Something that can turn a model file into a [`LoadedModel`].
#[derive(Debug, Clone)]
pub enum Engine {
    Dummy(providers::dummy::DummyEngine),
    LlamaServer(providers::llama_server::LlamaServerEngine),
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Dummy(_) => "dummy",
            Engine::LlamaServer(_) => "llama-server",
        }
    }

    /// Load the model at `path`. `format_hint` names the chat template.
    pub fn load(&self, path: &Path, format_hint: &str) -> Result<LoadedModel, EngineError> {
        match self {
            Engine::Dummy(e) => e.load(path, format_hint).map(LoadedModel::Dummy),
            Engine::LlamaServer(e) => e.load(path, format_hint).map(LoadedModel::LlamaServer),
        }
    }
}

/// A model resident in memory. Dropping it releases the engine's resources.
#[derive(Debug)]
pub enum LoadedModel {
    Dummy(providers::dummy::DummyModel),
    LlamaServer(providers::llama_server::LlamaServerModel),
}

impl LoadedModel {
    pub fn path(&self) -> &Path {
        match self {
            LoadedModel::Dummy(m) => m.path(),
            LoadedModel::LlamaServer(m) => m.path(),
        }
    }

    /// Send `prompt` as the only user message and return the reply.
    pub fn complete(&mut self, prompt: &str) -> Result<String, EngineError> {
        match self {
            LoadedModel::Dummy(m) => m.complete(prompt),
            LoadedModel::LlamaServer(m) => m.complete(prompt),
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Process-wide owner of the loaded model.
///
/// `load`, `unload` and `complete` take the same lock, so the model is never
/// swapped out while a completion is running on it.
#[derive(Debug)]
pub struct InferenceGateway {
    engine: Engine,
    slot: Mutex<Option<LoadedModel>>,
    completions: AtomicU64,
}

impl InferenceGateway {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            slot: Mutex::new(None),
            completions: AtomicU64::new(0),
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Load `path`, releasing any previously loaded model first.
    ///
    /// On failure nothing is loaded afterwards.
    pub fn load(&self, path: &Path, format_hint: &str) -> Result<(), AppError> {
        let mut slot = self.lock_slot();
        self.load_locked(&mut slot, path, format_hint)
    }

    /// Release the loaded model, if any.
    pub fn unload(&self) {
        let mut slot = self.lock_slot();
        if let Some(old) = slot.take() {
            info!(path = %old.path().display(), "unloading model");
        }
    }

    pub fn loaded_path(&self) -> Option<PathBuf> {
        self.lock_slot().as_ref().map(|m| m.path().to_path_buf())
    }

    /// Number of successful completions since start-up.
    pub fn completions_served(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    /// Run one completion on the loaded model.
    pub fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let mut slot = self.lock_slot();
        self.complete_locked(&mut slot, prompt)
    }

    /// Complete `prompt` on whichever model `resolve` names, loading it if the
    /// slot holds a different one.
    ///
    /// `resolve` runs after the lock is taken. A caller that deselects a model
    /// and then calls [`unload`](Self::unload) therefore either sees this call
    /// finish first (and unloads afterwards) or makes `resolve` return `None`,
    /// so a deselected model is never loaded again behind its back.
    pub fn complete_active<F>(&self, resolve: F, format_hint: &str, prompt: &str) -> Result<String, AppError>
    where
        F: FnOnce() -> Result<Option<PathBuf>, AppError>,
    {
        let mut slot = self.lock_slot();
        let path = resolve()?.ok_or(AppError::NoActiveModel)?;
        let loaded = slot.as_ref().is_some_and(|m| m.path() == path);
        if !loaded {
            self.load_locked(&mut slot, &path, format_hint)?;
        }
        self.complete_locked(&mut slot, prompt)
    }

    fn load_locked(
        &self,
        slot: &mut Option<LoadedModel>,
        path: &Path,
        format_hint: &str,
    ) -> Result<(), AppError> {
        if let Some(old) = slot.take() {
            info!(path = %old.path().display(), "releasing previous model");
            drop(old);
        }

        info!(engine = self.engine.name(), path = %path.display(), %format_hint, "loading model");
        let loaded = catch_unwind(AssertUnwindSafe(|| self.engine.load(path, format_hint)))
            .unwrap_or_else(|_| Err(EngineError::Load("engine panicked while loading".into())))
            .map_err(|e| {
                warn!(path = %path.display(), error = %e, "model load failed");
                AppError::ModelLoad(format!("{}: {e}", path.display()))
            })?;

        *slot = Some(loaded);
        Ok(())
    }

    fn complete_locked(&self, slot: &mut Option<LoadedModel>, prompt: &str) -> Result<String, AppError> {
        let model = slot
            .as_mut()
            .ok_or_else(|| AppError::Inference("no model is loaded".into()))?;

        debug!(path = %model.path().display(), prompt_len = prompt.len(), "running completion");
        let text = catch_unwind(AssertUnwindSafe(|| model.complete(prompt)))
            .unwrap_or_else(|_| Err(EngineError::Request("engine panicked during completion".into())))
            .map_err(|e| {
                warn!(error = %e, "completion failed");
                AppError::Inference(e.to_string())
            })?;

        self.completions.fetch_add(1, Ordering::Relaxed);
        Ok(text.trim().to_string())
    }

    /// A poisoned lock only means a previous holder panicked; the slot itself
    /// is still a valid `Option`.
    fn lock_slot(&self) -> MutexGuard<'_, Option<LoadedModel>> {
        self.slot.lock().unwrap_or_else(|poisoned| {
            warn!("inference gateway lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
