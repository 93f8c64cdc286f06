//! Application controller: turns user actions into store and gateway calls.
//!
//! ```text
//! send(text) ──► validate ──► persist "You" ──► spawn_blocking ──► gateway.complete_active
//!                                                                       │
//!                    ChatEvents::on_response_ready ◄── persist "AI" ◄──┘
//!                    ChatEvents::on_error          ◄── (on failure, nothing persisted)
//! ```
//!
//! Only one question may be in flight: a second `send` while the first is
//! awaiting its answer is rejected with [`AppError::Busy`]. The controller
//! knows nothing about the front-end; it reports results through the
//! [`ChatEvents`] hooks.

pub mod events;

pub use events::{ChatEvents, NoopEvents};

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::llm::{InferenceGateway, providers};
use crate::store::{ConversationStore, Database, MessageRecord, ModelRecord, ModelRegistry, SessionSummary};

/// Sender label for the user's turns.
pub const USER_SENDER: &str = "You";
/// Sender label for the model's turns.
pub const MODEL_SENDER: &str = "AI";

/// Everything the controller works with, built once at startup and passed
/// in explicitly.
#[derive(Debug)]
pub struct AppContext {
    pub models: ModelRegistry,
    pub conversations: ConversationStore,
    pub gateway: InferenceGateway,
    /// Chat template hint handed to the engine on every load.
    pub chat_format: String,
}

impl AppContext {
    pub fn new(db: &Database, gateway: InferenceGateway, chat_format: impl Into<String>) -> Self {
        Self {
            models: db.models(),
            conversations: db.conversations(),
            gateway,
            chat_format: chat_format.into(),
        }
    }

    /// Open the database and build the configured engine.
    pub fn open(config: &Config) -> Result<Self, AppError> {
        let db = Database::open(&config.db_path())?;
        let engine = providers::build(&config.llm).map_err(|e| AppError::Config(e.to_string()))?;
        info!(engine = engine.name(), db = %db.path().display(), "application context ready");
        Ok(Self::new(&db, InferenceGateway::new(engine), config.llm.chat_format.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    AwaitingResponse,
}

/// An accepted question whose answer is being computed on a worker thread.
///
/// Dropping it does not cancel the work; the answer is still persisted and
/// reported through [`ChatEvents`].
pub struct PendingReply {
    pub session_id: i64,
    handle: JoinHandle<Result<String, AppError>>,
}

impl PendingReply {
    /// Wait for the answer (or the error already reported via `on_error`).
    pub async fn wait(self) -> Result<String, AppError> {
        self.handle
            .await
            .map_err(|e| AppError::Inference(format!("inference worker failed: {e}")))?
    }
}

/// Clears the busy flag when the worker finishes, including on unwind.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatController {
    ctx: Arc<AppContext>,
    events: Arc<dyn ChatEvents>,
    busy: Arc<AtomicBool>,
}

impl ChatController {
    pub fn new(ctx: Arc<AppContext>, events: Arc<dyn ChatEvents>) -> Self {
        Self {
            ctx,
            events,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn state(&self) -> ChatState {
        if self.busy.load(Ordering::Acquire) {
            ChatState::AwaitingResponse
        } else {
            ChatState::Idle
        }
    }

    // ── Chat ──────────────────────────────────────────────────────────────────

    /// Persist `text` as the user's turn and start computing the answer on a
    /// blocking worker. Must be called from within a tokio runtime.
    ///
    /// Blank input, no active model, and an answer already in flight are
    /// rejected before anything is written.
    pub fn send(&self, text: &str) -> Result<PendingReply, AppError> {
        if text.trim().is_empty() {
            debug!("send rejected: blank input");
            return Err(AppError::BlankInput);
        }

        let model = match self.ctx.models.active()? {
            Some(model) => model,
            None => {
                debug!("send rejected: no active model");
                return Err(AppError::NoActiveModel);
            }
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("send rejected: answer already in flight");
            return Err(AppError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());

        // The guard releases the busy flag if either write fails.
        let session_id = self.ctx.conversations.get_or_create_session_for_today()?;
        self.ctx
            .conversations
            .save_message(session_id, USER_SENDER, text, Local::now().naive_local())?;

        info!(session_id, model = %model.name, "question dispatched");
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let prompt = text.to_string();

        let handle = tokio::task::spawn_blocking(move || {
            let result = answer(&ctx, session_id, &prompt);
            drop(guard);

            match &result {
                Ok(reply) => {
                    info!(session_id, reply_len = reply.len(), "answer ready");
                    events.on_response_ready(session_id, reply);
                }
                Err(e) => {
                    warn!(session_id, error = %e, "answer failed");
                    events.on_error(e);
                }
            }
            result
        });

        Ok(PendingReply { session_id, handle })
    }

    // ── Models ────────────────────────────────────────────────────────────────

    pub fn models(&self) -> Result<Vec<ModelRecord>, AppError> {
        self.ctx.models.list()
    }

    pub fn active_model(&self) -> Result<Option<ModelRecord>, AppError> {
        self.ctx.models.active()
    }

    /// Register a model file under its basename.
    pub fn add_model(&self, path: impl AsRef<Path>) -> Result<ModelRecord, AppError> {
        self.ctx.models.register_file(path)
    }

    /// Make `name` the active model and load it right away, so a bad file is
    /// reported at selection time rather than on the first question.
    ///
    /// When `name` is unknown no model is active afterwards and
    /// [`AppError::NoActiveModel`] is returned. When loading fails the model
    /// stays active and the next `send` retries the load.
    pub async fn activate_model(&self, name: &str) -> Result<ModelRecord, AppError> {
        if !self.ctx.models.activate(name)? {
            self.unload().await;
            return Err(AppError::NoActiveModel);
        }
        let model = self.ctx.models.active()?.ok_or(AppError::NoActiveModel)?;

        let ctx = self.ctx.clone();
        let path = model.path.clone();
        tokio::task::spawn_blocking(move || ctx.gateway.load(&path, &ctx.chat_format))
            .await
            .map_err(|e| AppError::ModelLoad(format!("load worker failed: {e}")))??;

        Ok(model)
    }

    /// Remove `name`; unloads it when it was the active model. Returns
    /// `false` when no such model was registered.
    pub async fn remove_model(&self, name: &str) -> Result<bool, AppError> {
        let was_active = self.ctx.models.active_name()?.as_deref() == Some(name);
        let removed = self.ctx.models.remove(name)?;
        if removed && was_active {
            self.unload().await;
        }
        Ok(removed)
    }

    async fn unload(&self) {
        let ctx = self.ctx.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || ctx.gateway.unload()).await {
            warn!(error = %e, "unload worker failed");
        }
    }

    // ── History ───────────────────────────────────────────────────────────────

    pub fn history(&self) -> Result<Vec<SessionSummary>, AppError> {
        self.ctx.conversations.fetch_session_summaries()
    }

    pub fn transcript(&self, session_id: i64) -> Result<Vec<MessageRecord>, AppError> {
        self.ctx.conversations.fetch_messages(session_id)
    }
}

/// Worker body: load if needed, complete, persist the answer.
///
/// The active model is looked up again once the gateway is free, so a model
/// removed or switched away from while this question waited is not reloaded.
fn answer(ctx: &AppContext, session_id: i64, prompt: &str) -> Result<String, AppError> {
    let reply = ctx
        .gateway
        .complete_active(|| ctx.models.active_path(), &ctx.chat_format, prompt)?;
    ctx.conversations
        .save_message(session_id, MODEL_SENDER, &reply, Local::now().naive_local())?;
    Ok(reply)
}
