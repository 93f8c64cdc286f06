//! Front-end hooks. A GUI, the console, or a test subscribes by
//! implementing [`ChatEvents`]; both hooks run on the inference worker
//! thread, so implementations must hand off to their own UI thread if they
//! need one.

use crate::error::AppError;

pub trait ChatEvents: Send + Sync + 'static {
    /// The answer for a question in `session_id` was generated and saved.
    fn on_response_ready(&self, session_id: i64, text: &str);

    /// Generating or saving the answer failed. Nothing was saved for it.
    fn on_error(&self, err: &AppError);
}

/// Ignores every event; for callers that only await [`super::PendingReply`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl ChatEvents for NoopEvents {
    fn on_response_ready(&self, _session_id: i64, _text: &str) {}
    fn on_error(&self, _err: &AppError) {}
}
