//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("a model named '{0}' is already registered")]
    DuplicateName(String),

    #[error("chat session {0} does not exist")]
    ForeignKey(i64),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("please enter a question")]
    BlankInput,

    #[error("no active model found, please select a model")]
    NoActiveModel,

    #[error("still waiting for the previous answer")]
    Busy,
}

impl AppError {
    /// `true` for errors that are acknowledgements to the user rather than
    /// failures: they are shown as a notice and never logged as errors.
    pub fn is_user_notice(&self) -> bool {
        matches!(self, AppError::BlankInput | AppError::NoActiveModel | AppError::Busy)
    }
}
