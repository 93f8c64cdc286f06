//! Dummy engine: echoes the prompt back prefixed with `[echo]`.
//! Used for tests and for trying the front-end without a model file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::EngineError;

#[derive(Debug, Clone, Default)]
pub struct DummyEngine {
    latency: Duration,
    fail_load: Option<String>,
    fail_complete: Option<String>,
}

impl DummyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every completion sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency, ..Self::default() }
    }

    /// Every `load` fails with `message`.
    pub fn failing_load(message: impl Into<String>) -> Self {
        Self { fail_load: Some(message.into()), ..Self::default() }
    }

    /// Loads succeed, every completion fails with `message`.
    pub fn failing_complete(message: impl Into<String>) -> Self {
        Self { fail_complete: Some(message.into()), ..Self::default() }
    }

    pub fn load(&self, path: &Path, _format_hint: &str) -> Result<DummyModel, EngineError> {
        if let Some(msg) = &self.fail_load {
            return Err(EngineError::Load(msg.clone()));
        }
        Ok(DummyModel {
            path: path.to_path_buf(),
            latency: self.latency,
            fail_complete: self.fail_complete.clone(),
        })
    }
}

#[derive(Debug)]
pub struct DummyModel {
    path: PathBuf,
    latency: Duration,
    fail_complete: Option<String>,
}

impl DummyModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn complete(&mut self, prompt: &str) -> Result<String, EngineError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match &self.fail_complete {
            Some(msg) => Err(EngineError::Request(msg.clone())),
            None => Ok(format!("[echo] {prompt}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_prefixes_echo() {
        let mut m = DummyEngine::new().load(Path::new("/m/a.gguf"), "llama-2").unwrap();
        assert_eq!(m.complete("hello").unwrap(), "[echo] hello");
        assert_eq!(m.path(), Path::new("/m/a.gguf"));
    }

    #[test]
    fn complete_empty_input() {
        let mut m = DummyEngine::new().load(Path::new("/m/a.gguf"), "llama-2").unwrap();
        assert_eq!(m.complete("").unwrap(), "[echo] ");
    }

    #[test]
    fn failing_modes() {
        assert!(DummyEngine::failing_load("bad").load(Path::new("/m/a.gguf"), "x").is_err());
        let mut m = DummyEngine::failing_complete("nope")
            .load(Path::new("/m/a.gguf"), "x")
            .unwrap();
        assert!(matches!(m.complete("hi"), Err(EngineError::Request(ref s)) if s == "nope"));
    }
}
