//! Inference engine implementations.
//!
//! `build(config)` is called once at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod llama_server;

use crate::config::LlmConfig;
use crate::llm::{Engine, EngineError};

/// Construct the configured [`Engine`].
pub fn build(config: &LlmConfig) -> Result<Engine, EngineError> {
    match config.engine.as_str() {
        "dummy" => Ok(Engine::Dummy(dummy::DummyEngine::new())),
        "llama-server" | "llama.cpp" => Ok(Engine::LlamaServer(
            llama_server::LlamaServerEngine::new(config.llama_server.clone()),
        )),
        other => Err(EngineError::UnknownEngine(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::Path;

    #[test]
    fn builds_dummy() {
        let cfg = Config::test_default(Path::new("/tmp"));
        assert_eq!(build(&cfg.llm).unwrap().name(), "dummy");
    }

    #[test]
    fn builds_llama_server() {
        let mut cfg = Config::test_default(Path::new("/tmp"));
        cfg.llm.engine = "llama-server".into();
        assert_eq!(build(&cfg.llm).unwrap().name(), "llama-server");
    }

    #[test]
    fn unknown_engine_errors() {
        let mut cfg = Config::test_default(Path::new("/tmp"));
        cfg.llm.engine = "gpt-cloud".into();
        assert!(matches!(build(&cfg.llm), Err(EngineError::UnknownEngine(ref n)) if n == "gpt-cloud"));
    }
}
