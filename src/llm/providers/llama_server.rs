//! `llama-server` engine: runs llama.cpp's HTTP server as a child process,
//! one process per loaded model.
//!
//! Loading spawns `llama-server --model <path> --chat-template <hint>` and
//! polls `/health` until the model is ready. Completions go to the server's
//! OpenAI-compatible `/v1/chat/completions` endpoint as a single user
//! message. All wire types are private to this module.
//!
//! Uses the blocking `reqwest` client: every call here runs on a blocking
//! worker thread, never on the async runtime.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::LlamaServerConfig;
use crate::llm::EngineError;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct LlamaServerEngine {
    config: LlamaServerConfig,
}

impl LlamaServerEngine {
    pub fn new(config: LlamaServerConfig) -> Self {
        Self { config }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.port)
    }

    /// Spawn a server for `path` and wait until it reports healthy.
    pub fn load(&self, path: &Path, format_hint: &str) -> Result<LlamaServerModel, EngineError> {
        if !path.is_file() {
            return Err(EngineError::Load(format!("model file not found: {}", path.display())));
        }

        let template = chat_template_arg(format_hint);
        info!(
            binary = %self.config.binary.display(),
            model = %path.display(),
            %template,
            port = self.config.port,
            "starting llama-server"
        );

        let child = Command::new(&self.config.binary)
            .arg("--model")
            .arg(path)
            .arg("--chat-template")
            .arg(&template)
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--ctx-size")
            .arg(self.config.ctx_size.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EngineError::Load(format!(
                    "cannot start {}: {e}",
                    self.config.binary.display()
                ))
            })?;
        debug!(pid = child.id(), "llama-server spawned");

        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_seconds))
            .build()
            .map_err(|e| EngineError::Load(format!("failed to build HTTP client: {e}")))?;

        // From here on the model owns the child, so any early return stops it.
        let mut model = LlamaServerModel {
            path: path.to_path_buf(),
            base_url: self.base_url(),
            temperature: self.config.temperature,
            client,
            child,
        };
        model.wait_ready(Duration::from_secs(self.config.startup_timeout_seconds))?;
        Ok(model)
    }
}

/// Map llama-cpp-python style format names onto llama.cpp's built-in
/// template names. Unknown names are passed through unchanged.
pub fn chat_template_arg(format_hint: &str) -> String {
    match format_hint {
        "llama-2" => "llama2".to_string(),
        "llama-3" => "llama3".to_string(),
        "mistral-instruct" => "mistral-v1".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
pub struct LlamaServerModel {
    path: PathBuf,
    base_url: String,
    temperature: f32,
    client: Client,
    child: Child,
}

impl LlamaServerModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let health_url = format!("{}/health", self.base_url);
        let probe = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| EngineError::Load(format!("failed to build probe client: {e}")))?;
        let start = Instant::now();

        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(EngineError::Load(format!(
                    "llama-server exited during start-up ({status}); is the file a valid model for this build?"
                )));
            }
            match probe.get(&health_url).send() {
                Ok(resp) if resp.status().is_success() => {
                    info!(elapsed_ms = start.elapsed().as_millis() as u64, "llama-server ready");
                    return Ok(());
                }
                Ok(resp) => debug!(status = %resp.status(), "llama-server still loading"),
                Err(e) => debug!(error = %e, "llama-server not reachable yet"),
            }
            std::thread::sleep(HEALTH_POLL_INTERVAL);
        }

        Err(EngineError::Load(format!(
            "llama-server not ready after {}s",
            timeout.as_secs()
        )))
    }

    pub fn complete(&mut self, prompt: &str) -> Result<String, EngineError> {
        let payload = ChatCompletionRequest {
            messages: vec![WireMessage { role: "user", content: prompt }],
            temperature: self.temperature,
            stream: false,
        };

        debug!(url = %self.base_url, content_len = prompt.len(), "sending completion request");
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .map_err(|e| {
                error!(url = %self.base_url, error = %e, "llama-server request failed (transport)");
                EngineError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(env) => format!("HTTP {status}: {}", env.error.message),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            error!(%status, %message, "llama-server returned HTTP error");
            return Err(EngineError::Request(message));
        }

        let parsed = response.json::<ChatCompletionResponse>().map_err(|e| {
            error!(error = %e, "failed to deserialize llama-server response");
            EngineError::Request(format!("failed to parse response body: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EngineError::Request("missing content in response".into()))
    }
}

impl Drop for LlamaServerModel {
    fn drop(&mut self) {
        info!(pid = self.child.id(), model = %self.path.display(), "stopping llama-server");
        if let Err(e) = self.child.kill() {
            warn!(error = %e, "failed to kill llama-server");
        }
        let _ = self.child.wait();
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn engine() -> LlamaServerEngine {
        LlamaServerEngine::new(Config::test_default(Path::new("/tmp")).llm.llama_server)
    }

    #[test]
    fn template_names_are_mapped() {
        assert_eq!(chat_template_arg("llama-2"), "llama2");
        assert_eq!(chat_template_arg("chatml"), "chatml");
    }

    #[test]
    fn missing_model_file_fails_before_spawning() {
        let err = engine()
            .load(Path::new("/definitely/not/here.gguf"), "llama-2")
            .unwrap_err();
        assert!(err.to_string().contains("model file not found"));
    }

    #[test]
    fn missing_binary_is_load_error() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let mut cfg = Config::test_default(Path::new("/tmp")).llm.llama_server;
        cfg.binary = PathBuf::from("/nonexistent/llama-server");
        let err = LlamaServerEngine::new(cfg).load(model.path(), "llama-2").unwrap_err();
        assert!(matches!(err, EngineError::Load(ref m) if m.contains("cannot start")));
    }

    #[test]
    fn request_serializes_single_user_message() {
        let payload = ChatCompletionRequest {
            messages: vec![WireMessage { role: "user", content: "hi" }],
            temperature: 0.5,
            stream: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn response_content_parses() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hello!"));
    }
}
