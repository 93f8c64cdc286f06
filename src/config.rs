//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the path given with `-f`), then applies `CHATDESK_DATA_DIR` and
//! `CHATDESK_LOG_LEVEL` env overrides.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// `llama-server` engine configuration.
/// Populated from `[llm.llama_server]` in the TOML.
#[derive(Debug, Clone)]
pub struct LlamaServerConfig {
    /// Executable name or path of the `llama-server` binary.
    pub binary: PathBuf,
    pub host: String,
    pub port: u16,
    /// Context window passed as `--ctx-size`.
    pub ctx_size: u32,
    /// How long to wait for `/health` after spawning the process.
    pub startup_timeout_seconds: u64,
    /// Per-completion HTTP timeout.
    pub request_timeout_seconds: u64,
    pub temperature: f32,
}

/// Inference engine configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which engine loads models (`"llama-server"` or `"dummy"`).
    /// Maps to `default` in `[llm]`.
    pub engine: String,
    /// Chat template hint handed to the engine on every load.
    pub chat_format: String,
    pub llama_server: LlamaServerConfig,
}

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    /// Directory holding the database (already expanded, no `~`).
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Optional log file (absolute or relative to `data_dir`); stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Database file name inside `data_dir`.
    pub db_file: String,
    pub llm: LlmConfig,
}

impl Config {
    /// Absolute location of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

/// Raw TOML shape: `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    app: RawApp,
    #[serde(default)]
    llm: RawLlm,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(default = "default_app_name")]
    name: String,
    data_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default = "default_db_file")]
    db_file: String,
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_engine")]
    engine: String,
    #[serde(default = "default_chat_format")]
    chat_format: String,
    #[serde(default)]
    llama_server: RawLlamaServer,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            chat_format: default_chat_format(),
            llama_server: RawLlamaServer::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlamaServer {
    #[serde(default = "default_binary")]
    binary: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_ctx_size")]
    ctx_size: u32,
    #[serde(default = "default_startup_timeout_seconds")]
    startup_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    temperature: f32,
}

impl Default for RawLlamaServer {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            host: default_host(),
            port: default_port(),
            ctx_size: default_ctx_size(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            temperature: default_temperature(),
        }
    }
}

fn default_app_name() -> String { "chatdesk".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_db_file() -> String { "chat.db".to_string() }
fn default_engine() -> String { "llama-server".to_string() }
fn default_chat_format() -> String { "llama-2".to_string() }
fn default_binary() -> String { "llama-server".to_string() }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 11435 }
fn default_ctx_size() -> u32 { 4096 }
fn default_startup_timeout_seconds() -> u64 { 60 }
fn default_request_timeout_seconds() -> u64 { 300 }
fn default_temperature() -> f32 { 0.7 }

/// Load config from `path` (or `config/default.toml`), then apply env-var
/// overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let data_dir_override = env::var("CHATDESK_DATA_DIR").ok();
    let log_level_override = env::var("CHATDESK_LOG_LEVEL").ok();
    load_from(
        Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH)),
        data_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let app = parsed.app;
    let data_dir = expand_home(data_dir_override.unwrap_or(&app.data_dir));
    let log_level = log_level_override.unwrap_or(&app.log_level).trim().to_string();
    logger::parse_level(&log_level).map_err(|_| {
        AppError::Config(format!(
            "invalid log level '{log_level}' (expected one of error, warn, info, debug, trace)"
        ))
    })?;
    let log_file = app.log_file.map(|log_file| {
        let path = expand_home(&log_file);
        if path.is_absolute() {
            path
        } else {
            data_dir.join(path)
        }
    });

    if app.db_file.trim().is_empty() {
        return Err(AppError::Config("app.db_file must not be empty".into()));
    }

    let ls = parsed.llm.llama_server;
    Ok(Config {
        app_name: app.name,
        data_dir,
        log_level,
        log_file,
        db_file: app.db_file,
        llm: LlmConfig {
            engine: parsed.llm.engine,
            chat_format: parsed.llm.chat_format,
            llama_server: LlamaServerConfig {
                binary: expand_home(&ls.binary),
                host: ls.host,
                port: ls.port,
                ctx_size: ls.ctx_size,
                startup_timeout_seconds: ls.startup_timeout_seconds,
                request_timeout_seconds: ls.request_timeout_seconds,
                temperature: ls.temperature,
            },
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests: dummy engine, database under `data_dir`.
    pub fn test_default(data_dir: &Path) -> Self {
        Self {
            app_name: "test".into(),
            data_dir: data_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            db_file: default_db_file(),
            llm: LlmConfig {
                engine: "dummy".into(),
                chat_format: default_chat_format(),
                llama_server: LlamaServerConfig {
                    binary: PathBuf::from(default_binary()),
                    host: default_host(),
                    port: 0,
                    ctx_size: 512,
                    startup_timeout_seconds: 1,
                    request_timeout_seconds: 1,
                    temperature: 0.0,
                },
            },
        }
    }
}
