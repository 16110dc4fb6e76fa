//! Configuration for clinflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLINFLOW_HOME, CLINFLOW_AUDIT_LOG, HF_API_TOKEN, ...)
//! 2. Config file (.clinflow/config.yaml)
//! 3. Defaults (~/.clinflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .clinflow/config.yaml
//! - Paths in config file are relative to the .clinflow/ directory
//!
//! Nothing is cached process-wide; callers load once and pass the result on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::huggingface::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::adapters::GenerationParams;
use crate::core::DEFAULT_MAX_REQUEST_CHARS;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .clinflow/)
    pub home: Option<String>,
    /// Audit log file (relative to .clinflow/)
    pub audit_log: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub token: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    pub dry_run: Option<bool>,
    pub max_request_chars: Option<usize>,
}

/// Completion backend settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSettings {
    /// Backend is disabled without a token
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            token: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_seconds: 30,
            max_new_tokens: params.max_new_tokens,
            temperature: params.temperature,
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// JSONL audit log
    pub audit_log: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub backend: BackendSettings,
    /// Default dry-run setting for requests
    pub dry_run: bool,
    pub max_request_chars: usize,
}

impl ResolvedConfig {
    /// Token with all but the last four characters masked
    pub fn redacted_token(&self) -> Option<String> {
        self.backend.token.as_ref().map(|token| {
            let visible: String = token
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{}", visible)
        })
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".clinflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Merge sources. `env` looks up an environment variable by name.
fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let home = env("CLINFLOW_HOME")
        .map(PathBuf::from)
        .or_else(|| file.paths.home.as_deref().map(|h| resolve_path(&config_dir, h)))
        .unwrap_or(default_home);

    let audit_log = env("CLINFLOW_AUDIT_LOG")
        .map(PathBuf::from)
        .or_else(|| {
            file.paths
                .audit_log
                .as_deref()
                .map(|p| resolve_path(&config_dir, p))
        })
        .unwrap_or_else(|| home.join("logs").join("audit.jsonl"));

    let defaults = BackendSettings::default();
    let backend = BackendSettings {
        token: env("HF_API_TOKEN")
            .or(file.backend.token)
            .filter(|t| !t.trim().is_empty()),
        model: env("HF_MODEL")
            .or(file.backend.model)
            .unwrap_or(defaults.model),
        endpoint: env("HF_ENDPOINT")
            .or(file.backend.endpoint)
            .unwrap_or(defaults.endpoint),
        timeout_seconds: file
            .backend
            .timeout_seconds
            .unwrap_or(defaults.timeout_seconds),
        max_new_tokens: file
            .backend
            .max_new_tokens
            .unwrap_or(defaults.max_new_tokens),
        temperature: file.backend.temperature.unwrap_or(defaults.temperature),
    };

    let dry_run = env("CLINFLOW_DRY_RUN")
        .and_then(|v| parse_flag(&v))
        .or(file.agent.dry_run)
        .unwrap_or(false);

    ResolvedConfig {
        home,
        audit_log,
        config_file,
        backend,
        dry_run,
        max_request_chars: file
            .agent
            .max_request_chars
            .unwrap_or(DEFAULT_MAX_REQUEST_CHARS),
    }
}

/// Load configuration from all sources, searching upward from the current directory
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd)
}

/// Load configuration, searching for a config file from `start` upward
pub fn load_config_from(start: &Path) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".clinflow");

    let config_file = find_config_file(start);
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(config_file, file, default_home, |key| {
        std::env::var(key).ok()
    }))
}
