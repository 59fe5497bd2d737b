//! Configuration for deckard.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DECKARD_HOME, DECKARD_INFERENCE_API_KEY,
//!    DECKARD_EMAIL_API_KEY, DECKARD_STORAGE_TOKEN)
//! 2. Config file (.deckard/config.yaml)
//! 3. Defaults (~/.deckard)
//!
//! Config file discovery searches the current directory and its parents for
//! .deckard/config.yaml.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub api_base: Option<String>,
    pub domain: Option<String>,
    pub api_key: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Extraction binary (default: deck-extract)
    pub extractor: Option<String>,
    /// Renderer binary (default: deck-report)
    pub renderer: Option<String>,
    /// Per-tool timeout in seconds
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths and defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to deckard home (engine state)
    pub home: PathBuf,

    pub storage_endpoint: String,
    pub storage_bucket: String,
    pub storage_token: Option<String>,

    pub inference_endpoint: String,
    pub inference_model: String,
    pub inference_api_key: String,

    pub email_api_base: String,
    pub email_domain: String,
    pub email_api_key: String,
    pub email_from: String,

    pub extractor_binary: String,
    pub renderer_binary: String,
    pub tool_timeout_seconds: u64,

    pub retry: RetryPolicy,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Job record database ($DECKARD_HOME/jobs.sqlite3)
    pub fn db_path(&self) -> PathBuf {
        self.home.join("jobs.sqlite3")
    }

    /// Scratch directory for transient uploads and staged reports
    pub fn scratch_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".deckard").join("config.yaml");
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

/// Resolve a path that may be relative to the config file's parent
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

fn env_or<F: FnOnce() -> String>(var: &str, fallback: F) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".deckard");

    let config_file = find_config_file();
    let file: ConfigFile = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let home = if let Ok(env_home) = std::env::var("DECKARD_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(config_path), Some(home_str)) = (&config_file, &file.paths.home) {
        let deckard_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(deckard_dir, home_str)
    } else {
        default_home
    };

    let storage = file.storage.unwrap_or(StorageConfig {
        endpoint: None,
        bucket: None,
        token: None,
    });
    let inference = file.inference.unwrap_or(InferenceConfig {
        endpoint: None,
        model: None,
        api_key: None,
    });
    let email = file.email.unwrap_or(EmailConfig {
        api_base: None,
        domain: None,
        api_key: None,
        from: None,
    });
    let tools = file.tools.unwrap_or(ToolsConfig {
        extractor: None,
        renderer: None,
        timeout_seconds: None,
    });

    Ok(ResolvedConfig {
        home,

        storage_endpoint: storage
            .endpoint
            .unwrap_or_else(|| "http://localhost:9000".to_string()),
        storage_bucket: storage.bucket.unwrap_or_else(|| "deckard".to_string()),
        storage_token: std::env::var("DECKARD_STORAGE_TOKEN")
            .ok()
            .or(storage.token),

        inference_endpoint: inference
            .endpoint
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        inference_model: inference
            .model
            .unwrap_or_else(|| "gemini-1.5-flash-latest".to_string()),
        inference_api_key: env_or("DECKARD_INFERENCE_API_KEY", || {
            inference.api_key.unwrap_or_default()
        }),

        email_api_base: email
            .api_base
            .unwrap_or_else(|| "https://api.mailgun.net".to_string()),
        email_domain: email.domain.unwrap_or_default(),
        email_api_key: env_or("DECKARD_EMAIL_API_KEY", || {
            email.api_key.unwrap_or_default()
        }),
        email_from: email.from.unwrap_or_default(),

        extractor_binary: tools.extractor.unwrap_or_else(|| "deck-extract".to_string()),
        renderer_binary: tools.renderer.unwrap_or_else(|| "deck-report".to_string()),
        tool_timeout_seconds: tools.timeout_seconds.unwrap_or(300),

        retry: file.retry.unwrap_or_default(),

        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
