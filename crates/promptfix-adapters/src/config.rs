//! Configuration management for promptfix
//!
//! Stores settings in ~/.config/promptfix/config.json. Secrets (the upstream
//! API key and the verification secret) are read from the environment only.

use promptfix_core::protocol::SamplingParams;
use promptfix_core::strategy::StrategyMode;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_VERIFY_ENDPOINT: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const API_KEY_VARS: [&str; 3] = ["PROMPTFIX_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"];
const VERIFICATION_SECRET_VAR: &str = "TURNSTILE_SECRET_KEY";
const ENVIRONMENT_VAR: &str = "PROMPTFIX_ENV";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    /// Production mode: every call needs a verification token.
    pub require_verification: bool,
    pub verify_endpoint: String,
    /// `auto`, `co-star`, `risen`, or `race`.
    #[serde(deserialize_with = "lenient_strategy")]
    pub default_strategy: StrategyMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            require_verification: true,
            verify_endpoint: DEFAULT_VERIFY_ENDPOINT.to_string(),
            default_strategy: StrategyMode::Auto,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        if url::Url::parse(&self.endpoint).is_err() {
            tracing::warn!(endpoint = %self.endpoint, "invalid endpoint in config, using default");
            self.endpoint = DEFAULT_ENDPOINT.to_string();
        }
        if url::Url::parse(&self.verify_endpoint).is_err() {
            tracing::warn!(endpoint = %self.verify_endpoint, "invalid verify_endpoint in config, using default");
            self.verify_endpoint = DEFAULT_VERIFY_ENDPOINT.to_string();
        }
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        let probe = SamplingParams {
            temperature: self.temperature,
            max_tokens: None,
        };
        if let Err(err) = probe.validate() {
            tracing::warn!("{}; ignoring configured temperature", err.message);
            self.temperature = None;
        }
        let probe = SamplingParams {
            temperature: None,
            max_tokens: self.max_tokens,
        };
        if let Err(err) = probe.validate() {
            tracing::warn!("{}; ignoring configured max_tokens", err.message);
            self.max_tokens = None;
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("promptfix"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Load from an explicit path. Corrupt files are moved aside and defaults
    /// are returned.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        "Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                        err
                    );
                }
            }
        }
        Self::default()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(env) = std::env::var(ENVIRONMENT_VAR) {
            if is_development(&env) {
                self.require_verification = false;
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&dir.join("config.json"))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::debug!("Failed to set config directory permissions: {}", e);
                }
            }
        }

        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Sampling parameters forwarded with every request.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Upstream API key from the environment.
    pub fn get_api_key(&self) -> Option<String> {
        first_non_empty(&API_KEY_VARS, |name| std::env::var(name).ok())
    }

    /// Server-side verification secret from the environment.
    pub fn verification_secret(&self) -> Option<String> {
        first_non_empty(&[VERIFICATION_SECRET_VAR], |name| std::env::var(name).ok())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/promptfix/config.json".to_string())
    }
}

/// An unknown strategy name falls back to auto instead of failing the file.
fn lenient_strategy<'de, D>(deserializer: D) -> Result<StrategyMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|err| {
        tracing::warn!("{}; using auto strategy", err);
        StrategyMode::Auto
    }))
}

fn is_development(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "development" | "dev" | "local"
    )
}

fn first_non_empty<F>(names: &[&str], lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::debug!("Failed to set temp config file permissions: {}", e);
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
