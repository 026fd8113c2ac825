//! Configuration types for the PyGuide tutor service.
//!
//! Configuration is built once at start-up, validated, and then shared
//! read-only with every request handler.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "pyguide.json";

/// Highest sampling temperature accepted by OpenAI-compatible backends.
const MAX_TEMPERATURE: f32 = 2.0;

/// Default base URL of the local Ollama OpenAI-compatible endpoint.
fn default_base_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}

/// Default credential; Ollama ignores it but the API requires one.
fn default_api_key() -> String {
    "ollama".to_string()
}

/// Default model identifier.
fn default_model() -> String {
    "phi3".to_string()
}

/// Default sampling temperature: focused, but not greedy decoding.
const fn default_temperature() -> f32 {
    0.3
}

/// Default backend display name used in user-facing error text.
fn default_backend_name() -> String {
    "Ollama".to_string()
}

/// Default bind host.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default bind port.
const fn default_port() -> u16 {
    5000
}

/// Main configuration for the PyGuide server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Optional path to an HTML page served at `GET /`.
    ///
    /// When unset, the bundled page is served.
    #[serde(default)]
    pub index_page: Option<String>,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `pyguide.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or
    /// invalid values.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `pyguide.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// contains invalid JSON, and `TutorError::ConfigValidationError` if the
    /// values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `backend.baseUrl` must be an `http://` or `https://` URL
    /// - `backend.model` must not be empty
    /// - `backend.temperature` must be within `0.0..=2.0`
    /// - `backend.timeoutSecs`, when set, must be greater than 0
    /// - `server.port` must be greater than 0
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        let base_url = self.backend.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TutorError::config_validation(
                format!("backend.baseUrl '{base_url}' is not an http(s) URL"),
                "Set backend.baseUrl to something like http://127.0.0.1:11434/v1",
            ));
        }

        if self.backend.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "backend.model must not be empty",
                "Set backend.model to a model your backend serves (e.g. phi3)",
            ));
        }

        let temperature = self.backend.temperature;
        if !temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(TutorError::config_validation(
                format!("backend.temperature {temperature} is out of range"),
                "Use a temperature between 0.0 and 2.0",
            ));
        }

        if self.backend.timeout_secs == Some(0) {
            return Err(TutorError::config_validation(
                "backend.timeoutSecs must be greater than 0",
                "Remove backend.timeoutSecs to wait indefinitely, or set it to at least 1",
            ));
        }

        if self.server.port == 0 {
            return Err(TutorError::config_validation(
                "server.port must be greater than 0",
                "Set server.port in your pyguide.json or pass --port",
            ));
        }

        Ok(())
    }
}

/// Settings for the OpenAI-compatible model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the chat-completions API, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Credential sent as a bearer token.
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Display name used in error text shown to students.
    #[serde(default = "default_backend_name")]
    pub name: String,

    /// Maximum seconds to wait for each streamed chunk; unbounded when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    /// Returns the per-chunk idle timeout, if one is configured.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Returns the full chat-completions endpoint URL.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.base_url.trim().trim_end_matches('/')
        )
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            model: default_model(),
            temperature: default_temperature(),
            name: default_backend_name(),
            timeout_secs: None,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
