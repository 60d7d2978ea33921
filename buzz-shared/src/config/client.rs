use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

/// Largest image accepted for sending, in bytes.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

const DEFAULT_API_URL: &str = "http://localhost:8000/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,
    #[error("Invalid {name} value: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration of the Buzz client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the HTTP API.
    pub api_base_url: Url,

    /// Base URL of the push channel; derived from `api_base_url` when absent.
    #[serde(default)]
    pub ws_base_url: Option<Url>,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Images above this size are rejected before any network call.
    pub max_image_bytes: usize,

    pub request_timeout_secs: u64,

    /// Capacity of the outbound frame queue and of store notifications.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ClientConfig {
    /// Generates a default configuration.
    ///
    /// # Panics
    /// Never in practice: the default API URL is a valid constant.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            ws_base_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            request_timeout_secs: 30,
            channel_capacity: 256,
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only fill values the file left at their defaults;
    /// `api_override` (the CLI flag) wins over both.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment variable is malformed, or validation fails.
    pub fn load_config(
        config_path: Option<PathBuf>,
        api_override: Option<Url>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::with_defaults();
        let mut config = defaults.clone();

        if let Some(path) = config_path {
            let content = fs::read_to_string(&path)?;
            config = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => serde_yml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                _ => return Err(ConfigError::UnsupportedFormat),
            };
        }

        if config.api_base_url == defaults.api_base_url {
            if let Some(value) = read_env("BUZZ_API_URL") {
                config.api_base_url = parse_url("BUZZ_API_URL", &value)?;
            }
        }
        if config.ws_base_url.is_none() {
            if let Some(value) = read_env("BUZZ_WS_URL") {
                config.ws_base_url = Some(parse_url("BUZZ_WS_URL", &value)?);
            }
        }
        if config.log_level == defaults.log_level {
            if let Some(value) = read_env("BUZZ_LOG_LEVEL") {
                config.log_level = value;
            }
        }
        if config.log_format == defaults.log_format {
            if let Some(value) = read_env("BUZZ_LOG_FORMAT") {
                config.log_format = match value.to_ascii_lowercase().as_str() {
                    "text" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    other => {
                        return Err(ConfigError::InvalidEnv {
                            name: "BUZZ_LOG_FORMAT",
                            reason: format!("expected 'text' or 'json', got '{other}'"),
                        });
                    }
                };
            }
        }
        if config.max_image_bytes == defaults.max_image_bytes {
            if let Some(value) = read_env("BUZZ_MAX_IMAGE_BYTES") {
                config.max_image_bytes =
                    value.parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "BUZZ_MAX_IMAGE_BYTES",
                        reason: "must be a non-negative integer".to_string(),
                    })?;
            }
        }

        if let Some(url) = api_override {
            config.api_base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the client relies on.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must use http or https, got '{}'",
                self.api_base_url.scheme()
            )));
        }
        if let Some(ws) = &self.ws_base_url {
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(ConfigError::Invalid(format!(
                    "ws_base_url must use ws or wss, got '{}'",
                    ws.scheme()
                )));
            }
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_image_bytes must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Push channel base URL, swapping `http(s)` for `ws(s)` when not configured.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when the API URL scheme cannot be mapped.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        if let Some(url) = &self.ws_base_url {
            return Ok(url.clone());
        }

        let mut url = self.api_base_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ConfigError::Invalid(format!(
                    "cannot derive a push channel URL from scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::Invalid("failed to derive push channel URL".to_string()))?;
        Ok(url)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidEnv {
        name,
        reason: err.to_string(),
    })
}
