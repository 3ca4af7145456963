use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default transcription endpoint (Lemonfox, OpenAI-compatible)
pub const DEFAULT_ENDPOINT: &str = "https://api.lemonfox.ai/v1/audio/transcriptions";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transcription service settings
    pub transcription: TranscriptionConfig,

    /// Application settings
    pub app: AppConfig,

    /// Backoff settings shared by download and transcription calls
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Bearer token for the service
    pub api_key: String,

    /// Full URL of the transcription endpoint
    pub endpoint: String,

    /// Language hint sent with every request
    pub language: String,

    /// Response format requested from the service
    pub response_format: String,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Resolve the service host before each request
    pub dns_probe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for downloaded audio
    pub temp_dir: PathBuf,

    /// Directory for transcripts
    pub output_dir: PathBuf,

    /// Extension of table files considered during auto-discovery
    pub table_extension: String,

    /// Keep audio files after transcription
    pub keep_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: "en".to_string(),
            response_format: "json".to_string(),
            connect_timeout_secs: 30,
            request_timeout_secs: 300,
            dns_probe: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp_audio"),
            output_dir: PathBuf::from("input_data"),
            table_extension: "csv".to_string(),
            keep_audio: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_secs: policy.base_delay.as_secs(),
            max_delay_secs: policy.max_delay.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

impl Config {
    /// Load configuration from `explicit`, or the default locations.
    ///
    /// A missing default file is not an error; built-in defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::config_path().filter(|path| path.exists()),
        };

        match config_path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get configuration file path
    fn config_path() -> Option<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir().map(|dir| dir.join("tubescribe").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transcription.api_key.trim().is_empty() {
            anyhow::bail!(
                "Transcription API key must be configured (config file, --api-key or LEMONFOX_API_KEY)"
            );
        }

        url::Url::parse(&self.transcription.endpoint)
            .with_context(|| format!("Invalid transcription endpoint: {}", self.transcription.endpoint))?;

        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            anyhow::bail!("retry.max_delay_secs must not be smaller than retry.base_delay_secs");
        }

        if self.app.table_extension.trim().is_empty() {
            anyhow::bail!("app.table_extension must not be empty");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Endpoint: {}", self.transcription.endpoint);
        println!("  API Key: {}", mask_secret(&self.transcription.api_key));
        println!("  Language: {}", self.transcription.language);
        println!(
            "  Timeouts: connect {}s, request {}s",
            self.transcription.connect_timeout_secs, self.transcription.request_timeout_secs
        );
        println!("  Temp Dir: {}", self.app.temp_dir.display());
        println!("  Output Dir: {}", self.app.output_dir.display());
        println!("  Table Extension: {}", self.app.table_extension);
        println!("  Keep Audio: {}", self.app.keep_audio);
        println!(
            "  Retry: {} retries, {}s base delay, {}s max delay",
            self.retry.max_retries, self.retry.base_delay_secs, self.retry.max_delay_secs
        );
    }
}

/// Show only the last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return "(not set)".to_string();
    }
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}
