// Configuration system for crowdsight

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// HTTP / WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_viewers: usize,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            max_viewers: 1000,
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

/// External detection service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9001/infer".to_string(),
            api_key: None,
            confidence_threshold: None,
            timeout_secs: 30,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Live-path admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub concurrency_limit: usize,
    pub capacity_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            capacity_limit: 60,
        }
    }
}

/// Crowd alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Initial threshold; viewers may change it at runtime
    pub threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_secs: 300,
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Batch video pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub frame_rate_hz: f64,
    /// Pause after each successful inference call
    pub frame_delay_ms: u64,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ffmpeg_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 2.0,
            frame_delay_ms: 1000,
            work_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./outputs"),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl VideoConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }
}

/// Complete crowdsight configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdsightConfig {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub dispatch: DispatchConfig,
    pub alert: AlertConfig,
    pub video: VideoConfig,
}

impl CrowdsightConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `CROWDSIGHT_*` environment overrides on top of `self`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CROWDSIGHT_HOST") {
            self.server.bind_address = v;
        }
        if let Some(v) = lookup("CROWDSIGHT_PORT") {
            self.server.port = parse_var("CROWDSIGHT_PORT", &v)?;
        }
        if let Some(v) = lookup("CROWDSIGHT_INFERENCE_URL") {
            self.inference.endpoint = v;
        }
        if let Some(v) = lookup("CROWDSIGHT_API_KEY") {
            self.inference.api_key = Some(v);
        }
        if let Some(v) = lookup("CROWDSIGHT_CONFIDENCE") {
            self.inference.confidence_threshold = Some(parse_var("CROWDSIGHT_CONFIDENCE", &v)?);
        }
        if let Some(v) = lookup("CROWDSIGHT_CONCURRENCY") {
            self.dispatch.concurrency_limit = parse_var("CROWDSIGHT_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("CROWDSIGHT_QUEUE_CAPACITY") {
            self.dispatch.capacity_limit = parse_var("CROWDSIGHT_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("CROWDSIGHT_ALERT_THRESHOLD") {
            self.alert.threshold = parse_var("CROWDSIGHT_ALERT_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("CROWDSIGHT_FFMPEG") {
            self.video.ffmpeg_path = v;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port cannot be 0".to_string()));
        }

        if self.inference.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "inference.endpoint cannot be empty".to_string(),
            ));
        }

        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "inference.timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(conf) = self.inference.confidence_threshold {
            if !(0.0..=1.0).contains(&conf) {
                return Err(ConfigError::ValidationError(
                    "inference.confidence_threshold must be within [0, 1]".to_string(),
                ));
            }
        }

        if self.dispatch.concurrency_limit == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.concurrency_limit must be > 0".to_string(),
            ));
        }

        if self.dispatch.capacity_limit == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.capacity_limit must be > 0".to_string(),
            ));
        }

        if !self.video.frame_rate_hz.is_finite() || self.video.frame_rate_hz <= 0.0 {
            return Err(ConfigError::ValidationError(
                "video.frame_rate_hz must be a positive number".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("invalid value for {}: '{}'", key, value)))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}
