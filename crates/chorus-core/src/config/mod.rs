mod channels;
mod defaults;
mod prompts;
mod providers;


pub use channels::*;
pub use prompts::*;
pub use providers::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ChorusError;
use defaults::*;

/// Top-level Chorus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chorus: ChorusConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily rolling log files. Empty = stdout only.
    #[serde(default)]
    pub log_dir: String,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

/// Memory config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Messages of channel history carried by each generation task.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            history_limit: default_history_limit(),
        }
    }
}

/// Async queue tuning, shared by every topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Concurrent handler executions per topic.
    #[serde(default = "default_queue_workers")]
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            workers: default_queue_workers(),
        }
    }
}

/// Scheduler configuration -- periodic conversation starters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// A channel whose bots have been quiet this long gets nudged.
    #[serde(default = "default_initiate_after")]
    pub initiate_after_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            initiate_after_minutes: default_initiate_after(),
        }
    }
}

/// HTTP API configuration -- admin routes and the live-client WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for admin routes. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Fill empty secrets from the environment.
fn apply_env(config: &mut Config) {
    fn fill(slot: &mut String, var: &str) {
        if slot.is_empty() {
            if let Ok(value) = std::env::var(var) {
                *slot = value;
            }
        }
    }

    fill(&mut config.provider.openai.api_key, "OPENAI_API_KEY");
    fill(&mut config.provider.gemini.api_key, "GEMINI_API_KEY");
    fill(&mut config.api.api_key, "CHORUS_API_KEY");
}

/// Reject settings the runtime cannot honor.
pub fn validate(config: &Config) -> Result<(), ChorusError> {
    let hub = &config.hub;
    if hub.ping_interval_secs >= hub.pong_wait_secs {
        return Err(ChorusError::Config(format!(
            "hub.ping_interval_secs ({}) must be below hub.pong_wait_secs ({})",
            hub.ping_interval_secs, hub.pong_wait_secs
        )));
    }
    if hub.outbound_buffer == 0 {
        return Err(ChorusError::Config(
            "hub.outbound_buffer must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, ChorusError> {
    let path = Path::new(path);
    let mut config = if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    } else {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChorusError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ChorusError::Config(format!("failed to parse config: {}", e)))?
    };

    apply_env(&mut config);
    validate(&config)?;
    Ok(config)
}
