//! Bridge configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::TrimPolicy;
use crate::error::ConfigError;
use crate::gate::DEFAULT_COMMAND_PREFIX;
use crate::inference::DEFAULT_IDLE_TIMEOUT;

pub const DEFAULT_HOMESERVER: &str = "matrix.org";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";

/// What happens to prompts that arrive while a room is generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogPolicy {
    /// Keep only the most recent pending prompt
    LatestWins,
    /// Discard everything that arrives while busy
    DropWhileBusy,
    /// Keep up to `n` pending prompts in order, dropping the oldest when full
    Fifo(usize),
}

impl Default for BacklogPolicy {
    fn default() -> Self {
        Self::LatestWins
    }
}

/// Process-level configuration, as read from the config file and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Matrix account name (localpart or full user ID)
    pub username: String,
    pub password: String,
    pub homeserver: String,
    /// Base URL of the Ollama server
    pub backend_url: String,
    pub model: String,
    pub command_prefix: String,
    /// Turns of history sent with each prompt (unbounded when unset)
    pub history_limit: Option<usize>,
    pub idle_timeout_secs: u64,
    /// Minimum delay between two edits of the streamed message
    pub edit_interval_ms: u64,
    pub backlog: BacklogPolicy,
    pub unreachable_retries: u32,
    pub inbox_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            homeserver: DEFAULT_HOMESERVER.to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            model: String::new(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            history_limit: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            edit_interval_ms: 0,
            backlog: BacklogPolicy::default(),
            unreachable_retries: 2,
            inbox_capacity: 32,
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Reading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that the required settings are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if self.homeserver.trim().is_empty() {
            return Err(ConfigError::Missing("homeserver"));
        }
        if self.command_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "command_prefix",
                message: "must not be empty".to_string(),
            });
        }
        if self.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "command_prefix",
                message: "must not contain whitespace".to_string(),
            });
        }
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "backend_url",
                message: format!("expected an http(s) URL, got {:?}", self.backend_url),
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "idle_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "inbox_capacity",
                message: "must be at least 1".to_string(),
            });
        }
        if self.backlog == BacklogPolicy::Fifo(0) {
            return Err(ConfigError::Invalid {
                field: "backlog",
                message: "fifo capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn trim_policy(&self) -> TrimPolicy {
        TrimPolicy::from_limit(self.history_limit)
    }

    /// Relay tuning derived from this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::new(&self.model)
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .edit_interval(Duration::from_millis(self.edit_interval_ms))
            .backlog(self.backlog)
            .unreachable_retries(self.unreachable_retries)
            .inbox_capacity(self.inbox_capacity)
    }
}

/// Per-room relay loop settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub model: String,
    /// Idle window applied to every generation stream
    pub idle_timeout: Duration,
    pub edit_interval: Duration,
    pub backlog: BacklogPolicy,
    pub unreachable_retries: u32,
    /// Base delay of the exponential retry backoff
    pub retry_backoff: Duration,
    /// Text of the message published before the first increment arrives
    pub placeholder: String,
    pub inbox_capacity: usize,
}

impl RelayConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            edit_interval: Duration::ZERO,
            backlog: BacklogPolicy::default(),
            unreachable_retries: 0,
            retry_backoff: Duration::from_secs(1),
            placeholder: "…".to_string(),
            inbox_capacity: 32,
        }
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn edit_interval(mut self, interval: Duration) -> Self {
        self.edit_interval = interval;
        self
    }

    pub fn backlog(mut self, policy: BacklogPolicy) -> Self {
        self.backlog = policy;
        self
    }

    pub fn unreachable_retries(mut self, retries: u32) -> Self {
        self.unreachable_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = text.into();
        self
    }

    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    /// Backoff before retry number `attempt` (1-based): 1x, 2x, 4x...
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}
