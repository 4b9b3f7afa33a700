//! Error types for the bridge core.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for chat-side bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the chat network collaborator and the session supervisor.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Failed to publish message in {room}: {message}")]
    PublishFailed { room: String, message: String },

    #[error("Failed to edit message {event_id} in {room}: {message}")]
    EditFailed {
        room: String,
        event_id: String,
        message: String,
    },

    #[error("Failed to join room {room}: {message}")]
    JoinFailed { room: String, message: String },

    #[error("Failed to leave room {room}: {message}")]
    LeaveFailed { room: String, message: String },

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Chat network error: {0}")]
    Network(String),
}

/// Terminal failures of a generation stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("LLM backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("LLM backend error{}: {message}", status_suffix(.status))]
    BackendError {
        status: Option<u16>,
        message: String,
    },

    #[error("No output from LLM backend for {0:?}")]
    Timeout(Duration),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl InferenceError {
    /// Human-readable notice posted to the room when a generation fails.
    pub fn room_notice(&self) -> String {
        match self {
            Self::BackendUnreachable(_) => {
                "⚠️ The language model is unreachable right now. Please try again later.".to_string()
            }
            Self::BackendError { .. } => {
                format!("⚠️ The language model returned an error: {self}")
            }
            Self::Timeout(window) => format!(
                "⚠️ The language model stopped responding (no output for {}s).",
                window.as_secs()
            ),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
