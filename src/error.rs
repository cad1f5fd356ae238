//! Error types for Telltale

use crate::types::Channel;
use thiserror::Error;

/// Errors that can occur while turning a session into channel states
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Session contains no frames")]
    EmptySession,

    #[error("Missing required measurement `{column}` for channel {channel}")]
    MissingColumn { channel: Channel, column: String },

    #[error("Value {value} of `{field}` at frame {frame} is out of range for channel {channel}")]
    OutOfRange {
        channel: Channel,
        frame: usize,
        field: String,
        value: f64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel worker for {0} panicked")]
    WorkerPanicked(Channel),
}
