use std::fmt;

use touchlink_core::TuningError;

#[derive(Debug)]
pub enum NodeError {
    Io(std::io::Error),
    Settings(toml::de::Error),
    InvalidSettings(String),
    Payload(serde_json::Error),
    Transport(String),
    Tuning(TuningError),
    Scenario(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Io(e) => write!(f, "I/O error: {e}"),
            NodeError::Settings(e) => write!(f, "settings error: {e}"),
            NodeError::InvalidSettings(msg) => write!(f, "invalid settings: {msg}"),
            NodeError::Payload(e) => write!(f, "payload error: {e}"),
            NodeError::Transport(msg) => write!(f, "transport error: {msg}"),
            NodeError::Tuning(e) => write!(f, "tuning error: {e}"),
            NodeError::Scenario(msg) => write!(f, "scenario error: {msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e)
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Settings(e)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Payload(e)
    }
}

impl From<TuningError> for NodeError {
    fn from(e: TuningError) -> Self {
        NodeError::Tuning(e)
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
