use crate::types::StreamId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamingError {
    #[error("Stream not found: {0}")]
    NotFound(StreamId),

    #[error("Streaming session already closed")]
    AlreadyClosed,

    #[error("Transport source unavailable for stream: {0}")]
    SourceUnavailable(StreamId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StreamingError {
    fn from(error: std::io::Error) -> Self {
        StreamingError::Io(error.to_string())
    }
}

impl From<toml::de::Error> for StreamingError {
    fn from(error: toml::de::Error) -> Self {
        StreamingError::InvalidConfig(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamingError>;
