use thiserror::Error;

/// Main error type for resocket
#[derive(Error, Debug)]
pub enum ResocketError {
    /// Underlying transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted on a transport that is not open
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Serializer failed to encode or decode a payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// URL provider failed to produce a connection URL
    #[error("URL resolution failed: {0}")]
    UrlResolution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Command channel to the connection task is gone
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ResocketError {
    fn from(err: serde_json::Error) -> Self {
        ResocketError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ResocketError {
    fn from(err: serde_yaml::Error) -> Self {
        ResocketError::Configuration(err.to_string())
    }
}

/// Result type for resocket operations
pub type Result<T> = std::result::Result<T, ResocketError>;
