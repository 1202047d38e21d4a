use thiserror::Error;

/// Errors that can occur in the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Endpoint configuration rejected at registration time.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    /// New work refused because the relay is draining.
    #[error("relay is shutting down")]
    ShuttingDown,
}
