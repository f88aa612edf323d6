//! Error types for the Mattermost bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bridge core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote (Mattermost-side) channel/client error
    #[error("channel error: {0}")]
    Channel(String),

    /// Session has no valid bearer token; the operation was short-circuited
    #[error("session is not logged in")]
    NotLoggedIn,

    /// 401/403 from the remote `identity` endpoint
    #[error("authentication failed: {0}")]
    BadCredentials(String),

    /// A streamed envelope or API response could not be parsed as expected
    #[error("malformed data: {0}")]
    Malformed(String),

    /// No puppet is registered for the requested MXID
    #[error("no puppet registered for {0}")]
    PuppetNotFound(String),

    /// The framework boundary reported a failure (portal/user/login lookup)
    #[error("framework error: {0}")]
    Framework(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error talking to the remote REST API
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Streaming (websocket) transport error
    #[error("stream error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
