use thiserror::Error;

/// Top-level error type for Chorus.
#[derive(Debug, Error)]
pub enum ChorusError {
    /// Error from a language-model backend.
    #[error("generator error: {0}")]
    Generator(String),

    /// Error from a chat gateway or the web channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Async queue unavailable or closed.
    #[error("queue error: {0}")]
    Queue(String),

    /// No generator or channel provider registered under this name.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Entity lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
