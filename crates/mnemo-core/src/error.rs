use thiserror::Error;

/// Top-level error type for Mnemo.
///
/// Each variant corresponds to one class of failure the retrieval layer can
/// observe. None of them ever escape the retrieval gateway: strategies turn
/// them into `ok = false` results.
#[derive(Debug, Error)]
pub enum MnemoError {
    /// A required credential, connection string or setting is missing or invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An outbound HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An upstream service answered with a non-success status or a malformed payload.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The knowledge store rejected or failed a query.
    #[error("Store error: {0}")]
    Store(String),

    /// An operation did not finish within its time bound.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MnemoError`].
pub type MnemoResult<T> = Result<T, MnemoError>;
