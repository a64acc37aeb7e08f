//! Error types for model access.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a model call.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid API key format.
    #[error("invalid API key format")]
    InvalidApiKey,

    /// Provider answered with a non-success status.
    #[error("provider API error ({status}): {message}")]
    ProviderApi { status: u16, message: String },

    /// Request never got a response (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(String),

    /// Provider answered but produced no usable completion.
    #[error("empty completion from provider: {0}")]
    EmptyCompletion(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
