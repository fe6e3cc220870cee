//! Error types for the orchestration layer.

use std::any::Any;
use thiserror::Error;

/// Main error type for stream orchestration.
///
/// Runtime failures of sources, loaders and combiners never escape to
/// consumers as `Err`; they are carried by this type into `on_error`
/// hooks and fallback construction.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Source {index} failed: {message}")]
    Source { index: usize, message: String },

    #[error("Combiner failed: {0}")]
    Combiner(String),

    #[error("Loader {index} failed: {message}")]
    Loader { index: usize, message: String },

    #[error("Panicked: {0}")]
    Panicked(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StreamError {
    /// Shorthand for a combiner failure.
    pub fn combiner(message: impl Into<String>) -> Self {
        StreamError::Combiner(message.into())
    }

    /// Shorthand for an upstream source failure.
    pub fn source(index: usize, message: impl Into<String>) -> Self {
        StreamError::Source {
            index,
            message: message.into(),
        }
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        StreamError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Text carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Serialization(e.to_string())
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, StreamError>;
