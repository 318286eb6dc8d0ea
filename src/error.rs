use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a record's image could not be turned into a bitmap.
///
/// Ingestion treats this as a skip, never as a failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no image available")]
    Missing,

    #[error("image at {path:?} is not a decodable bitmap")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("failed to load embedding model '{model}': {message}")]
    ModelInit { model: String, message: String },

    #[error("embedding model inference failed: {message}")]
    Inference { message: String },

    #[error("embedding model returned no vector for {input}")]
    EmptyOutput { input: String },

    #[error("failed to encode image for the embedding model")]
    Encode {
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: '{collection}'")]
    NotFound { collection: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("embedding dimension mismatch: collection has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("corrupt collection file {path:?}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("store I/O error")]
    Io(#[from] std::io::Error),

    #[error("store serialization error")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors that abort a whole query run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Renders an error followed by each of its sources, joined by `separator`.
///
/// Variants that wrap a source leave it out of their own message, so every
/// cause appears exactly once.
pub fn error_chain(e: &dyn StdError, separator: &str) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(separator);
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
