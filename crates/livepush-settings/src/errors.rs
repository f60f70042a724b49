//! Settings error types.

use thiserror::Error;

/// Errors from loading, validating, or persisting settings and the code file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing a file failed.
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    /// A file held malformed JSON.
    #[error("malformed settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field is empty.
    #[error("`{0}` must be set")]
    Missing(&'static str),
    /// A field is out of its allowed range.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
