use thiserror::Error;

/// Errors that can occur while decoding a persisted state record.
#[derive(Debug, Error)]
pub enum Error {
    /// The record is JSON but does not match the expected shape.
    #[error("malformed state record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The record is not valid UTF-8.
    #[error("state record is not valid utf-8")]
    NotUtf8,

    /// The record names a role this build does not know.
    #[error("unknown node role: {0:?}")]
    UnknownRole(String),
}
