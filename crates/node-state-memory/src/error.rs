use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Saves were configured to fail.
    #[error("save rejected")]
    SaveRejected,
}
