use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The version command or the upgrade command failed.
    #[error(transparent)]
    Process(#[from] galera_process::Error),

    /// `mysqld --version` printed something without a version in it.
    #[error("could not parse engine version from {0:?}")]
    UnknownVersion(String),
}
