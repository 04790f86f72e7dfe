use std::path::PathBuf;

use thiserror::Error;

/// Errors that end the `galera-init` process.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration file is not valid YAML for `Config`.
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        /// The file that was read.
        path: PathBuf,

        /// The parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration parsed but is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The log filter could not be built.
    #[error("invalid log level: {0}")]
    LogFilter(String),

    /// The node failed to start or stop.
    #[error(transparent)]
    Orchestrator(#[from] galera_orchestrator::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
