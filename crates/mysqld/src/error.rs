use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An engine process is already running.
    #[error("mysqld already started")]
    AlreadyStarted,

    /// A post-start SQL file failed to execute.
    #[error("post-start sql {} failed: {source}", file.display())]
    PostStartSql {
        /// The file that failed.
        file: PathBuf,

        /// What the client reported.
        #[source]
        source: galera_process::Error,
    },

    /// An error occurred running mysqld or one of its client tools.
    #[error(transparent)]
    Process(#[from] galera_process::Error),

    /// The shutdown command failed and there was no child to signal instead.
    #[error("mysqladmin shutdown failed: {0}")]
    Shutdown(#[source] galera_process::Error),

    /// mysqld did not exit within the stop timeout.
    #[error("mysqld did not exit within {0:?}")]
    StopTimeout(Duration),
}
