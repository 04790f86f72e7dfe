//! Error types for process management.

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running child processes.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// A run-to-completion command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    ProcessExit {
        /// The program that was run.
        program: String,

        /// Its exit status.
        status: ExitStatus,

        /// Whatever it wrote to stderr, trimmed.
        stderr: String,
    },

    /// The process could not be signalled.
    #[error("failed to signal process {0}: {1}")]
    Signal(u32, #[source] nix::errno::Errno),

    /// Failed to spawn a process.
    #[error("failed to spawn process: {0}")]
    SpawnProcess(String),
}
