//! Child process management for the database engine and its client tools.
//!
//! Long-running processes are spawned with [`spawn`] and owned through a
//! [`ManagedProcess`]; their output is forwarded line by line to an
//! [`OutputHandler`]. Short-lived tools run to completion through [`run`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod run;
mod spawn;

pub use error::{Error, Result};
pub use run::{CommandOutput, run};
pub use spawn::{ManagedProcess, ProcessOptions, ProcessState, spawn};

pub use nix::sys::signal::Signal;

/// Receives a child's output, one line at a time.
pub trait OutputHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles a line written to stdout.
    fn handle_stdout(&self, line: &str);

    /// Handles a line written to stderr.
    fn handle_stderr(&self, line: &str);
}
