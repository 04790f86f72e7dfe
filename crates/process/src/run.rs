//! Running short-lived tools to completion.

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::spawn::ProcessOptions;

/// Captured result of a command that ran to completion.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitStatus,

    /// Everything written to stdout.
    pub stdout: String,

    /// Everything written to stderr.
    pub stderr: String,
}

/// Runs a command to completion, optionally feeding `input` on stdin.
///
/// The output handler in `options` is ignored; output is captured instead.
/// Dropping the returned future kills the command, so callers bound the run
/// time with `tokio::time::timeout`.
///
/// # Errors
///
/// Returns [`Error::ProcessExit`] if the command exits unsuccessfully, or an
/// IO error if it could not be started.
pub async fn run(options: &ProcessOptions, input: Option<&str>) -> Result<CommandOutput> {
    let program = options.program();

    let mut cmd = options.command();
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    debug!("running: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Io("failed to spawn process", e))?;

    let stdin = child.stdin.take();
    let write_input = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let (written, output) = tokio::join!(write_input, child.wait_with_output());
    let output = output.map_err(|e| Error::Io("failed to wait for process", e))?;

    // A tool that exits without reading its input reports that through its
    // exit status.
    if let Err(e) = written {
        debug!("failed to write input to {program}: {e}");
    }

    let output = CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    trace!("{program} exited with {}", output.status);

    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::ProcessExit {
            program,
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
