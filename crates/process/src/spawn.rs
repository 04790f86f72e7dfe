//! Spawning and supervising long-running child processes.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::OutputHandler;
use crate::error::{Error, Result};

/// How long [`ManagedProcess::wait`] keeps draining output after exit.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Options for spawning a process.
#[derive(Clone)]
pub struct ProcessOptions {
    /// The arguments to pass to the executable.
    pub args: Vec<String>,

    /// The executable to run.
    pub executable: PathBuf,

    /// Handler for the process output. Lines are logged when unset.
    pub output: Option<Arc<dyn OutputHandler>>,
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("args", &self.args)
            .field("executable", &self.executable)
            .field("output", &self.output.as_ref().map(|_| "Arc<dyn OutputHandler>"))
            .finish()
    }
}

impl ProcessOptions {
    /// Creates a new `ProcessOptions`.
    #[must_use]
    pub fn new<P: AsRef<Path>, A: AsRef<OsStr>>(
        executable: P,
        args: impl IntoIterator<Item = A>,
    ) -> Self {
        Self {
            args: args
                .into_iter()
                .map(|a| a.as_ref().to_string_lossy().to_string())
                .collect(),
            executable: executable.as_ref().to_path_buf(),
            output: None,
        }
    }

    /// Sets the output handler for the process.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn OutputHandler>) -> Self {
        self.output = Some(output);
        self
    }

    /// The executable's file name, for log messages.
    pub(crate) fn program(&self) -> String {
        self.executable.file_name().map_or_else(
            || self.executable.to_string_lossy().to_string(),
            |name| name.to_string_lossy().to_string(),
        )
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        cmd
    }
}

/// Lifecycle of a managed process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    /// Still running.
    Running,

    /// Exited. The status is `None` if it could not be collected.
    Exited(Option<ExitStatus>),
}

/// A running child process, exclusively owned by whoever spawned it.
///
/// Dropping the handle does not kill the process.
#[derive(Debug)]
pub struct ManagedProcess {
    pid: u32,
    state: watch::Receiver<ProcessState>,
    task_tracker: TaskTracker,
}

impl ManagedProcess {
    /// Returns the process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Returns true once the process has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        !matches!(self.state(), ProcessState::Running)
    }

    /// Waits for the process to exit, then briefly for its output to drain.
    pub async fn wait(&self) -> Option<ExitStatus> {
        let mut state = self.state.clone();
        let exited = state
            .wait_for(|s| !matches!(s, ProcessState::Running))
            .await
            .map(|s| *s);

        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, self.task_tracker.wait())
            .await
            .is_err()
        {
            debug!("output of process {} still open after exit", self.pid);
        }

        match exited {
            Ok(ProcessState::Exited(status)) => status,
            Ok(ProcessState::Running) | Err(_) => None,
        }
    }

    /// Sends a signal to the process. Signalling an exited process is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be sent.
    pub fn signal(&self, sig: Signal) -> Result<()> {
        if self.has_exited() {
            debug!("process {} already exited, not sending {sig}", self.pid);
            return Ok(());
        }

        let raw = i32::try_from(self.pid)
            .map_err(|_| Error::Signal(self.pid, nix::errno::Errno::ESRCH))?;
        signal::kill(Pid::from_raw(raw), sig).map_err(|e| Error::Signal(self.pid, e))
    }
}

/// Spawns a long-running process and starts forwarding its output.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the process could not be spawned.
pub fn spawn(options: ProcessOptions) -> Result<ManagedProcess> {
    let program = options.program();
    let task_tracker = TaskTracker::new();

    let mut cmd = options.command();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("spawning process: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Io("failed to spawn process", e))?;

    let pid = child.id().ok_or_else(|| {
        Error::SpawnProcess(format!("no pid available for spawned {program}"))
    })?;

    debug!("{program} spawned with pid {pid}");

    if let Some(stdout) = child.stdout.take() {
        let output = options.output.clone();
        let program = program.clone();
        task_tracker.spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match output {
                    Some(ref output) => output.handle_stdout(&line),
                    None => info!("{program} stdout: {line}"),
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let output = options.output.clone();
        let program = program.clone();
        task_tracker.spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match output {
                    Some(ref output) => output.handle_stderr(&line),
                    None => warn!("{program} stderr: {line}"),
                }
            }
        });
    }

    task_tracker.close();

    let (state_tx, state_rx) = watch::channel(ProcessState::Running);
    tokio::spawn(async move {
        let status = match child.wait().await {
            Ok(status) => {
                if status.success() {
                    info!("{program} exited with status: {status}");
                } else {
                    warn!("{program} exited with non-zero status: {status}");
                }
                Some(status)
            }
            Err(e) => {
                error!("failed to wait for {program}: {e}");
                None
            }
        };

        state_tx.send_replace(ProcessState::Exited(status));
    });

    Ok(ManagedProcess {
        pid,
        state: state_rx,
        task_tracker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::process::ExitStatusExt;
    use std::sync::Mutex;

    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        stdout: Mutex<Vec<String>>,
        stderr: Mutex<Vec<String>>,
    }

    impl OutputHandler for Recorder {
        fn handle_stdout(&self, line: &str) {
            self.stdout.lock().unwrap().push(line.to_string());
        }

        fn handle_stderr(&self, line: &str) {
            self.stderr.lock().unwrap().push(line.to_string());
        }
    }

    #[tokio::test]
    async fn test_output_is_forwarded_line_by_line() {
        let recorder = Arc::new(Recorder::default());
        let options = ProcessOptions::new("sh", ["-c", "echo one; echo two; echo oops >&2"])
            .with_output(recorder.clone());

        let process = spawn(options).unwrap();
        let status = process.wait().await.unwrap();

        assert!(status.success());
        assert!(process.has_exited());
        assert_eq!(*recorder.stdout.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(*recorder.stderr.lock().unwrap(), vec!["oops"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_runs_without_output_handler() {
        let process =
            spawn(ProcessOptions::new("sh", ["-c", "echo hello-from-child; exit 2"])).unwrap();
        let status = process.wait().await.unwrap();

        assert_eq!(status.code(), Some(2));
        assert_eq!(process.state(), ProcessState::Exited(Some(status)));
    }

    #[tokio::test]
    async fn test_signal_terminates_process() {
        let process = spawn(ProcessOptions::new("sleep", ["30"])).unwrap();
        assert_eq!(process.state(), ProcessState::Running);

        process.signal(Signal::SIGTERM).unwrap();
        let status = process.wait().await.unwrap();

        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_noop() {
        let process = spawn(ProcessOptions::new("true", Vec::<String>::new())).unwrap();
        process.wait().await;

        assert!(process.signal(Signal::SIGTERM).is_ok());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let result = spawn(ProcessOptions::new(
            "/nonexistent/galera/mysqld",
            Vec::<String>::new(),
        ));

        assert!(matches!(result, Err(Error::Io(_, _))));
    }
}
