use std::sync::LazyLock;

use galera_process::OutputHandler;
use regex::Regex;
use tracing::{Level, error, info, warn};

/// Matches MySQL error-log lines, with or without the 8.0 error code and
/// subsystem tags.
static LOG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?\s+\d+\s+\[(\w+)\]\s+(?:\[MY-\d+\]\s+\[\w+\]\s+)?(.*)$",
    )
    .expect("Invalid regex pattern")
});

/// Maps a mysqld output line to a tracing level and the message to log.
pub fn classify(line: &str) -> (Level, &str) {
    let Some(caps) = LOG_REGEX.captures(line) else {
        return (Level::INFO, line);
    };

    let label = caps.get(1).map_or("", |m| m.as_str());
    let message = caps.get(2).map_or(line, |m| m.as_str());

    match label {
        "Warning" => (Level::WARN, message),
        "ERROR" | "Error" => (Level::ERROR, message),
        _ => (Level::INFO, message),
    }
}

/// Forwards mysqld output to tracing under the `mysqld` target.
pub struct MysqldOutput;

impl OutputHandler for MysqldOutput {
    fn handle_stdout(&self, line: &str) {
        match classify(line) {
            (Level::ERROR, message) => error!(target: "mysqld", "{}", message),
            (Level::WARN, message) => warn!(target: "mysqld", "{}", message),
            (_, message) => info!(target: "mysqld", "{}", message),
        }
    }

    fn handle_stderr(&self, line: &str) {
        self.handle_stdout(line); // mysqld writes its error log to stderr
    }
}
