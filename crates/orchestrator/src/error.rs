use std::time::Duration;

use galera_engine::StartMode;
use galera_node_state::NodeRole;
use thiserror::Error;

use crate::Stage;

/// A collaborator error, boxed so the orchestrator is not generic over it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that end an orchestration run in `Failed`.
#[derive(Debug, Error)]
pub enum Error {
    /// `execute` was called more than once.
    #[error("already executed")]
    AlreadyExecuted,

    /// The node was part of a cluster but no peer answered. Only an operator
    /// can tell whether the cluster is gone or merely unreachable.
    #[error(
        "persisted role is {role} but none of {total} peers are healthy; refusing to bootstrap without force_bootstrap"
    )]
    AmbiguousQuorum {
        /// The persisted role.
        role: NodeRole,

        /// Number of configured peers.
        total: usize,
    },

    /// The engine exited on its own while running.
    #[error("engine exited unexpectedly")]
    EngineExited,

    /// The start command failed.
    #[error("failed to start engine in {mode} mode: {source}")]
    Launch {
        /// The mode that was attempted.
        mode: StartMode,

        /// The controller error.
        source: BoxError,
    },

    /// The new role could not be recorded.
    #[error("failed to persist node state: {0}")]
    PersistState(#[source] BoxError),

    /// The engine did not become reachable before the deadline.
    #[error(
        "engine not reachable within {deadline:?}{}",
        .stop_error.as_ref().map(|e| format!(" (stop also failed: {e})")).unwrap_or_default()
    )]
    ReachabilityTimeout {
        /// The configured deadline.
        deadline: Duration,

        /// Why the follow-up stop failed, if it did.
        stop_error: Option<String>,
    },

    /// The engine did not shut down cleanly.
    #[error("failed to stop engine: {0}")]
    Stop(#[source] BoxError),

    /// Checking for or running the upgrade failed.
    #[error("upgrade failed: {0}")]
    Upgrade(#[source] BoxError),
}

impl Error {
    /// The stage this error was raised in.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::AlreadyExecuted => Stage::Init,
            Self::AmbiguousQuorum { .. } => Stage::DecidingMode,
            Self::Upgrade(_) => Stage::Upgrading,
            Self::Launch { .. } => Stage::Launching,
            Self::PersistState(_) | Self::ReachabilityTimeout { .. } => Stage::WaitingReachable,
            Self::EngineExited => Stage::Running,
            Self::Stop(_) => Stage::ShuttingDown,
        }
    }
}
