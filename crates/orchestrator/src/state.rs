use std::fmt::{self, Display};

/// Lifecycle of one orchestration run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OrchestratorState {
    /// Constructed, `execute` not yet called.
    Init,

    /// Loading the persisted role and checking peers.
    DecidingMode,

    /// Running a schema upgrade against a stand-alone engine.
    Upgrading,

    /// Issuing the start command for the chosen mode.
    Launching,

    /// Polling the engine until it is reachable.
    WaitingReachable,

    /// Seeding and post-start SQL.
    PostStart,

    /// Supervising the engine until shutdown.
    Running,

    /// Stopping the engine.
    ShuttingDown,

    /// Terminal: stopped cleanly.
    Stopped,

    /// Terminal: a stage failed.
    Failed,
}

impl OrchestratorState {
    /// Returns true for `Stopped` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::DecidingMode => "deciding-mode",
            Self::Upgrading => "upgrading",
            Self::Launching => "launching",
            Self::WaitingReachable => "waiting-reachable",
            Self::PostStart => "post-start",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// The stage an error was raised in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// Before any stage ran.
    Init,

    /// Choosing the start mode.
    DecidingMode,

    /// Upgrading the data directory.
    Upgrading,

    /// Starting the engine.
    Launching,

    /// Waiting for the engine to become reachable and recording the role.
    WaitingReachable,

    /// Seeding and post-start SQL.
    PostStart,

    /// Supervising the running engine.
    Running,

    /// Stopping the engine.
    ShuttingDown,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::DecidingMode => "deciding mode",
            Self::Upgrading => "upgrading",
            Self::Launching => "launching",
            Self::WaitingReachable => "waiting reachable",
            Self::PostStart => "post-start",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
        })
    }
}
