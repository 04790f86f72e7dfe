//! Contracts between the start orchestrator and the database engine.
//!
//! The orchestrator only ever talks to the engine through these traits, which
//! keeps it testable against fakes and keeps the child process exclusively
//! owned by the [`ProcessController`] implementation.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How the engine is started.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Seed a brand-new cluster, bypassing peer discovery.
    Bootstrap,

    /// Join an existing cluster through normal peer discovery.
    Join,

    /// Replication disabled, local maintenance access only.
    StandAlone,
}

impl Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bootstrap => "bootstrap",
            Self::Join => "join",
            Self::StandAlone => "stand-alone",
        })
    }
}

/// Identifies a running engine child process.
///
/// The handle carries no control over the process; stopping or waiting goes
/// through the [`ProcessController`] that returned it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineHandle {
    mode: StartMode,
    pid: u32,
}

impl EngineHandle {
    /// Creates a new handle.
    #[must_use]
    pub const fn new(mode: StartMode, pid: u32) -> Self {
        Self { mode, pid }
    }

    /// The mode the engine was started in.
    #[must_use]
    pub const fn mode(&self) -> StartMode {
        self.mode
    }

    /// The OS process id of the engine.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

/// Starts, stops and probes the database engine.
///
/// At most one engine process exists at a time and start calls are never
/// issued concurrently.
#[async_trait]
pub trait ProcessController
where
    Self: Send + Sync + 'static,
{
    /// The error type for this controller.
    type Error: Debug + Error + Send + Sync + 'static;

    /// Starts the engine with replication disabled. Returns once the start
    /// command itself has completed (the engine daemonizes).
    async fn start_stand_alone(&self) -> Result<(), Self::Error>;

    /// Starts the engine configured to join an existing cluster. Does not
    /// wait for membership; that is a reachability concern.
    async fn start_join(&self) -> Result<EngineHandle, Self::Error>;

    /// Starts the engine as the seed of a new cluster. Must never be called
    /// while any peer may be running as a live cluster member.
    async fn start_bootstrap(&self) -> Result<EngineHandle, Self::Error>;

    /// Gracefully shuts the engine down and waits for it to exit. Failing to
    /// exit within the controller's deadline is an error; the engine is never
    /// force-killed.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Query-level probe: the engine accepts connections and, if replication
    /// is enabled, is synced with the cluster.
    async fn is_reachable(&self) -> bool;

    /// OS-level liveness only.
    async fn is_running(&self) -> bool;

    /// Resolves once the engine process has exited.
    async fn wait(&self);
}

/// Brings the engine's on-disk data up to the running engine's version.
#[async_trait]
pub trait Upgrader
where
    Self: Send + Sync + 'static,
{
    /// The error type for this upgrader.
    type Error: Debug + Error + Send + Sync + 'static;

    /// Compares the stored version marker with the engine's version.
    async fn needs_upgrade(&self) -> Result<bool, Self::Error>;

    /// Runs the upgrade and returns its output. The engine must be reachable
    /// locally without replication while this runs.
    async fn run_upgrade(&self) -> Result<String, Self::Error>;
}

/// Seeds preconfigured databases and users. Must be idempotent.
#[async_trait]
pub trait Seeder
where
    Self: Send + Sync + 'static,
{
    /// The error type for this seeder.
    type Error: Debug + Error + Send + Sync + 'static;

    /// Returns false when there is nothing to seed.
    async fn needs_seed(&self) -> bool;

    /// Creates or updates the configured databases, users and grants.
    async fn seed(&self) -> Result<(), Self::Error>;
}

/// Runs operator-provided SQL once the engine is reachable. Must be idempotent.
#[async_trait]
pub trait PostStartSql
where
    Self: Send + Sync + 'static,
{
    /// The error type for this collaborator.
    type Error: Debug + Error + Send + Sync + 'static;

    /// Executes the configured post-start statements.
    async fn run_post_start_sql(&self) -> Result<(), Self::Error>;
}
