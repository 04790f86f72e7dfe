//! Decides how a Galera node starts, starts it, and supervises it until
//! shutdown.
//!
//! One [`StartOrchestrator::execute`] call walks the node through
//! `DecidingMode`, an optional `Upgrading` cycle, `Launching`,
//! `WaitingReachable`, `PostStart` and `Running`, and ends in `Stopped` or
//! `Failed`. Each stage completes before the next begins. The only state that
//! survives a restart is the role saved once the engine is reachable.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod decision;
mod error;
mod reachability;
mod state;

pub use decision::{DecisionPolicy, StartDecision, decide};
pub use error::{BoxError, Error};
pub use reachability::{
    DEFAULT_POLL_INTERVAL, DEFAULT_REACHABILITY_DEADLINE, Reachability, ReachabilityOptions,
    wait_reachable,
};
pub use state::{OrchestratorState, Stage};

use std::sync::atomic::{AtomicBool, Ordering};

use galera_engine::{PostStartSql, ProcessController, Seeder, StartMode, Upgrader};
use galera_node_state::NodeStateStore;
use galera_quorum::HealthCheck;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Options for configuring a `StartOrchestrator`.
pub struct StartOrchestratorOptions<C, H, S, U, X, P> {
    /// Starts and stops the engine.
    pub engine: C,

    /// Reports peer health.
    pub health_checker: H,

    /// Operator overrides for the start decision.
    pub policy: DecisionPolicy,

    /// Runs post-start SQL.
    pub post_start: P,

    /// How reachability is polled, after launch and around upgrades.
    pub reachability: ReachabilityOptions,

    /// Seeds databases and users.
    pub seeder: X,

    /// Persists the node role.
    pub state_store: S,

    /// Upgrades the data directory.
    pub upgrader: U,
}

/// The node-start state machine.
///
/// `execute` runs at most once. `shutdown` may be called from any task at any
/// time; it is honored between stages, while waiting for reachability and
/// while running.
pub struct StartOrchestrator<C, H, S, U, X, P>
where
    C: ProcessController,
    H: HealthCheck,
    S: NodeStateStore,
    U: Upgrader,
    X: Seeder,
    P: PostStartSql,
{
    engine: C,
    executed: AtomicBool,
    health_checker: H,
    policy: DecisionPolicy,
    post_start: P,
    reachability: ReachabilityOptions,
    seeder: X,
    shutdown_token: CancellationToken,
    state: watch::Sender<OrchestratorState>,
    state_store: S,
    upgrader: U,
}

impl<C, H, S, U, X, P> StartOrchestrator<C, H, S, U, X, P>
where
    C: ProcessController,
    H: HealthCheck,
    S: NodeStateStore,
    U: Upgrader,
    X: Seeder,
    P: PostStartSql,
{
    /// Creates a new orchestrator in the `Init` state.
    pub fn new(
        StartOrchestratorOptions {
            engine,
            health_checker,
            policy,
            post_start,
            reachability,
            seeder,
            state_store,
            upgrader,
        }: StartOrchestratorOptions<C, H, S, U, X, P>,
    ) -> Self {
        Self {
            engine,
            executed: AtomicBool::new(false),
            health_checker,
            policy,
            post_start,
            reachability,
            seeder,
            shutdown_token: CancellationToken::new(),
            state: watch::Sender::new(OrchestratorState::Init),
            state_store,
            upgrader,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Requests a graceful stop.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Runs the node until shutdown or a fatal failure.
    ///
    /// Returns `Ok` after a clean stop; the orchestrator is then `Stopped`.
    /// Any error leaves it `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the error of the stage that failed; see [`Error::stage`].
    pub async fn execute(&self) -> Result<(), Error> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyExecuted);
        }

        match self.run().await {
            Ok(()) => {
                self.transition(OrchestratorState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.transition(OrchestratorState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        debug!("orchestrator state {previous} -> {next}");
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    async fn run(&self) -> Result<(), Error> {
        self.transition(OrchestratorState::DecidingMode);

        let role = self.state_store.load().await;
        let snapshot = self.health_checker.check_peers().await;
        info!(
            %role,
            healthy = snapshot.healthy_count,
            total = snapshot.total,
            "checked cluster health"
        );

        let decision = decide(role, &snapshot, &self.policy)?;
        info!(mode = %decision.mode, "start decision: {}", decision.rationale);

        if self.shutdown_requested() {
            info!("shutdown requested before launch, not starting engine");
            return Ok(());
        }

        self.upgrade_if_needed().await?;

        if self.shutdown_requested() {
            info!("shutdown requested before launch, not starting engine");
            return Ok(());
        }

        self.transition(OrchestratorState::Launching);
        self.launch(decision.mode).await?;

        self.transition(OrchestratorState::WaitingReachable);
        match wait_reachable(&self.engine, &self.reachability, &self.shutdown_token).await {
            Reachability::Reachable => info!("engine reachable"),
            Reachability::Cancelled => {
                info!("shutdown requested while waiting for engine, stopping it");
                return self.stop_engine().await;
            }
            Reachability::TimedOut => {
                error!(
                    "engine not reachable within {:?}, stopping it",
                    self.reachability.deadline
                );
                let stop_error = self.engine.stop().await.err().map(|e| {
                    warn!("failed to stop unreachable engine: {e}");
                    e.to_string()
                });
                return Err(Error::ReachabilityTimeout {
                    deadline: self.reachability.deadline,
                    stop_error,
                });
            }
        }

        if let Err(e) = self.state_store.save(decision.target_role).await {
            error!("failed to persist role {}: {e}", decision.target_role);
            if let Err(stop_error) = self.engine.stop().await {
                warn!("failed to stop engine: {stop_error}");
            }
            return Err(Error::PersistState(Box::new(e)));
        }
        info!("persisted node role {}", decision.target_role);

        self.transition(OrchestratorState::PostStart);
        self.post_start().await;

        self.transition(OrchestratorState::Running);
        tokio::select! {
            () = self.shutdown_token.cancelled() => info!("shutdown command received. shutting down..."),
            () = self.engine.wait() => {
                error!("engine exited unexpectedly");
                return Err(Error::EngineExited);
            }
        }

        self.stop_engine().await
    }

    /// Runs the upgrade inside a stand-alone start/stop cycle when the data
    /// directory is stale. A shutdown while the stand-alone engine comes up
    /// stops it and returns early; the upgrade itself is never interrupted.
    async fn upgrade_if_needed(&self) -> Result<(), Error> {
        let needs_upgrade = self
            .upgrader
            .needs_upgrade()
            .await
            .map_err(|e| Error::Upgrade(Box::new(e)))?;

        if !needs_upgrade {
            debug!("no upgrade needed");
            return Ok(());
        }

        self.transition(OrchestratorState::Upgrading);
        info!("data directory needs an upgrade, starting engine stand-alone");

        self.engine
            .start_stand_alone()
            .await
            .map_err(|e| Error::Upgrade(Box::new(e)))?;

        let result = match wait_reachable(&self.engine, &self.reachability, &self.shutdown_token)
            .await
        {
            Reachability::Reachable => self
                .upgrader
                .run_upgrade()
                .await
                .map(|output| debug!("upgrade output: {output}"))
                .map_err(|e| Error::Upgrade(Box::new(e))),
            Reachability::Cancelled => {
                info!("shutdown requested before upgrade, stopping stand-alone engine");
                Ok(())
            }
            Reachability::TimedOut => Err(Error::Upgrade(
                format!(
                    "stand-alone engine not reachable within {:?}",
                    self.reachability.deadline
                )
                .into(),
            )),
        };

        let stopped = self
            .engine
            .stop()
            .await
            .map_err(|e| Error::Upgrade(Box::new(e)));

        match (result, stopped) {
            (Err(e), Err(stop_error)) => {
                warn!("failed to stop stand-alone engine: {stop_error}");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn launch(&self, mode: StartMode) -> Result<(), Error> {
        info!("starting engine in {mode} mode");

        let result = match mode {
            StartMode::Bootstrap => self.engine.start_bootstrap().await.map(Some),
            StartMode::Join => self.engine.start_join().await.map(Some),
            StartMode::StandAlone => self.engine.start_stand_alone().await.map(|()| None),
        };

        match result {
            Ok(Some(handle)) => {
                info!("engine started with pid {}", handle.pid());
                Ok(())
            }
            Ok(None) => {
                info!("engine started");
                Ok(())
            }
            Err(e) => Err(Error::Launch {
                mode,
                source: Box::new(e),
            }),
        }
    }

    /// Seeding and post-start SQL run once per successful start. Their
    /// errors are reported; the engine keeps running.
    async fn post_start(&self) {
        if self.seeder.needs_seed().await {
            if let Err(e) = self.seeder.seed().await {
                error!("seeding failed: {e}");
            }
        } else {
            debug!("nothing to seed");
        }

        if let Err(e) = self.post_start.run_post_start_sql().await {
            error!("post-start sql failed: {e}");
        }
    }

    /// Stops the engine. The persisted role is left as it is.
    async fn stop_engine(&self) -> Result<(), Error> {
        self.transition(OrchestratorState::ShuttingDown);

        self.engine
            .stop()
            .await
            .map_err(|e| Error::Stop(Box::new(e)))?;

        info!("engine stopped");
        Ok(())
    }
}
