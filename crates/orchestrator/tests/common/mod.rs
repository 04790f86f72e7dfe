#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use galera_engine::{EngineHandle, PostStartSql, ProcessController, Seeder, StartMode, Upgrader};
use galera_node_state::{NodeRole, NodeStateStore, PersistedState};
use galera_node_state_memory::MemoryNodeStateStore;
use galera_orchestrator::{
    DecisionPolicy, OrchestratorState, ReachabilityOptions, StartOrchestrator,
    StartOrchestratorOptions,
};
use galera_quorum::{HealthCheck, HealthSnapshot, PeerHealth, PeerStatus};
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub &'static str);

/// Everything the fakes observed, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    StartStandAlone,
    StartJoin,
    StartBootstrap,
    Stop,
    RunUpgrade,
    Seed,
    PostStartSql,
    Save(NodeRole),
}

#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

/// When the fake engine starts answering reachability probes.
#[derive(Clone, Copy, Debug)]
pub enum Reachable {
    Immediately,
    AfterProbes(usize),
    Never,
}

#[derive(Debug)]
struct EngineInner {
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    probes: AtomicUsize,
    reachable: Mutex<Reachable>,
    running: watch::Sender<bool>,
}

/// Records start and stop calls; `crash` makes a running engine exit.
#[derive(Clone, Debug)]
pub struct FakeEngine {
    inner: Arc<EngineInner>,
    journal: Journal,
}

impl FakeEngine {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                fail_start: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
                probes: AtomicUsize::new(0),
                reachable: Mutex::new(Reachable::Immediately),
                running: watch::Sender::new(false),
            }),
            journal,
        }
    }

    pub fn set_reachable(&self, reachable: Reachable) {
        *self.inner.reachable.lock().unwrap() = reachable;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.inner.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.inner.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Reachability probes since the last start.
    pub fn probes(&self) -> usize {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub fn is_up(&self) -> bool {
        *self.inner.running.borrow()
    }

    pub fn crash(&self) {
        self.inner.running.send_replace(false);
    }

    fn start(&self, event: Event) -> Result<(), FakeError> {
        self.journal.record(event);
        if self.inner.fail_start.load(Ordering::SeqCst) {
            return Err(FakeError("mysqld: cannot open data directory"));
        }
        self.inner.probes.store(0, Ordering::SeqCst);
        self.inner.running.send_replace(true);
        Ok(())
    }
}

#[async_trait]
impl ProcessController for FakeEngine {
    type Error = FakeError;

    async fn start_stand_alone(&self) -> Result<(), FakeError> {
        self.start(Event::StartStandAlone)
    }

    async fn start_join(&self) -> Result<EngineHandle, FakeError> {
        self.start(Event::StartJoin)?;
        Ok(EngineHandle::new(StartMode::Join, 4242))
    }

    async fn start_bootstrap(&self) -> Result<EngineHandle, FakeError> {
        self.start(Event::StartBootstrap)?;
        Ok(EngineHandle::new(StartMode::Bootstrap, 4242))
    }

    async fn stop(&self) -> Result<(), FakeError> {
        self.journal.record(Event::Stop);
        if self.inner.fail_stop.load(Ordering::SeqCst) {
            return Err(FakeError("mysqld did not exit"));
        }
        self.inner.running.send_replace(false);
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        let probes = self.inner.probes.fetch_add(1, Ordering::SeqCst) + 1;
        match *self.inner.reachable.lock().unwrap() {
            Reachable::Immediately => true,
            Reachable::AfterProbes(n) => probes > n,
            Reachable::Never => false,
        }
    }

    async fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    async fn wait(&self) {
        let mut running = self.inner.running.subscribe();
        let _ = running.wait_for(|running| !running).await;
    }
}

/// Returns a fixed set of peer outcomes, optionally after a delay.
#[derive(Clone, Debug)]
pub struct ScriptedHealth {
    checks: Arc<AtomicUsize>,
    delay: Duration,
    peers: Vec<PeerStatus>,
}

impl ScriptedHealth {
    pub fn new(healthy: usize, unhealthy: usize) -> Self {
        let peers = (0..healthy)
            .map(|i| PeerStatus {
                address: format!("peer{}", i + 1),
                health: PeerHealth::Healthy,
            })
            .chain((0..unhealthy).map(|i| PeerStatus {
                address: format!("peer{}", healthy + i + 1),
                health: PeerHealth::Unhealthy("connection refused".to_string()),
            }))
            .collect();

        Self {
            checks: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            peers,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealth {
    async fn check_peers(&self) -> HealthSnapshot {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        HealthSnapshot::from_peers(self.peers.clone())
    }
}

#[derive(Clone, Debug)]
pub struct FakeUpgrader {
    fail: bool,
    journal: Journal,
    needed: bool,
}

impl FakeUpgrader {
    pub fn new(journal: Journal) -> Self {
        Self {
            fail: false,
            journal,
            needed: false,
        }
    }

    pub fn needed(mut self) -> Self {
        self.needed = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Upgrader for FakeUpgrader {
    type Error = FakeError;

    async fn needs_upgrade(&self) -> Result<bool, FakeError> {
        Ok(self.needed)
    }

    async fn run_upgrade(&self) -> Result<String, FakeError> {
        self.journal.record(Event::RunUpgrade);
        if self.fail {
            Err(FakeError("Table 'mysql.user' needs repair"))
        } else {
            Ok("mysql.user OK".to_string())
        }
    }
}

/// Seeder and post-start SQL in one.
#[derive(Clone, Debug)]
pub struct FakeHooks {
    fail: bool,
    journal: Journal,
}

impl FakeHooks {
    pub fn new(journal: Journal) -> Self {
        Self {
            fail: false,
            journal,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Seeder for FakeHooks {
    type Error = FakeError;

    async fn needs_seed(&self) -> bool {
        true
    }

    async fn seed(&self) -> Result<(), FakeError> {
        self.journal.record(Event::Seed);
        if self.fail {
            return Err(FakeError("access denied"));
        }
        Ok(())
    }
}

#[async_trait]
impl PostStartSql for FakeHooks {
    type Error = FakeError;

    async fn run_post_start_sql(&self) -> Result<(), FakeError> {
        self.journal.record(Event::PostStartSql);
        if self.fail {
            return Err(FakeError("syntax error"));
        }
        Ok(())
    }
}

/// A memory store that also journals its saves.
#[derive(Clone, Debug)]
pub struct JournaledStore {
    inner: MemoryNodeStateStore,
    journal: Journal,
}

impl JournaledStore {
    pub fn new(inner: MemoryNodeStateStore, journal: Journal) -> Self {
        Self { inner, journal }
    }
}

#[async_trait]
impl NodeStateStore for JournaledStore {
    type Error = galera_node_state_memory::Error;

    async fn load_state(&self) -> Result<Option<PersistedState>, Self::Error> {
        self.inner.load_state().await
    }

    async fn save(&self, role: NodeRole) -> Result<(), Self::Error> {
        self.inner.save(role).await?;
        self.journal.record(Event::Save(role));
        Ok(())
    }
}

pub type TestOrchestrator =
    StartOrchestrator<FakeEngine, ScriptedHealth, JournaledStore, FakeUpgrader, FakeHooks, FakeHooks>;

/// Test fixture: every collaborator, sharing one journal.
pub struct Harness {
    pub engine: FakeEngine,
    pub health: ScriptedHealth,
    pub hooks: FakeHooks,
    pub journal: Journal,
    pub policy: DecisionPolicy,
    pub reachability: ReachabilityOptions,
    pub store: MemoryNodeStateStore,
    pub upgrader: FakeUpgrader,
}

impl Harness {
    /// A node with `role` persisted and the given peer health.
    pub fn new(role: Option<NodeRole>, healthy: usize, unhealthy: usize) -> Self {
        let journal = Journal::default();

        Self {
            engine: FakeEngine::new(journal.clone()),
            health: ScriptedHealth::new(healthy, unhealthy),
            hooks: FakeHooks::new(journal.clone()),
            policy: DecisionPolicy::default(),
            reachability: ReachabilityOptions {
                deadline: Duration::from_secs(30),
                poll_interval: Duration::from_secs(1),
            },
            store: role.map_or_else(MemoryNodeStateStore::new, MemoryNodeStateStore::with_role),
            upgrader: FakeUpgrader::new(journal.clone()),
            journal,
        }
    }

    pub fn build(&self) -> Arc<TestOrchestrator> {
        Arc::new(StartOrchestrator::new(StartOrchestratorOptions {
            engine: self.engine.clone(),
            health_checker: self.health.clone(),
            policy: self.policy,
            post_start: self.hooks.clone(),
            reachability: self.reachability,
            seeder: self.hooks.clone(),
            state_store: JournaledStore::new(self.store.clone(), self.journal.clone()),
            upgrader: self.upgrader.clone(),
        }))
    }
}

/// Waits until the orchestrator reaches `target`.
pub async fn wait_for_state(orchestrator: &TestOrchestrator, target: OrchestratorState) {
    let mut states = orchestrator.subscribe();
    states
        .wait_for(|state| *state == target)
        .await
        .expect("orchestrator dropped");
}
