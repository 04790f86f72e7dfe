//! Cluster quorum health check: how many configured peers are alive right now.
//!
//! Every peer is probed concurrently with a bounded fan-out. Each probe has
//! its own timeout and the whole check has a ceiling, so one unreachable
//! peer cannot stall the caller. Anything short of a definitive healthy
//! answer counts as unhealthy.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod probe;

pub use error::Error;
pub use probe::{HttpProbe, PeerProbe, TcpProbe};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default timeout for a single peer probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default ceiling for a whole check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of probes in flight at once.
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 8;

/// Result of probing one peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerHealth {
    /// The peer answered as healthy.
    Healthy,

    /// The peer failed, refused or did not answer in time.
    Unhealthy(String),
}

/// Health of one configured peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerStatus {
    /// The peer address as configured.
    pub address: String,

    /// The probe outcome.
    pub health: PeerHealth,
}

/// Point-in-time view of peer health. Produced fresh for every decision and
/// never persisted.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    /// When the check finished.
    pub checked_at: DateTime<Utc>,

    /// Number of peers that answered as healthy.
    pub healthy_count: usize,

    /// Per-peer outcome, in configuration order.
    pub peers: Vec<PeerStatus>,

    /// Number of configured peers.
    pub total: usize,
}

impl HealthSnapshot {
    /// Builds a snapshot from per-peer outcomes.
    #[must_use]
    pub fn from_peers(peers: Vec<PeerStatus>) -> Self {
        let healthy_count = peers
            .iter()
            .filter(|p| p.health == PeerHealth::Healthy)
            .count();

        Self {
            checked_at: Utc::now(),
            healthy_count,
            total: peers.len(),
            peers,
        }
    }

    /// Returns true if at least one peer is healthy.
    #[must_use]
    pub const fn any_healthy(&self) -> bool {
        self.healthy_count > 0
    }
}

/// Something that can report current peer health.
#[async_trait]
pub trait HealthCheck
where
    Self: Send + Sync + 'static,
{
    /// Probes every configured peer once and reports the aggregate.
    async fn check_peers(&self) -> HealthSnapshot;
}

/// Options for configuring a `QuorumHealthChecker`.
pub struct QuorumHealthCheckerOptions<P>
where
    P: PeerProbe,
{
    /// Ceiling for the whole check.
    pub check_timeout: Duration,

    /// Maximum number of probes in flight at once.
    pub max_concurrent_probes: usize,

    /// Peer addresses, excluding this node.
    pub peers: Vec<String>,

    /// The probe to run against each peer.
    pub probe: P,

    /// Timeout for a single probe.
    pub probe_timeout: Duration,
}

/// Probes a fixed set of peers.
pub struct QuorumHealthChecker<P>
where
    P: PeerProbe,
{
    check_timeout: Duration,
    max_concurrent_probes: usize,
    peers: Arc<[String]>,
    probe: Arc<P>,
    probe_timeout: Duration,
}

impl<P> QuorumHealthChecker<P>
where
    P: PeerProbe,
{
    /// Creates a new `QuorumHealthChecker`.
    #[must_use]
    pub fn new(
        QuorumHealthCheckerOptions {
            check_timeout,
            max_concurrent_probes,
            peers,
            probe,
            probe_timeout,
        }: QuorumHealthCheckerOptions<P>,
    ) -> Self {
        Self {
            check_timeout,
            max_concurrent_probes: max_concurrent_probes.max(1),
            peers: peers.into(),
            probe: Arc::new(probe),
            probe_timeout,
        }
    }

    /// Returns the configured peers.
    #[must_use]
    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

#[async_trait]
impl<P> HealthCheck for QuorumHealthChecker<P>
where
    P: PeerProbe,
{
    async fn check_peers(&self) -> HealthSnapshot {
        if self.peers.is_empty() {
            debug!("no peers configured");
            return HealthSnapshot::from_peers(Vec::new());
        }

        let deadline = Instant::now() + self.check_timeout;
        let permits = Arc::new(Semaphore::new(self.max_concurrent_probes));
        let mut probes = JoinSet::new();

        for (index, peer) in self.peers.iter().enumerate() {
            let peer = peer.clone();
            let permits = Arc::clone(&permits);
            let probe = Arc::clone(&self.probe);
            let probe_timeout = self.probe_timeout;

            probes.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, Err(Error::Cancelled));
                };

                let result = tokio::time::timeout(probe_timeout, probe.probe(&peer))
                    .await
                    .unwrap_or(Err(Error::Timeout(probe_timeout)));

                (index, result)
            });
        }

        let mut outcomes: Vec<Option<Result<(), Error>>> =
            std::iter::repeat_with(|| None).take(self.peers.len()).collect();

        loop {
            match tokio::time::timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok((index, result)))) => outcomes[index] = Some(result),
                Ok(Some(Err(e))) => warn!("peer probe task failed: {e}"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "peer health check hit its {:?} ceiling with {} probes outstanding",
                        self.check_timeout,
                        probes.len()
                    );
                    probes.abort_all();
                    while probes.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let peers = self
            .peers
            .iter()
            .zip(outcomes)
            .map(|(address, outcome)| {
                let health = match outcome {
                    Some(Ok(())) => PeerHealth::Healthy,
                    Some(Err(e)) => PeerHealth::Unhealthy(e.to_string()),
                    None => PeerHealth::Unhealthy("no answer before check ceiling".to_string()),
                };
                if let PeerHealth::Unhealthy(reason) = &health {
                    debug!("peer {address} unhealthy: {reason}");
                }

                PeerStatus {
                    address: address.clone(),
                    health,
                }
            })
            .collect();

        let snapshot = HealthSnapshot::from_peers(peers);
        info!(
            "{} of {} peers healthy",
            snapshot.healthy_count, snapshot.total
        );

        snapshot
    }
}
