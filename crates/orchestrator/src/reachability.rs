use std::time::Duration;

use galera_engine::ProcessController;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default delay between reachability probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time the engine has to become reachable after launch.
pub const DEFAULT_REACHABILITY_DEADLINE: Duration = Duration::from_secs(600);

/// How reachability is polled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReachabilityOptions {
    /// Hard deadline, measured from the first probe.
    pub deadline: Duration,

    /// Delay between probes.
    pub poll_interval: Duration,
}

impl Default for ReachabilityOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_REACHABILITY_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome of waiting for the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reachability {
    /// The engine answered.
    Reachable,

    /// Shutdown was requested first.
    Cancelled,

    /// The deadline passed first.
    TimedOut,
}

/// Polls `engine.is_reachable()` on a fixed interval until it succeeds, the
/// deadline passes or `cancel` fires. A probe still in flight at the deadline
/// is abandoned.
pub async fn wait_reachable<C>(
    engine: &C,
    options: &ReachabilityOptions,
    cancel: &CancellationToken,
) -> Reachability
where
    C: ProcessController,
{
    let deadline = Instant::now() + options.deadline;

    let poll = async {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if engine.is_reachable().await {
                trace!("engine reachable after {attempts} probes");
                return;
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Reachability::Cancelled,
        result = tokio::time::timeout_at(deadline, poll) => match result {
            Ok(()) => Reachability::Reachable,
            Err(_) => Reachability::TimedOut,
        },
    }
}
