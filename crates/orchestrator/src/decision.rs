//! Start-mode policy.
//!
//! A healthy peer is proof that a cluster exists, so it always means join.
//! With no healthy peer, only a node that has never been part of a cluster
//! may bootstrap on its own; anything else needs an operator to decide.

use galera_engine::StartMode;
use galera_node_state::NodeRole;
use galera_quorum::HealthSnapshot;

use crate::Error;

/// Operator overrides that feed into the decision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecisionPolicy {
    /// Resolve the ambiguous case (cluster member, no healthy peer) to
    /// bootstrap. Never overrides a healthy peer.
    pub force_bootstrap: bool,

    /// This node is the whole cluster: bootstrap on every start and record
    /// `SingleNode`.
    pub single_node: bool,

    /// Start without replication for maintenance.
    pub stand_alone: bool,
}

/// The chosen start mode and why.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartDecision {
    /// How to start the engine.
    pub mode: StartMode,

    /// Human-readable reason, for the logs.
    pub rationale: String,

    /// Role recorded once the engine is reachable.
    pub target_role: NodeRole,
}

impl StartDecision {
    fn new(mode: StartMode, target_role: NodeRole, rationale: impl Into<String>) -> Self {
        Self {
            mode,
            rationale: rationale.into(),
            target_role,
        }
    }
}

/// Picks the start mode from the persisted role and a fresh health snapshot.
///
/// # Errors
///
/// Returns [`Error::AmbiguousQuorum`] if the node was clustered (or ran as
/// single node) before, no peer is healthy and bootstrap is not forced.
pub fn decide(
    role: NodeRole,
    snapshot: &HealthSnapshot,
    policy: &DecisionPolicy,
) -> Result<StartDecision, Error> {
    if policy.stand_alone {
        return Ok(StartDecision::new(
            StartMode::StandAlone,
            NodeRole::SingleNode,
            "stand-alone maintenance start requested",
        ));
    }

    if snapshot.healthy_count > 0 {
        return Ok(StartDecision::new(
            StartMode::Join,
            NodeRole::Clustered,
            format!(
                "{} of {} peers healthy, joining existing cluster",
                snapshot.healthy_count, snapshot.total
            ),
        ));
    }

    if policy.single_node {
        return Ok(StartDecision::new(
            StartMode::Bootstrap,
            NodeRole::SingleNode,
            "single-node deployment",
        ));
    }

    match role {
        NodeRole::NeedsBootstrap => Ok(StartDecision::new(
            StartMode::Bootstrap,
            NodeRole::Clustered,
            format!(
                "no cluster history and none of {} peers healthy",
                snapshot.total
            ),
        )),
        NodeRole::Clustered | NodeRole::SingleNode if policy.force_bootstrap => {
            Ok(StartDecision::new(
                StartMode::Bootstrap,
                NodeRole::Clustered,
                format!(
                    "persisted role {role}, none of {} peers healthy, bootstrap forced by operator",
                    snapshot.total
                ),
            ))
        }
        NodeRole::Clustered | NodeRole::SingleNode => Err(Error::AmbiguousQuorum {
            role,
            total: snapshot.total,
        }),
    }
}
