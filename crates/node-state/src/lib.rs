//! Durable record of this node's last known cluster role.
//!
//! The role is the only piece of orchestration state that survives a restart,
//! and therefore the only thing that lets a node recognise that it already
//! belonged to a cluster. Implementations of [`NodeStateStore`] must replace
//! the record atomically.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// This node's belief about cluster membership.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Never completed a start; nothing suggests a cluster exists.
    NeedsBootstrap,

    /// Last ran without replication (maintenance or single-node deployment).
    SingleNode,

    /// Successfully bootstrapped or joined a cluster and became reachable.
    Clustered,
}

impl NodeRole {
    /// Returns the canonical string form used in the state record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NeedsBootstrap => "needs_bootstrap",
            Self::SingleNode => "single_node",
            Self::Clustered => "clustered",
        }
    }
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    /// Accepts both the canonical form and the legacy upper-case form
    /// (`NEEDS_BOOTSTRAP`, `SINGLE_NODE`, `CLUSTERED`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "needs_bootstrap" => Ok(Self::NeedsBootstrap),
            "single_node" => Ok(Self::SingleNode),
            "clustered" => Ok(Self::Clustered),
            _ => Err(Error::UnknownRole(s.trim().to_string())),
        }
    }
}

/// The persisted record: a role and when it was committed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PersistedState {
    /// The committed role.
    pub role: NodeRole,

    /// When the role was committed. Records in the legacy plain-text format
    /// carry no timestamp and decode with the Unix epoch.
    pub updated_at: DateTime<Utc>,
}

impl PersistedState {
    /// Creates a record for `role` stamped with the current time.
    #[must_use]
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            updated_at: Utc::now(),
        }
    }

    /// Serializes the record to its on-disk form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parses a record from its on-disk form.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are neither a JSON record nor a legacy
    /// plain-text role.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes).map_err(|_| Error::NotUtf8)?;
        let text = text.trim();

        if text.starts_with('{') {
            return Ok(serde_json::from_str(text)?);
        }

        Ok(Self {
            role: text.parse()?,
            updated_at: DateTime::<Utc>::default(),
        })
    }
}

/// Durable storage for the node role.
#[async_trait]
pub trait NodeStateStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this store.
    type Error: Debug + std::error::Error + Send + Sync + 'static;

    /// Reads the current record, `None` if none was ever written.
    async fn load_state(&self) -> Result<Option<PersistedState>, Self::Error>;

    /// Atomically replaces the record with `role`. A crash at any point must
    /// leave either the previous record or the new one, never a partial one.
    async fn save(&self, role: NodeRole) -> Result<(), Self::Error>;

    /// Reads the current role, falling back to [`NodeRole::NeedsBootstrap`]
    /// when there is no record or it cannot be read.
    async fn load(&self) -> NodeRole {
        match self.load_state().await {
            Ok(Some(state)) => {
                debug!(role = %state.role, updated_at = %state.updated_at, "loaded node state");
                state.role
            }
            Ok(None) => {
                debug!("no node state recorded, assuming first boot");
                NodeRole::NeedsBootstrap
            }
            Err(e) => {
                warn!("unreadable node state, assuming {}: {e}", NodeRole::NeedsBootstrap);
                NodeRole::NeedsBootstrap
            }
        }
    }
}
