//! In-memory node state, for tests and dry runs.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::sync::Arc;

use async_trait::async_trait;
use galera_node_state::{NodeRole, NodeStateStore, PersistedState};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    fail_saves: bool,
    saves: Vec<NodeRole>,
    state: Option<PersistedState>,
}

/// In-memory node state store. Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct MemoryNodeStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryNodeStateStore {
    /// Creates an empty store, as on a node's first boot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `role`.
    #[must_use]
    pub fn with_role(role: NodeRole) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: Some(PersistedState::new(role)),
                ..Inner::default()
            })),
        }
    }

    /// Makes subsequent saves fail (or succeed again).
    pub async fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().await.fail_saves = fail;
    }

    /// Returns every role successfully saved, oldest first.
    pub async fn saved_roles(&self) -> Vec<NodeRole> {
        self.inner.lock().await.saves.clone()
    }
}

#[async_trait]
impl NodeStateStore for MemoryNodeStateStore {
    type Error = Error;

    async fn load_state(&self) -> Result<Option<PersistedState>, Self::Error> {
        Ok(self.inner.lock().await.state.clone())
    }

    async fn save(&self, role: NodeRole) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        if inner.fail_saves {
            return Err(Error::SaveRejected);
        }

        inner.state = Some(PersistedState::new(role));
        inner.saves.push(role);

        Ok(())
    }
}
