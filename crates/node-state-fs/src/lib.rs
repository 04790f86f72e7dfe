//! Node state persisted as a single file on local disk.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use galera_node_state::{NodeRole, NodeStateStore, PersistedState};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Node state stored in one file, replaced atomically on every save.
///
/// A save writes the full record to a sibling temporary file, syncs it,
/// renames it over the record and finally syncs the parent directory. A
/// crash before the rename leaves the previous record untouched; a stale
/// temporary file is simply overwritten by the next save.
#[derive(Clone, Debug)]
pub struct FsNodeStateStore {
    path: PathBuf,
}

impl FsNodeStateStore {
    /// Creates a store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the state record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the temporary file used while saving.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("state"), ToOwned::to_owned);
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn sync_parent(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };

        // Some filesystems refuse fsync on directories; the rename itself
        // has already happened at this point.
        match fs::File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    warn!("failed to sync state directory {}: {e}", parent.display());
                }
            }
            Err(e) => warn!("failed to open state directory {}: {e}", parent.display()),
        }
    }
}

#[async_trait]
impl NodeStateStore for FsNodeStateStore {
    type Error = Error;

    async fn load_state(&self) -> Result<Option<PersistedState>, Self::Error> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(PersistedState::decode(&bytes)?)),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading state file", e)),
        }
    }

    async fn save(&self, role: NodeRole) -> Result<(), Self::Error> {
        let bytes = PersistedState::new(role).encode()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Io("error creating state directory", e))?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Io("error creating temporary state file", e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::Io("error writing temporary state file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io("error syncing temporary state file", e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::Io("error replacing state file", e))?;

        self.sync_parent().await;

        debug!(%role, path = %self.path.display(), "saved node state");

        Ok(())
    }
}
