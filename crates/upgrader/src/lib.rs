//! Schema upgrades gated on the data directory's version marker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use galera_engine::Upgrader;
use galera_process::ProcessOptions;
use regex::Regex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File the engine leaves in its data directory after an upgrade.
pub const UPGRADE_MARKER: &str = "mysql_upgrade_info";

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bVer\s+(\S+)").expect("Invalid regex pattern"));

/// Options for configuring `MysqlUpgrader`.
#[derive(Clone, Debug)]
pub struct MysqlUpgraderOptions {
    /// The engine's data directory.
    pub data_dir: PathBuf,

    /// Version the data should be at. Read from `mysqld --version` when unset.
    pub expected_version: Option<String>,

    /// Client defaults file passed to the upgrade command.
    pub login_defaults_file: PathBuf,

    /// Path to `mysqld`, for `--version`.
    pub mysqld_path: PathBuf,

    /// The upgrade command, e.g. `mysql_upgrade`.
    pub upgrade_path: PathBuf,
}

/// Runs an external upgrade command when the version marker is stale.
#[derive(Clone, Debug)]
pub struct MysqlUpgrader {
    data_dir: PathBuf,
    expected_version: Option<String>,
    login_defaults_file: PathBuf,
    mysqld_path: PathBuf,
    upgrade_path: PathBuf,
}

impl MysqlUpgrader {
    /// Creates a new instance of `MysqlUpgrader`.
    #[must_use]
    pub fn new(
        MysqlUpgraderOptions {
            data_dir,
            expected_version,
            login_defaults_file,
            mysqld_path,
            upgrade_path,
        }: MysqlUpgraderOptions,
    ) -> Self {
        Self {
            data_dir,
            expected_version,
            login_defaults_file,
            mysqld_path,
            upgrade_path,
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.data_dir.join(UPGRADE_MARKER)
    }

    // An empty data dir is initialised by the engine itself at the current
    // version, so there is nothing to upgrade.
    fn is_initialized(&self) -> bool {
        self.data_dir.join("mysql").is_dir()
    }

    async fn expected_version(&self) -> Result<String, Error> {
        if let Some(ref version) = self.expected_version {
            return Ok(version.clone());
        }

        let options = ProcessOptions::new(&self.mysqld_path, ["--version"]);
        let output = galera_process::run(&options, None).await?;

        parse_version(&output.stdout)
            .map(ToOwned::to_owned)
            .ok_or(Error::UnknownVersion(output.stdout))
    }

    async fn stored_version(&self) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.marker_path()).await {
            Ok(contents) => Ok(Some(
                contents
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string(),
            )),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("failed to read upgrade marker", e)),
        }
    }

    async fn write_marker(&self, version: &str) -> Result<(), Error> {
        let path = self.marker_path();
        let temp_path = path.with_file_name(format!("{UPGRADE_MARKER}.tmp"));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Io("failed to create upgrade marker", e))?;
        file.write_all(version.as_bytes())
            .await
            .map_err(|e| Error::Io("failed to write upgrade marker", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io("failed to sync upgrade marker", e))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Error::Io("failed to replace upgrade marker", e))
    }
}

/// Extracts the version from `mysqld --version` output.
fn parse_version(output: &str) -> Option<&str> {
    VERSION_REGEX
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[async_trait]
impl Upgrader for MysqlUpgrader {
    type Error = Error;

    async fn needs_upgrade(&self) -> Result<bool, Error> {
        if !self.is_initialized() {
            debug!("data directory not initialized, no upgrade needed");
            return Ok(false);
        }

        let expected = self.expected_version().await?;
        let needs_upgrade = match self.stored_version().await? {
            Some(stored) => {
                debug!(%stored, %expected, "compared upgrade marker");
                stored != expected
            }
            None => {
                debug!("no upgrade marker found");
                true
            }
        };

        Ok(needs_upgrade)
    }

    async fn run_upgrade(&self) -> Result<String, Error> {
        let expected = self.expected_version().await?;

        info!("upgrading data directory to {expected}");

        let options = ProcessOptions::new(
            &self.upgrade_path,
            [format!(
                "--defaults-file={}",
                self.login_defaults_file.display()
            )],
        );
        let output = galera_process::run(&options, None).await?;

        self.write_marker(&expected).await?;
        info!("upgrade completed");

        Ok(format!("{}{}", output.stdout, output.stderr))
    }
}
