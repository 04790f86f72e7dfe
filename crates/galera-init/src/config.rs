//! YAML configuration for `galera-init`.

use crate::error::{Error, Result};

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use galera_mysqld::{MysqldOptions, PreseededDatabase};
use galera_orchestrator::{DecisionPolicy, ReachabilityOptions};
use galera_quorum::{
    DEFAULT_CHECK_TIMEOUT, DEFAULT_MAX_CONCURRENT_PROBES, DEFAULT_PROBE_TIMEOUT, PeerProbe,
    QuorumHealthCheckerOptions,
};
use galera_upgrader::MysqlUpgraderOptions;
use serde::{Deserialize, Serialize};

/// How peers are probed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// `GET /` against a galera-healthcheck endpoint.
    #[default]
    Http,

    /// A bare TCP connect.
    Tcp,
}

/// The whole configuration file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine binaries, files and SQL hooks.
    #[serde(default)]
    pub db: DbConfig,

    /// Cluster membership, timing and start policy.
    #[serde(default)]
    pub manager: ManagerConfig,
}

/// The `manager` section.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Ceiling for one round of peer probes.
    pub check_timeout_secs: u64,

    /// Bootstrap even though this node was clustered and no peer answers.
    pub force_bootstrap: bool,

    /// Port probed on every peer.
    pub health_check_port: u16,

    /// Probes in flight at once.
    pub max_concurrent_probes: usize,

    /// Other cluster members, excluding this node.
    pub peers: Vec<String>,

    /// How peers are probed.
    pub probe: ProbeKind,

    /// Timeout for a single probe.
    pub probe_timeout_secs: u64,

    /// Time the engine has to become reachable after launch.
    pub reachability_deadline_secs: u64,

    /// Delay between reachability probes.
    pub reachability_poll_interval_secs: u64,

    /// This node is the whole cluster.
    pub single_node: bool,

    /// Start with replication disabled, for maintenance.
    pub stand_alone: bool,

    /// Where the node role is persisted.
    pub state_file: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let reachability = ReachabilityOptions::default();

        Self {
            check_timeout_secs: DEFAULT_CHECK_TIMEOUT.as_secs(),
            force_bootstrap: false,
            health_check_port: 9200,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            peers: Vec::new(),
            probe: ProbeKind::Http,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            reachability_deadline_secs: reachability.deadline.as_secs(),
            reachability_poll_interval_secs: reachability.poll_interval.as_secs(),
            single_node: false,
            stand_alone: false,
            state_file: PathBuf::from("/var/lib/galera-init/node-state.json"),
        }
    }
}

/// The `db` section.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// The engine's data directory.
    pub data_dir: PathBuf,

    /// Option file passed to `mysqld`.
    pub defaults_file: PathBuf,

    /// Version the data directory should be at; read from `mysqld --version` if unset.
    pub expected_version: Option<String>,

    /// Option file with administrative credentials for the clients.
    pub login_defaults_file: PathBuf,

    /// The `mysql` client.
    pub mysql_path: PathBuf,

    /// The `mysqladmin` client.
    pub mysqladmin_path: PathBuf,

    /// The server binary.
    pub mysqld_path: PathBuf,

    /// SQL files run, in order, after every successful start.
    pub post_start_sql_files: Vec<PathBuf>,

    /// Databases and users created after start.
    pub preseeded_databases: Vec<PreseededDatabase>,

    /// Timeout for a single client query.
    pub query_timeout_secs: u64,

    /// Drop the default `test` databases after start.
    pub remove_test_databases: bool,

    /// Time the engine has to exit after a shutdown request.
    pub stop_timeout_secs: u64,

    /// Upgrade command run against a stale data directory.
    pub upgrade_path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/mysql"),
            defaults_file: PathBuf::from("/etc/mysql/my.cnf"),
            expected_version: None,
            login_defaults_file: PathBuf::from("/etc/mysql/debian.cnf"),
            mysql_path: PathBuf::from("/usr/bin/mysql"),
            mysqladmin_path: PathBuf::from("/usr/bin/mysqladmin"),
            mysqld_path: PathBuf::from("/usr/sbin/mysqld"),
            post_start_sql_files: Vec::new(),
            preseeded_databases: Vec::new(),
            query_timeout_secs: 10,
            remove_test_databases: false,
            stop_timeout_secs: 60,
            upgrade_path: PathBuf::from("/usr/bin/mysql_upgrade"),
        }
    }
}

impl Config {
    /// Reads and parses `path`. Validation is separate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Io("failed to read config file", e))?;

        Self::parse(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if `contents` does not describe a `Config`.
    pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Rejects configurations the node cannot start with.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let db = &self.db;
        let manager = &self.manager;

        for (name, path) in [
            ("db.defaults_file", &db.defaults_file),
            ("db.login_defaults_file", &db.login_defaults_file),
            ("db.mysql_path", &db.mysql_path),
            ("db.mysqladmin_path", &db.mysqladmin_path),
            ("db.mysqld_path", &db.mysqld_path),
            ("db.upgrade_path", &db.upgrade_path),
            ("db.data_dir", &db.data_dir),
            ("manager.state_file", &manager.state_file),
        ] {
            if path.as_os_str().is_empty() {
                return invalid(format!("{name} must not be empty"));
            }
        }

        for (name, secs) in [
            ("db.query_timeout_secs", db.query_timeout_secs),
            ("db.stop_timeout_secs", db.stop_timeout_secs),
            ("manager.check_timeout_secs", manager.check_timeout_secs),
            ("manager.probe_timeout_secs", manager.probe_timeout_secs),
            (
                "manager.reachability_deadline_secs",
                manager.reachability_deadline_secs,
            ),
            (
                "manager.reachability_poll_interval_secs",
                manager.reachability_poll_interval_secs,
            ),
        ] {
            if secs == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }

        if manager.probe_timeout_secs > manager.check_timeout_secs {
            return invalid(format!(
                "manager.probe_timeout_secs ({}) exceeds manager.check_timeout_secs ({})",
                manager.probe_timeout_secs, manager.check_timeout_secs
            ));
        }

        if manager.reachability_poll_interval_secs > manager.reachability_deadline_secs {
            return invalid(format!(
                "manager.reachability_poll_interval_secs ({}) exceeds manager.reachability_deadline_secs ({})",
                manager.reachability_poll_interval_secs, manager.reachability_deadline_secs
            ));
        }

        if manager.max_concurrent_probes == 0 {
            return invalid("manager.max_concurrent_probes must be greater than zero".into());
        }

        let mut seen = HashSet::new();
        for peer in &manager.peers {
            if peer.trim().is_empty() {
                return invalid("manager.peers contains an empty address".into());
            }
            if !is_bare_host(peer) {
                return invalid(format!(
                    "manager.peers entry {peer} must be a bare host or IP; \
                     the port comes from manager.health_check_port"
                ));
            }
            if !seen.insert(peer.as_str()) {
                return invalid(format!("manager.peers lists {peer} more than once"));
            }
        }

        if manager.single_node && !manager.peers.is_empty() {
            return invalid("manager.single_node cannot be combined with manager.peers".into());
        }

        for database in &db.preseeded_databases {
            if database.db_name.is_empty() {
                return invalid("db.preseeded_databases entry has an empty db_name".into());
            }
            if database.user.is_empty() {
                return invalid(format!(
                    "db.preseeded_databases entry {} has an empty user",
                    database.db_name
                ));
            }
        }

        Ok(())
    }

    /// The start policy, with command-line overrides OR-ed in.
    #[must_use]
    pub const fn policy(&self, force_bootstrap: bool, stand_alone: bool) -> DecisionPolicy {
        DecisionPolicy {
            force_bootstrap: self.manager.force_bootstrap || force_bootstrap,
            single_node: self.manager.single_node,
            stand_alone: self.manager.stand_alone || stand_alone,
        }
    }

    /// Options for the engine controller.
    #[must_use]
    pub fn mysqld_options(&self) -> MysqldOptions {
        let db = &self.db;

        MysqldOptions {
            defaults_file: db.defaults_file.clone(),
            login_defaults_file: db.login_defaults_file.clone(),
            mysql_path: db.mysql_path.clone(),
            mysqladmin_path: db.mysqladmin_path.clone(),
            mysqld_path: db.mysqld_path.clone(),
            post_start_sql_files: db.post_start_sql_files.clone(),
            preseeded_databases: db.preseeded_databases.clone(),
            query_timeout: Duration::from_secs(db.query_timeout_secs),
            remove_test_databases: db.remove_test_databases,
            stop_timeout: Duration::from_secs(db.stop_timeout_secs),
        }
    }

    /// Options for the upgrade check.
    #[must_use]
    pub fn upgrader_options(&self) -> MysqlUpgraderOptions {
        let db = &self.db;

        MysqlUpgraderOptions {
            data_dir: db.data_dir.clone(),
            expected_version: db.expected_version.clone(),
            login_defaults_file: db.login_defaults_file.clone(),
            mysqld_path: db.mysqld_path.clone(),
            upgrade_path: db.upgrade_path.clone(),
        }
    }

    /// Options for the peer health checker, probing with `probe`.
    #[must_use]
    pub fn health_checker_options<P>(&self, probe: P) -> QuorumHealthCheckerOptions<P>
    where
        P: PeerProbe,
    {
        QuorumHealthCheckerOptions {
            check_timeout: Duration::from_secs(self.manager.check_timeout_secs),
            max_concurrent_probes: self.manager.max_concurrent_probes,
            peers: self.manager.peers.clone(),
            probe,
            probe_timeout: Duration::from_secs(self.manager.probe_timeout_secs),
        }
    }

    /// How reachability is polled after launch.
    #[must_use]
    pub const fn reachability_options(&self) -> ReachabilityOptions {
        ReachabilityOptions {
            deadline: Duration::from_secs(self.manager.reachability_deadline_secs),
            poll_interval: Duration::from_secs(self.manager.reachability_poll_interval_secs),
        }
    }
}

/// A hostname, IPv4 or unbracketed IPv6 address, with no port or scheme.
fn is_bare_host(peer: &str) -> bool {
    peer.parse::<IpAddr>().is_ok() || !peer.contains([':', '[', ']', '/'])
}

fn invalid(message: String) -> Result<()> {
    Err(Error::InvalidConfig(message))
}
