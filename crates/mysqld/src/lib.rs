//! Drives a MySQL/Galera engine through `mysqld`, `mysqladmin` and `mysql`.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod log;
mod sql;

pub use error::Error;
pub use log::MysqldOutput;
pub use sql::PreseededDatabase;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use galera_engine::{EngineHandle, PostStartSql, ProcessController, Seeder, StartMode};
use galera_process::{ManagedProcess, ProcessOptions, Signal};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// How often liveness is polled while waiting on a daemonized engine.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive failed `mysqladmin status` checks before a daemonized engine
/// counts as exited.
const STATUS_FAILURES_BEFORE_EXIT: u32 = 3;

/// The engine process this controller is responsible for.
#[derive(Clone, Debug)]
enum Engine {
    None,
    StandAlone,
    Child(Arc<ManagedProcess>),
}

/// Options for configuring `Mysqld`.
#[derive(Clone, Debug)]
pub struct MysqldOptions {
    /// The `my.cnf` passed to mysqld.
    pub defaults_file: PathBuf,

    /// The defaults file holding client credentials and socket, passed to
    /// mysqladmin and mysql.
    pub login_defaults_file: PathBuf,

    /// Path to the `mysql` client.
    pub mysql_path: PathBuf,

    /// Path to `mysqladmin`.
    pub mysqladmin_path: PathBuf,

    /// Path to `mysqld`.
    pub mysqld_path: PathBuf,

    /// SQL files executed after every successful start, in order.
    pub post_start_sql_files: Vec<PathBuf>,

    /// Databases and users created on every start.
    pub preseeded_databases: Vec<PreseededDatabase>,

    /// Upper bound for a single client query.
    pub query_timeout: Duration,

    /// Whether to drop the default `test` databases after start.
    pub remove_test_databases: bool,

    /// How long a graceful shutdown may take before it is an error.
    pub stop_timeout: Duration,
}

/// A MySQL/Galera engine.
///
/// Owns at most one engine process at a time. Stopping never force-kills:
/// the engine gets `mysqladmin shutdown` (or `SIGTERM` when the admin
/// command cannot reach a child that is still starting) and a deadline.
#[derive(Clone, Debug)]
pub struct Mysqld {
    engine: Arc<Mutex<Engine>>,
    options: Arc<MysqldOptions>,
}

impl Mysqld {
    /// Creates a new instance of `Mysqld`.
    #[must_use]
    pub fn new(options: MysqldOptions) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine::None)),
            options: Arc::new(options),
        }
    }

    fn defaults_arg(&self) -> String {
        format!("--defaults-file={}", self.options.defaults_file.display())
    }

    fn login_arg(&self) -> String {
        format!(
            "--defaults-file={}",
            self.options.login_defaults_file.display()
        )
    }

    async fn admin(&self, command: &str) -> Result<(), galera_process::Error> {
        let options = ProcessOptions::new(
            &self.options.mysqladmin_path,
            [self.login_arg(), command.to_string()],
        );
        galera_process::run(&options, None).await.map(|_| ())
    }

    /// Runs `script` through the mysql client in batch mode, returning its
    /// stdout.
    async fn query(&self, script: &str) -> Result<String, galera_process::Error> {
        let options = ProcessOptions::new(
            &self.options.mysql_path,
            [
                self.login_arg(),
                "--batch".to_string(),
                "--skip-column-names".to_string(),
            ],
        );
        galera_process::run(&options, Some(script))
            .await
            .map(|output| output.stdout)
    }

    async fn query_variable(&self, statement: &str) -> Option<Option<String>> {
        match tokio::time::timeout(self.options.query_timeout, self.query(statement)).await {
            Ok(Ok(output)) => Some(sql::variable_value(&output).map(ToOwned::to_owned)),
            Ok(Err(e)) => {
                debug!("database not reachable: {e}");
                None
            }
            Err(_) => {
                debug!(
                    "database not reachable: query timed out after {:?}",
                    self.options.query_timeout
                );
                None
            }
        }
    }

    /// Spawns mysqld as a supervised child, refusing if one is already up.
    async fn start_child(&self, mode: StartMode, extra_args: &[&str]) -> Result<EngineHandle, Error> {
        let mut engine = self.engine.lock().await;
        match *engine {
            Engine::Child(ref process) if !process.has_exited() => {
                return Err(Error::AlreadyStarted);
            }
            Engine::StandAlone => return Err(Error::AlreadyStarted),
            _ => {}
        }

        let mut args = vec![self.defaults_arg()];
        args.extend(extra_args.iter().map(ToString::to_string));

        let options = ProcessOptions::new(&self.options.mysqld_path, args)
            .with_output(Arc::new(MysqldOutput));
        let process = galera_process::spawn(options)?;
        let handle = EngineHandle::new(mode, process.pid());

        info!("mysqld started in {mode} mode with pid {}", process.pid());
        *engine = Engine::Child(Arc::new(process));

        Ok(handle)
    }

    /// Liveness of an engine this controller did not spawn. False only after
    /// [`STATUS_FAILURES_BEFORE_EXIT`] failed status checks in a row.
    async fn daemon_is_running(&self) -> bool {
        for attempt in 1..=STATUS_FAILURES_BEFORE_EXIT {
            match tokio::time::timeout(self.options.query_timeout, self.admin("status")).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => debug!(
                    "mysqladmin status failed ({attempt}/{STATUS_FAILURES_BEFORE_EXIT}): {e}"
                ),
                Err(_) => debug!(
                    "mysqladmin status timed out ({attempt}/{STATUS_FAILURES_BEFORE_EXIT})"
                ),
            }

            if attempt < STATUS_FAILURES_BEFORE_EXIT {
                tokio::time::sleep(LIVENESS_POLL_INTERVAL).await;
            }
        }

        false
    }

    async fn wait_until_stopped(&self) {
        while self.daemon_is_running().await {
            tokio::time::sleep(LIVENESS_POLL_INTERVAL).await;
        }
    }

    /// Asks the engine to shut down and waits for it to exit, unbounded.
    async fn shut_down(&self, engine: Engine) -> Result<(), Error> {
        match engine {
            Engine::Child(process) => {
                if process.has_exited() {
                    debug!("mysqld already exited");
                    return Ok(());
                }

                if let Err(e) = self.admin("shutdown").await {
                    warn!("mysqladmin shutdown failed, sending SIGTERM: {e}");
                    process.signal(Signal::SIGTERM)?;
                }

                process.wait().await;
            }
            Engine::StandAlone | Engine::None => {
                self.admin("shutdown").await.map_err(Error::Shutdown)?;
                self.wait_until_stopped().await;
            }
        }

        Ok(())
    }

    async fn test_database_cleanup(&self) -> Result<(), Error> {
        info!("removing test databases");

        self.query(sql::REVOKE_TEST_DATABASES).await?;

        let output = self.query(sql::SHOW_TEST_DATABASES).await?;
        let names: Vec<&str> = output
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        if !names.is_empty() {
            debug!("dropping databases {names:?}");
            self.query(&sql::drop_databases_script(names)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ProcessController for Mysqld {
    type Error = Error;

    async fn start_stand_alone(&self) -> Result<(), Error> {
        let mut engine = self.engine.lock().await;
        if let Engine::Child(ref process) = *engine {
            if !process.has_exited() {
                return Err(Error::AlreadyStarted);
            }
        }

        info!("starting mysqld in stand-alone mode");

        let options = ProcessOptions::new(
            &self.options.mysqld_path,
            [
                self.defaults_arg().as_str(),
                "--wsrep-on=OFF",
                "--wsrep-desync=ON",
                "--wsrep-OSU-method=RSU",
                "--wsrep-provider=none",
                "--skip-networking",
                "--daemonize",
            ],
        );
        galera_process::run(&options, None).await?;
        *engine = Engine::StandAlone;

        Ok(())
    }

    async fn start_join(&self) -> Result<EngineHandle, Error> {
        info!("starting mysqld with 'join'");
        self.start_child(StartMode::Join, &[]).await
    }

    async fn start_bootstrap(&self) -> Result<EngineHandle, Error> {
        info!("starting mysqld with 'bootstrap'");
        self.start_child(StartMode::Bootstrap, &["--wsrep-new-cluster"])
            .await
    }

    async fn stop(&self) -> Result<(), Error> {
        let engine = self.engine.lock().await.clone();
        let stop_timeout = self.options.stop_timeout;

        info!("stopping mysqld");

        if let Ok(result) = tokio::time::timeout(stop_timeout, self.shut_down(engine)).await {
            result?;
        } else {
            error!("mysqld did not exit within {stop_timeout:?}");
            return Err(Error::StopTimeout(stop_timeout));
        }

        *self.engine.lock().await = Engine::None;
        info!("mysqld stopped");

        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        let Some(wsrep_on) = self.query_variable(sql::SHOW_WSREP_ON).await else {
            return false;
        };

        let wsrep_ready = if sql::is_reachable(wsrep_on.as_deref(), None) {
            None
        } else {
            match self.query_variable(sql::SHOW_WSREP_READY).await {
                Some(ready) => ready,
                None => return false,
            }
        };

        let reachable = sql::is_reachable(wsrep_on.as_deref(), wsrep_ready.as_deref());
        debug!(
            wsrep_on = wsrep_on.as_deref().unwrap_or("-"),
            wsrep_ready = wsrep_ready.as_deref().unwrap_or("-"),
            reachable,
            "checked database reachability"
        );

        reachable
    }

    async fn is_running(&self) -> bool {
        if let Engine::Child(ref process) = *self.engine.lock().await {
            return !process.has_exited();
        }

        self.daemon_is_running().await
    }

    async fn wait(&self) {
        let engine = self.engine.lock().await.clone();
        match engine {
            Engine::Child(process) => {
                process.wait().await;
            }
            Engine::StandAlone | Engine::None => {
                self.wait_until_stopped().await;
            }
        }
    }
}

#[async_trait]
impl Seeder for Mysqld {
    type Error = Error;

    async fn needs_seed(&self) -> bool {
        !self.options.preseeded_databases.is_empty()
    }

    async fn seed(&self) -> Result<(), Error> {
        if self.options.preseeded_databases.is_empty() {
            info!("no preseeded databases specified, skipping seeding");
            return Ok(());
        }

        info!(
            "preseeding {} databases",
            self.options.preseeded_databases.len()
        );
        self.query(&sql::seed_script(&self.options.preseeded_databases))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl PostStartSql for Mysqld {
    type Error = Error;

    async fn run_post_start_sql(&self) -> Result<(), Error> {
        info!("running post-start sql");

        for file in &self.options.post_start_sql_files {
            let script = match tokio::fs::read_to_string(file).await {
                Ok(script) => script,
                Err(e) => {
                    error!("error reading post-start sql file {}: {e}", file.display());
                    continue;
                }
            };

            self.query(&script)
                .await
                .map_err(|source| Error::PostStartSql {
                    file: file.clone(),
                    source,
                })?;
            debug!("executed {}", file.display());
        }

        if self.options.remove_test_databases {
            self.test_database_cleanup().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::{TempDir, tempdir};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Fake binaries: mysqld records its pid and sleeps, mysqladmin
    /// `shutdown` kills it, mysql logs its stdin and prints `mysql_output`.
    fn fake_engine(mysql_output: &str) -> (TempDir, Mysqld) {
        let dir = tempdir().unwrap();
        let d = dir.path().display();

        let mysqld = script(
            dir.path(),
            "mysqld",
            &format!("echo \"$@\" > {d}/mysqld.args\necho $$ > {d}/mysqld.pid\nexec sleep 30"),
        );
        let mysqladmin = script(
            dir.path(),
            "mysqladmin",
            &format!(
                "case \"$2\" in\n\
                 shutdown) kill $(cat {d}/mysqld.pid) ;;\n\
                 status) kill -0 $(cat {d}/mysqld.pid 2>/dev/null) 2>/dev/null ;;\n\
                 esac"
            ),
        );
        let mysql = script(
            dir.path(),
            "mysql",
            &format!("cat >> {d}/mysql.input\nprintf '{mysql_output}'"),
        );

        let engine = Mysqld::new(MysqldOptions {
            defaults_file: dir.path().join("my.cnf"),
            login_defaults_file: dir.path().join("mylogin.cnf"),
            mysql_path: mysql,
            mysqladmin_path: mysqladmin,
            mysqld_path: mysqld,
            post_start_sql_files: Vec::new(),
            preseeded_databases: Vec::new(),
            query_timeout: Duration::from_secs(5),
            remove_test_databases: false,
            stop_timeout: Duration::from_secs(5),
        });

        (dir, engine)
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..100 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn test_bootstrap_then_stop() {
        let (dir, engine) = fake_engine("");

        let handle = engine.start_bootstrap().await.unwrap();
        assert_eq!(handle.mode(), StartMode::Bootstrap);
        wait_for_file(&dir.path().join("mysqld.pid")).await;

        let args = std::fs::read_to_string(dir.path().join("mysqld.args")).unwrap();
        assert!(args.contains("--wsrep-new-cluster"));
        assert!(engine.is_running().await);

        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_second_start_is_refused() {
        let (dir, engine) = fake_engine("");

        engine.start_join().await.unwrap();
        wait_for_file(&dir.path().join("mysqld.pid")).await;

        assert!(matches!(
            engine.start_bootstrap().await,
            Err(Error::AlreadyStarted)
        ));

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_does_not_bootstrap() {
        let (dir, engine) = fake_engine("");

        engine.start_join().await.unwrap();
        wait_for_file(&dir.path().join("mysqld.pid")).await;

        let args = std::fs::read_to_string(dir.path().join("mysqld.args")).unwrap();
        assert!(!args.contains("--wsrep-new-cluster"));

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_resolves_on_exit() {
        let (dir, engine) = fake_engine("");

        engine.start_join().await.unwrap();
        let pid_file = dir.path().join("mysqld.pid");
        wait_for_file(&pid_file).await;

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        std::process::Command::new("kill")
            .arg(pid.trim())
            .status()
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), engine.wait())
            .await
            .unwrap();
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_reachable_when_replication_off() {
        let (_dir, engine) = fake_engine("wsrep_on\\tOFF\\n");

        assert!(engine.is_reachable().await);
    }

    #[tokio::test]
    async fn test_not_reachable_while_syncing() {
        // Both queries see the same output, so wsrep_ready reads as "ON" only
        // when wsrep_on does.
        let (_dir, engine) = fake_engine("wsrep_on\\tSYNCING\\n");

        assert!(!engine.is_reachable().await);
    }

    #[tokio::test]
    async fn test_not_reachable_when_client_fails() {
        let (dir, mut engine) = fake_engine("");
        let failing = script(dir.path(), "mysql-down", "echo 'ERROR 2002' >&2; exit 1");
        Arc::make_mut(&mut engine.options).mysql_path = failing;

        assert!(!engine.is_reachable().await);
    }

    #[tokio::test]
    async fn test_seed_runs_script() {
        let (dir, mut engine) = fake_engine("");
        assert!(!engine.needs_seed().await);

        Arc::make_mut(&mut engine.options).preseeded_databases = vec![PreseededDatabase {
            db_name: "app".to_string(),
            user: "app".to_string(),
            password: "pw".to_string(),
        }];
        assert!(engine.needs_seed().await);

        engine.seed().await.unwrap();

        let input = std::fs::read_to_string(dir.path().join("mysql.input")).unwrap();
        assert!(input.contains("CREATE DATABASE IF NOT EXISTS `app`;"));
        assert!(input.ends_with("FLUSH PRIVILEGES;\n"));
    }

    #[tokio::test]
    async fn test_post_start_sql_skips_unreadable_files() {
        let (dir, mut engine) = fake_engine("");
        let present = dir.path().join("present.sql");
        std::fs::write(&present, "SET GLOBAL max_connections = 500;\n").unwrap();

        Arc::make_mut(&mut engine.options).post_start_sql_files =
            vec![dir.path().join("missing.sql"), present];

        engine.run_post_start_sql().await.unwrap();

        let input = std::fs::read_to_string(dir.path().join("mysql.input")).unwrap();
        assert_eq!(input, "SET GLOBAL max_connections = 500;\n");
    }

    #[tokio::test]
    async fn test_post_start_sql_execution_error_is_returned() {
        let (dir, mut engine) = fake_engine("");
        let file = dir.path().join("bad.sql");
        std::fs::write(&file, "NOT SQL;\n").unwrap();
        let failing = script(dir.path(), "mysql-bad", "cat > /dev/null; echo 'ERROR 1064' >&2; exit 1");

        let options = Arc::make_mut(&mut engine.options);
        options.mysql_path = failing;
        options.post_start_sql_files = vec![file.clone()];

        match engine.run_post_start_sql().await {
            Err(Error::PostStartSql { file: failed, .. }) => assert_eq!(failed, file),
            other => panic!("expected PostStartSql, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_is_bounded_when_shutdown_hangs() {
        let (dir, mut engine) = fake_engine("");
        let hanging = script(dir.path(), "mysqladmin-hang", "exec sleep 20");
        let options = Arc::make_mut(&mut engine.options);
        options.mysqladmin_path = hanging;
        options.stop_timeout = Duration::from_secs(1);

        engine.start_join().await.unwrap();
        let pid_file = dir.path().join("mysqld.pid");
        wait_for_file(&pid_file).await;

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), engine.stop())
            .await
            .unwrap();

        assert!(matches!(
            result,
            Err(Error::StopTimeout(timeout)) if timeout == Duration::from_secs(1)
        ));
        assert!(started.elapsed() < Duration::from_secs(3));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        std::process::Command::new("kill")
            .arg(pid.trim())
            .status()
            .unwrap();
    }

    /// A daemonized engine whose `mysqladmin status` fails on the second
    /// call only, and on every call once `stopped` exists.
    fn flaky_daemon() -> (TempDir, Mysqld) {
        let (dir, mut engine) = fake_engine("");
        let d = dir.path().display();
        let mysqladmin = script(
            dir.path(),
            "mysqladmin-flaky",
            &format!(
                "n=$(( $(cat {d}/status.calls 2>/dev/null || echo 0) + 1 ))\n\
                 echo $n > {d}/status.calls\n\
                 [ -e {d}/stopped ] && exit 1\n\
                 [ $n -ne 2 ]"
            ),
        );
        Arc::make_mut(&mut engine.options).mysqladmin_path = mysqladmin;

        (dir, engine)
    }

    fn status_calls(dir: &Path) -> u32 {
        std::fs::read_to_string(dir.join("status.calls"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stand_alone_survives_a_failed_status_check() {
        let (dir, engine) = flaky_daemon();
        *engine.engine.lock().await = Engine::StandAlone;

        let waited = tokio::time::timeout(Duration::from_secs(4), engine.wait()).await;

        assert!(waited.is_err(), "wait resolved while the engine was up");
        assert!(engine.is_running().await);
        assert!(status_calls(dir.path()) >= 3);
    }

    #[tokio::test]
    async fn test_stand_alone_wait_resolves_after_repeated_failures() {
        let (dir, engine) = flaky_daemon();
        *engine.engine.lock().await = Engine::StandAlone;
        std::fs::write(dir.path().join("stopped"), "").unwrap();

        tokio::time::timeout(Duration::from_secs(5), engine.wait())
            .await
            .unwrap();

        assert_eq!(status_calls(dir.path()), STATUS_FAILURES_BEFORE_EXIT);
    }
}
