//! Disposable PostgreSQL clusters for one generation cycle.
//!
//! Each [`EphemeralInstance`] owns a storage directory namespaced by its
//! [`Role`] and a TCP port. [`EphemeralInstance::release`] stops the server and
//! removes the directory; if an instance is dropped without being released
//! the server is stopped synchronously as a fallback.

use super::connection::PgConnection;
use crate::config::Tools;
use crate::process::Tool;
use crate::util::{Result, TrekError};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const SUPERUSER: &str = "postgres";
const DATABASE: &str = "postgres";
const READY_ATTEMPTS: u32 = 20;
const READY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the schema compiled from the model.
    Target,
    /// Holds the schema produced by replaying committed migrations.
    Reference,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Target => "target",
            Role::Reference => "reference",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage for the cluster serving `role` on `port`. Clusters on different ports never share it.
pub fn storage_dir(role: Role, port: u16) -> PathBuf {
    std::env::temp_dir()
        .join("pgtrek")
        .join(format!("{}-{port}", role.as_str()))
}

pub fn connection_string(port: u16) -> String {
    format!("postgresql://{SUPERUSER}@localhost:{port}/{DATABASE}?sslmode=disable")
}

fn connect_options(port: u16) -> PgConnectOptions {
    PgConnectOptions::new()
        .host("localhost")
        .port(port)
        .username(SUPERUSER)
        .database(DATABASE)
        .ssl_mode(PgSslMode::Disable)
}

/// A server process bound to a data directory. Stopped on drop unless already stopped.
struct Server {
    data_dir: PathBuf,
    pg_ctl: String,
    stopped: bool,
}

impl Server {
    async fn init(data_dir: PathBuf, tools: &Tools) -> Result<Self> {
        remove_dir(&data_dir).await?;
        if let Some(parent) = data_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrekError::io(parent, e))?;
        }

        let initialized = Tool::new(&tools.initdb)
            .arg("--pgdata")
            .arg(&data_dir)
            .args(["--username", SUPERUSER, "--auth=trust", "--encoding=UTF8", "--no-sync"])
            .run()
            .await;
        if let Err(e) = initialized {
            let _ = remove_dir(&data_dir).await;
            return Err(e);
        }

        Ok(Self {
            data_dir,
            pg_ctl: tools.pg_ctl.clone(),
            stopped: false,
        })
    }

    async fn start(&self, port: u16) -> Result<()> {
        let options = format!(
            "-p {port} -c listen_addresses=localhost -k '{}'",
            self.data_dir.display()
        );
        Tool::new(&self.pg_ctl)
            .arg("--pgdata")
            .arg(&self.data_dir)
            .arg("--log")
            .arg(self.data_dir.join("postgres.log"))
            .arg("-o")
            .arg(options)
            .args(["--no-wait", "start"])
            .run()
            .await?;
        Ok(())
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let stopped = Tool::new(&self.pg_ctl)
            .arg("--pgdata")
            .arg(&self.data_dir)
            .args(["--mode", "fast", "--wait", "stop"])
            .run()
            .await;
        if let Err(e) = stopped {
            warn!("Failed to stop database in {}: {e}", self.data_dir.display());
        }
        if let Err(e) = remove_dir(&self.data_dir).await {
            warn!("{e}");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        let _ = std::process::Command::new(&self.pg_ctl)
            .arg("--pgdata")
            .arg(&self.data_dir)
            .args(["--mode", "immediate", "--wait", "stop"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

async fn remove_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TrekError::io(dir, e)),
    }
}

pub struct EphemeralInstance {
    role: Role,
    port: u16,
    server: Server,
    connection: PgConnection,
}

impl EphemeralInstance {
    /// Initializes, starts and connects to a fresh cluster for `role` on `port`.
    ///
    /// When start-up fails after the server was launched, it is stopped before
    /// the error is returned.
    pub async fn acquire(role: Role, port: u16, tools: &Tools) -> Result<Self> {
        info!("Starting {role} database on port {port}");

        let mut server = Server::init(storage_dir(role, port), tools).await?;

        if let Err(e) = server.start(port).await {
            server.stop().await;
            return Err(TrekError::Process(format!(
                "Failed to start {role} database: {e}"
            )));
        }

        let connection = match PgConnection::connect_with_retry(
            connect_options(port),
            READY_ATTEMPTS,
            READY_BACKOFF,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                server.stop().await;
                return Err(TrekError::Database(format!(
                    "Unable to connect to {role} database: {e}"
                )));
            }
        };

        debug!(%role, port, "database ready");

        Ok(Self {
            role,
            port,
            server,
            connection,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection(&self) -> &PgConnection {
        &self.connection
    }

    pub fn url(&self) -> String {
        connection_string(self.port)
    }

    /// Stops the server and removes its storage. Never fails; problems are logged.
    pub async fn release(mut self) {
        debug!(role = %self.role, "releasing database");
        self.connection.close().await;
        self.server.stop().await;
    }
}
