//! Deploys committed migrations to a long-lived database.

use super::{ApplyOutcome, Migrator};
use crate::pg::PgConnection;
use crate::project::Project;
use crate::util::{quote_ident, Result, TrekError};
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONNECT_ATTEMPTS: u32 = 10;
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Server to deploy to. The database name is ignored; `db_name` is used.
    pub server: PgConnectOptions,
    pub db_name: String,
    pub db_users: Vec<String>,
    /// Drop and recreate the database, then apply migrations one at a time.
    pub reset: bool,
    /// After each step, run `testdata/NNN*` files for that step.
    pub insert_test_data: bool,
}

pub async fn deploy(project: &Project, options: &DeployOptions) -> Result<ApplyOutcome> {
    let migrator = Migrator::new(&project.migrations_dir())?;

    let admin = PgConnection::connect_with_retry(
        options.server.clone().database("postgres"),
        CONNECT_ATTEMPTS,
        CONNECT_BACKOFF,
    )
    .await?;

    let database = quote_ident(&options.db_name);
    if options.reset {
        match admin
            .execute_script(&format!("DROP DATABASE IF EXISTS {database} WITH (FORCE)"))
            .await
        {
            Ok(()) => info!("Dropped database {}", options.db_name),
            Err(e) => warn!("Failed to drop database: {e}"),
        }
    }
    if let Err(e) = admin
        .execute_script(&format!("CREATE DATABASE {database}"))
        .await
    {
        warn!("Failed to create database: {e}");
    }
    for user in &options.db_users {
        if let Err(e) = admin
            .execute_script(&format!("CREATE ROLE {} WITH LOGIN", quote_ident(user)))
            .await
        {
            warn!("Failed to create role {user}: {e}");
        }
    }
    admin.close().await;

    let connection =
        PgConnection::connect_with(options.server.clone().database(&options.db_name)).await?;

    let result = if options.reset {
        step_through(&migrator, &connection, project, options.insert_test_data).await
    } else {
        migrator.up(&connection).await
    };
    connection.close().await;

    let outcome = result?;
    match outcome {
        ApplyOutcome::NoChange => info!("No changes!"),
        ApplyOutcome::Applied(n) => info!("Successfully migrated database ({n} migrations)"),
    }
    Ok(outcome)
}

async fn step_through(
    migrator: &Migrator,
    connection: &PgConnection,
    project: &Project,
    insert_test_data: bool,
) -> Result<ApplyOutcome> {
    let mut applied = 0;

    for migration in migrator.migrations() {
        if let ApplyOutcome::Applied(n) = migrator.steps(connection, 1).await? {
            applied += n;
        }
        if insert_test_data {
            for file in test_data_files(&project.testdata_dir(), migration.number)? {
                let sql = std::fs::read_to_string(&file).map_err(|e| TrekError::io(&file, e))?;
                connection.execute_script(&sql).await.map_err(|e| {
                    TrekError::Database(format!("Failed to insert {}: {e}", file.display()))
                })?;
                info!("Inserted test data {}", file.display());
            }
        }
    }

    Ok(if applied == 0 {
        ApplyOutcome::NoChange
    } else {
        ApplyOutcome::Applied(applied)
    })
}

/// Files in `dir` whose name starts with the zero-padded step number, sorted.
pub fn test_data_files(dir: &Path, step: u32) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(format!("{step:03}*"));
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern)
        .map_err(|e| TrekError::Config(format!("Invalid test data pattern {pattern}: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            TrekError::io(path, std::io::Error::from(e))
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
