//! Applies committed migrations to a database.
//!
//! Bookkeeping is compatible with golang-migrate: a single-row
//! `public.schema_migrations (version, dirty)` table records the latest
//! applied version. Every migration runs in its own transaction together with
//! the bookkeeping update.

pub mod deploy;

use crate::migrate::{list_migrations, MigrationFile};
use crate::pg::connection::PgConnection;
use crate::util::{Result, TrekError};
use std::path::Path;
use tracing::{info, warn};

pub const HISTORY_TABLE: &str = "\"public\".\"schema_migrations\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This many migrations were applied.
    Applied(usize),
    /// Nothing was pending. Not an error.
    NoChange,
}

pub struct Migrator {
    migrations: Vec<MigrationFile>,
}

impl Migrator {
    pub fn new(migrations_dir: &Path) -> Result<Self> {
        Ok(Self {
            migrations: list_migrations(migrations_dir)?,
        })
    }

    pub fn migrations(&self) -> &[MigrationFile] {
        &self.migrations
    }

    /// Latest applied version, or `None` on a database without history.
    pub async fn current_version(&self, connection: &PgConnection) -> Result<Option<i64>> {
        ensure_history_table(connection).await?;

        let row: Option<(i64, bool)> =
            sqlx::query_as(&format!("SELECT version, dirty FROM {HISTORY_TABLE} LIMIT 1"))
                .fetch_optional(connection.pool())
                .await
                .map_err(|e| {
                    TrekError::Database(format!("Failed to read migration history: {e}"))
                })?;

        match row {
            Some((version, true)) => Err(TrekError::Database(format!(
                "Dirty database version {version}. Fix the database and reset the version"
            ))),
            Some((version, false)) => Ok(Some(version)),
            None => Ok(None),
        }
    }

    /// Applies every pending migration.
    pub async fn up(&self, connection: &PgConnection) -> Result<ApplyOutcome> {
        self.apply_pending(connection, usize::MAX).await
    }

    /// Applies at most `n` pending migrations.
    pub async fn steps(&self, connection: &PgConnection, n: usize) -> Result<ApplyOutcome> {
        self.apply_pending(connection, n).await
    }

    async fn apply_pending(&self, connection: &PgConnection, limit: usize) -> Result<ApplyOutcome> {
        let current = self.current_version(connection).await?;

        let pending: Vec<&MigrationFile> = self
            .migrations
            .iter()
            .filter(|m| current.map_or(true, |version| i64::from(m.number) > version))
            .take(limit)
            .collect();

        if pending.is_empty() {
            return Ok(ApplyOutcome::NoChange);
        }

        for migration in &pending {
            apply_one(connection, migration).await?;
        }

        Ok(ApplyOutcome::Applied(pending.len()))
    }
}

async fn ensure_history_table(connection: &PgConnection) -> Result<()> {
    connection
        .execute_script(&format!(
            "CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)"
        ))
        .await
        .map_err(|e| TrekError::Database(format!("Failed to create migration history: {e}")))
}

async fn apply_one(connection: &PgConnection, migration: &MigrationFile) -> Result<()> {
    let body = std::fs::read_to_string(&migration.path)
        .map_err(|e| TrekError::io(&migration.path, e))?;
    let version = i64::from(migration.number);

    let result = async {
        let mut transaction = connection.pool().begin().await?;
        sqlx::raw_sql(&body).execute(&mut *transaction).await?;
        sqlx::query(&format!("TRUNCATE {HISTORY_TABLE}"))
            .execute(&mut *transaction)
            .await?;
        sqlx::query(&format!(
            "INSERT INTO {HISTORY_TABLE} (version, dirty) VALUES ($1, false)"
        ))
        .bind(version)
        .execute(&mut *transaction)
        .await?;
        transaction.commit().await
    }
    .await;

    match result {
        Ok(()) => {
            info!("Applied migration {}", migration.file_name());
            Ok(())
        }
        Err(e) => {
            if let Err(dirty) = record_dirty(connection, version).await {
                warn!("{dirty}");
            }
            Err(TrekError::Database(format!(
                "Failed to apply migration {}: {e}",
                migration.file_name()
            )))
        }
    }
}

/// Records `version` as dirty, which blocks further applies until repaired.
pub async fn record_dirty(connection: &PgConnection, version: i64) -> Result<()> {
    connection
        .execute_script(&format!(
            "TRUNCATE {HISTORY_TABLE}; INSERT INTO {HISTORY_TABLE} (version, dirty) VALUES ({version}, true)"
        ))
        .await
        .map_err(|e| TrekError::Database(format!("Failed to mark version {version} dirty: {e}")))
}
