use crate::util::{sanitize_url, Result, TrekError};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub struct PgConnection {
    pool: Pool<Postgres>,
}

impl PgConnection {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(connection_string).map_err(|e| {
            TrekError::Database(format!(
                "Invalid connection string {}: {e}",
                sanitize_url(connection_string)
            ))
        })?;
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: PgConnectOptions) -> Result<Self> {
        let target = format!(
            "{}:{}/{}",
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or("postgres")
        );

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| TrekError::Database(format!("Failed to connect to {target}: {e}")))?;

        Ok(PgConnection { pool })
    }

    /// Connects, retrying a fixed number of times with a fixed backoff while the
    /// server is still starting up.
    pub async fn connect_with_retry(
        options: PgConnectOptions,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self> {
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::connect_with(options.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!(attempt, attempts, "database not ready: {e}");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(TrekError::Database(format!(
            "Database did not accept connections after {attempts} attempts: {}",
            last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
        )))
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Runs a multi-statement script over the simple query protocol.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| TrekError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
