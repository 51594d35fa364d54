//! Database connection pool, migrations, and health check.
//!
//! Shared Postgres connection pool used by the queue store and the
//! `pg_notify` event bus.

pub mod notify;
pub mod work;

use std::time::Duration;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared by every worker in the process.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    ///
    /// `acquire_timeout` bounds how long a caller waits for a connection; an
    /// exhausted pool surfaces as a store error rather than a hang.
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Run `SELECT 1` within `deadline`.
    pub async fn health_check(&self, deadline: Duration) -> Result<()> {
        tokio::time::timeout(deadline, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| Error::Timeout {
                operation: "health_check",
                after: deadline,
            })??;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
