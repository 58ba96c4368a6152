//! Database configuration module.
//!
//! Owns the process-wide MySQL pool and the transaction helpers built on it.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Connection, MySqlConnection, MySqlPool};
use tokio::sync::OnceCell;

use crate::config::env::AppConfig;
use crate::error::{AppError, AppResult};

static DB_POOL: OnceCell<MySqlPool> = OnceCell::const_new();

/// Base pool size plus the allowed overflow.
const MAX_CONNECTIONS: u32 = 10 + 20;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Pool settings shared by every environment.
pub fn pool_options() -> MySqlPoolOptions {
    MySqlPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        // Ping before handing out a connection; MySQL drops idle sessions.
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET SESSION sql_mode='STRICT_TRANS_TABLES'")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("SET SESSION time_zone='+00:00'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
}

/// Initializes the database connection pool.
///
/// The pool is created once and stored in a global `OnceCell`; concurrent
/// first calls wait for the same connection attempt and later calls return
/// the same pool. The connection is tested before it is stored.
pub async fn init_db(config: &AppConfig) -> AppResult<MySqlPool> {
    DB_POOL
        .get_or_try_init(|| connect(config))
        .await
        .cloned()
}

async fn connect(config: &AppConfig) -> AppResult<MySqlPool> {
    let pool = pool_options().connect(&config.db_url).await.map_err(|e| {
        tracing::error!(error = %e, "Database initialization failed");
        AppError::from(e)
    })?;
    if let Err(e) = test_connection(&pool).await {
        pool.close().await;
        return Err(e);
    }

    tracing::info!(
        max_connections = MAX_CONNECTIONS,
        env = %config.env,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Runs `SELECT 1` against the pool.
pub async fn test_connection(pool: &MySqlPool) -> AppResult<()> {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => {
            tracing::info!("Database connection test succeeded");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Database connection test failed");
            Err(e.into())
        }
    }
}

/// Returns the global pool, if it has been initialized and not closed.
pub fn db_pool() -> AppResult<MySqlPool> {
    DB_POOL
        .get()
        .filter(|pool| !pool.is_closed())
        .cloned()
        .ok_or_else(|| AppError::NotInitialized("database pool".to_string()))
}

/// Closes the database connection pool.
pub async fn close_db() {
    if let Some(pool) = DB_POOL.get() {
        if !pool.is_closed() {
            pool.close().await;
            tracing::info!("Database connection closed");
        }
    }
}

/// Runs `f` inside a transaction.
///
/// Commits when `f` succeeds. On failure the transaction is rolled back and
/// the original error is returned.
pub async fn with_transaction<T, F>(
    pool: &MySqlPool,
    isolation: Option<IsolationLevel>,
    f: F,
) -> AppResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, AppResult<T>>,
{
    let mut conn = pool.acquire().await?;

    // Applies to the next transaction started on this session only.
    if let Some(level) = isolation {
        sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))
            .execute(&mut *conn)
            .await?;
    }

    let mut tx = conn.begin().await?;
    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            tracing::error!(error = %e, "Database operation failed, rolled back");
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Runs `f` with the session in read-only mode, restoring read-write mode
/// afterwards whatever the outcome.
pub async fn read_only<T, F>(pool: &MySqlPool, f: F) -> AppResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, AppResult<T>>,
{
    let mut conn = pool.acquire().await?;
    sqlx::query("SET SESSION TRANSACTION READ ONLY")
        .execute(&mut *conn)
        .await?;

    let result = f(&mut *conn).await;

    if let Err(e) = sqlx::query("SET SESSION TRANSACTION READ WRITE")
        .execute(&mut *conn)
        .await
    {
        // Never hand a read-only session back to the pool.
        tracing::error!(error = %e, "Failed to restore read-write mode, discarding connection");
        drop(conn.detach());
        return result.and(Err(AppError::from(e)));
    }

    result
}
