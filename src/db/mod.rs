//! Database connection pools.

use std::{str::FromStr as _, time::Duration};

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

pub mod pagination;
pub(crate) mod util;

/// How long a connection waits on a locked database before SQLite reports busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The primary store and its read replica.
///
/// Writes must always target [`Db::primary`]. Review queries tolerate bounded
/// staleness and read from [`Db::replica`], which is the primary itself unless
/// a separate replica is configured.
#[derive(Clone, Debug)]
pub struct Db {
    primary: SqlitePool,
    replica: SqlitePool,
}

impl Db {
    /// Connect to the primary database and, if given, a read replica.
    pub async fn connect(primary: &str, replica: Option<&str>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(primary)
            .with_context(|| format!("invalid database url {primary:?}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let primary_pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("failed to connect to primary database")?;

        let replica_pool = match replica {
            Some(replica) => {
                info!("review queries will read from replica {replica}");
                let options = SqliteConnectOptions::from_str(replica)
                    .with_context(|| format!("invalid replica url {replica:?}"))?
                    .read_only(true)
                    .busy_timeout(BUSY_TIMEOUT);
                SqlitePoolOptions::new()
                    .connect_with(options)
                    .await
                    .context("failed to connect to replica database")?
            }
            None => primary_pool.clone(),
        };

        Ok(Self {
            primary: primary_pool,
            replica: replica_pool,
        })
    }

    /// Wrap a single pool that serves both reads and writes.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            replica: pool.clone(),
            primary: pool,
        }
    }

    /// Apply the embedded migrations to the primary database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!()
            .run(&self.primary)
            .await
            .context("failed to apply migrations")
    }

    pub fn primary(&self) -> &SqlitePool {
        &self.primary
    }

    pub fn replica(&self) -> &SqlitePool {
        &self.replica
    }

    /// A migrated in-memory database.
    ///
    /// The pool is pinned to a single long-lived connection, since every
    /// in-memory connection would otherwise see its own empty database.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("should open in-memory database");
        let db = Self::from_pool(pool);
        db.migrate().await.expect("should apply migrations");
        db
    }
}
