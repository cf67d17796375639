//! Database lifecycle and schema migrations.

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{Database, query_failed};

impl Database {
    /// Create a new database connection with default pool settings
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::open(&config).await
    }

    /// Open the database described by `config` and bring its schema up to date
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = &config.path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Foreign keys on, WAL so readers never block the single writer
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to connect to database: {}",
                    e
                )))
            })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: accounts, credentials, download tasks and token keys
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying database migration v1");

        Self::begin_migration(conn).await?;

        let result = async {
            Self::execute_ddl(
                conn,
                "accounts table",
                r#"
                CREATE TABLE accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    created_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "account_credentials table",
                r#"
                CREATE TABLE account_credentials (
                    account_id INTEGER NOT NULL UNIQUE
                        REFERENCES accounts(id) ON DELETE CASCADE,
                    password_hash TEXT NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "download_tasks table",
                r#"
                CREATE TABLE download_tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_account_id INTEGER NOT NULL
                        REFERENCES accounts(id) ON DELETE CASCADE,
                    download_type INTEGER NOT NULL,
                    url TEXT NOT NULL,
                    status INTEGER NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "download_tasks owner index",
                "CREATE INDEX idx_download_tasks_owner ON download_tasks(owner_account_id, id)",
            )
            .await?;

            Self::execute_ddl(
                conn,
                "download_tasks status index",
                "CREATE INDEX idx_download_tasks_status ON download_tasks(status, updated_at)",
            )
            .await?;

            Self::execute_ddl(
                conn,
                "token_public_keys table",
                r#"
                CREATE TABLE token_public_keys (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    public_key TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::end_migration(conn, 1, result).await
    }

    /// Migration v2: message queue log, group offsets and in-flight leases
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying database migration v2");

        Self::begin_migration(conn).await?;

        let result = async {
            Self::execute_ddl(
                conn,
                "mq_messages table",
                r#"
                CREATE TABLE mq_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    queue TEXT NOT NULL,
                    payload BLOB NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "mq_messages queue index",
                "CREATE INDEX idx_mq_messages_queue ON mq_messages(queue, id)",
            )
            .await?;

            Self::execute_ddl(
                conn,
                "mq_group_offsets table",
                r#"
                CREATE TABLE mq_group_offsets (
                    group_id TEXT NOT NULL,
                    queue TEXT NOT NULL,
                    claimed_offset INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (group_id, queue)
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "mq_inflight table",
                r#"
                CREATE TABLE mq_inflight (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id TEXT NOT NULL,
                    queue TEXT NOT NULL,
                    first_id INTEGER NOT NULL,
                    last_id INTEGER NOT NULL,
                    claimed_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "mq_inflight group index",
                "CREATE INDEX idx_mq_inflight_group ON mq_inflight(group_id, queue, claimed_at)",
            )
            .await?;

            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::end_migration(conn, 2, result).await
    }

    /// Open the transaction wrapping one migration
    async fn begin_migration(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;
        Ok(())
    }

    /// Commit a migration that succeeded or roll back one that failed
    async fn end_migration(
        conn: &mut SqliteConnection,
        version: i32,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "database migration complete");
        Ok(())
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, ddl: &str) -> Result<()> {
        sqlx::query(ddl).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Record a migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction on a pooled connection
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))
    }

    /// Commit a transaction started with [`Database::begin`]
    pub async fn commit(tx: sqlx::Transaction<'static, sqlx::Sqlite>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit transaction", e))
    }
}
