//! Versioned schema migrations for the SQLite backend.
//!
//! Each migration runs in its own transaction and is recorded in
//! `_bulwark_migrations`, so [`MigrationManager::up`] can be called on every
//! startup.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Database, Sqlite, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Execute the migration
    async fn up<'a>(
        &'a self,
        conn: &'a mut <DB as Database>::Connection,
    ) -> Result<(), MigrationError>;

    /// Rollback the migration
    async fn down<'a>(
        &'a self,
        conn: &'a mut <DB as Database>::Connection,
    ) -> Result<(), MigrationError>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_bulwark_migrations"
    }

    /// Initialize migration tracking table
    async fn initialize(&self) -> Result<(), MigrationError>;

    /// Apply pending migrations
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<(), MigrationError>;

    /// Rollback migrations
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<(), MigrationError>;

    /// Get list of applied migrations
    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError>;

    /// Check if specific migration was applied
    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError>;
}

/// Every migration of this backend, in application order.
pub fn all_migrations() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreateLoginAttemptBucketsTable),
        Box::new(CreateSecurityEventsTable),
        Box::new(CreateSecurityEventIndexes),
    ]
}

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if !self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    version = migration.version(),
                    name = migration.name(),
                    "Applying migration"
                );

                migration
                    .up(&mut *tx as &mut <Sqlite as Database>::Connection)
                    .await?;

                sqlx::query(
                    format!(
                        "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                        self.get_migration_table_name()
                    )
                    .as_str(),
                )
                .bind(migration.version())
                .bind(migration.name())
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations.iter().rev() {
            if self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    version = migration.version(),
                    name = migration.name(),
                    "Rolling back migration"
                );

                migration
                    .down(&mut *tx as &mut <Sqlite as Database>::Connection)
                    .await?;

                sqlx::query(
                    format!(
                        "DELETE FROM {} WHERE version = ?",
                        self.get_migration_table_name()
                    )
                    .as_str(),
                )
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

pub struct CreateLoginAttemptBucketsTable;

#[async_trait]
impl Migration<Sqlite> for CreateLoginAttemptBucketsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptBucketsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        // Timestamps are unix milliseconds
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempt_buckets (
                id TEXT PRIMARY KEY,
                user_identifier TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                last_attempt_at INTEGER NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                locked_until INTEGER,
                version INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_identifier, source_ip)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS login_attempt_buckets")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateSecurityEventsTable;

#[async_trait]
impl Migration<Sqlite> for CreateSecurityEventsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateSecurityEventsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        // `seq` preserves insertion order independently of clock resolution
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                description TEXT NOT NULL,
                user_identifier TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                user_agent TEXT,
                success INTEGER,
                occurred_at INTEGER NOT NULL,
                additional_data TEXT
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS security_events")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateSecurityEventIndexes;

#[async_trait]
impl Migration<Sqlite> for CreateSecurityEventIndexes {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateSecurityEventIndexes"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_security_events_user_identifier ON security_events(user_identifier)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_security_events_source_ip ON security_events(source_ip)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_security_events_occurred_at ON security_events(occurred_at)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_security_events_event_type ON security_events(event_type)",
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        for index in [
            "idx_security_events_user_identifier",
            "idx_security_events_source_ip",
            "idx_security_events_occurred_at",
            "idx_security_events_event_type",
        ] {
            sqlx::query(&format!("DROP INDEX IF EXISTS {index}"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test() -> SqliteMigrationManager {
        let _ = tracing_subscriber::fmt().try_init();
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        let manager = SqliteMigrationManager::new(pool);
        manager
            .initialize()
            .await
            .expect("Failed to initialize migrations");
        manager
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let manager = setup_test().await;
        let migrations = all_migrations();

        manager.up(&migrations).await.unwrap();
        manager.up(&migrations).await.unwrap();

        let applied = manager.get_applied_migrations().await.unwrap();
        let versions: Vec<_> = applied.iter().map(|r| r.version).collect();
        assert_eq!(versions, [1, 2, 3]);
        assert_eq!(applied[0].name, "CreateLoginAttemptBucketsTable");
    }

    #[tokio::test]
    async fn test_down_rolls_back() {
        let manager = setup_test().await;
        let migrations = all_migrations();

        manager.up(&migrations).await.unwrap();
        manager.down(&migrations).await.unwrap();

        assert!(manager.get_applied_migrations().await.unwrap().is_empty());
        assert!(!manager.is_applied(1).await.unwrap());
    }
}
