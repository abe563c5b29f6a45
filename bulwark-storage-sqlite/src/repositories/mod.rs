//! Repository implementations for SQLite storage

pub mod login_attempt;
pub mod security_event;

pub use login_attempt::SqliteLoginAttemptRepository;
pub use security_event::SqliteSecurityEventRepository;

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{
        LoginAttemptRepositoryProvider, RepositoryProvider, SecurityEventRepositoryProvider,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{MigrationManager, SqliteMigrationManager, all_migrations};

/// Repository provider implementation for SQLite
///
/// This struct implements the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    login_attempt: Arc<SqliteLoginAttemptRepository>,
    security_event: Arc<SqliteSecurityEventRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let login_attempt = Arc::new(SqliteLoginAttemptRepository::new(pool.clone()));
        let security_event = Arc::new(SqliteSecurityEventRepository::new(pool.clone()));

        Self {
            pool,
            login_attempt,
            security_event,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LoginAttemptRepositoryProvider for SqliteRepositoryProvider {
    type LoginAttemptRepo = SqliteLoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        &self.login_attempt
    }
}

impl SecurityEventRepositoryProvider for SqliteRepositoryProvider {
    type SecurityEventRepo = SqliteSecurityEventRepository;

    fn security_event(&self) -> &Self::SecurityEventRepo {
        &self.security_event
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&all_migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}
