//! Builder pattern for constructing guard instances
//!
//! This module provides a type-safe builder for creating [`GuardOrchestrator`]
//! instances with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark::{GuardOrchestratorBuilder, LoginGuardConfig, SensitiveFieldCipher};
//! use chrono::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let guard = GuardOrchestratorBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_login_policy(
//!             LoginGuardConfig::default().with_lockout_duration(Duration::minutes(10)),
//!         )
//!         .with_cipher(SensitiveFieldCipher::from_env()?)
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     guard.health_check().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use bulwark_core::{
    LoginGuardConfig, RepositoryProvider, SecurityEventBus, SecurityEventHandler,
    SensitiveFieldCipher, memory::InMemoryRepositoryProvider,
};

use crate::GuardOrchestrator;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardOrchestratorBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`GuardOrchestrator`] instances.
///
/// Storage must be configured before [`build`](GuardOrchestratorBuilder::build)
/// becomes available.
pub struct GuardOrchestratorBuilder<Storage> {
    storage: Storage,
    login_policy: LoginGuardConfig,
    cipher: Option<SensitiveFieldCipher>,
    event_handlers: Vec<Arc<dyn SecurityEventHandler>>,
    apply_migrations: bool,
}

impl Default for GuardOrchestratorBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardOrchestratorBuilder<NoStorage> {
    /// Create a new builder with the default login policy.
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            login_policy: LoginGuardConfig::default(),
            cipher: None,
            event_handlers: Vec::new(),
            apply_migrations: false,
        }
    }

    /// Use an existing repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> GuardOrchestratorBuilder<WithStorage<R>> {
        GuardOrchestratorBuilder {
            storage: WithStorage { repositories },
            login_policy: self.login_policy,
            cipher: self.cipher,
            event_handlers: self.event_handlers,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Keep all state in process memory.
    ///
    /// Lockouts do not survive a restart and are not shared between processes.
    pub fn with_in_memory(self) -> GuardOrchestratorBuilder<WithStorage<InMemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(InMemoryRepositoryProvider::new()))
    }
}

#[cfg(feature = "sqlite")]
impl GuardOrchestratorBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bulwark::GuardOrchestratorBuilder;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let guard = GuardOrchestratorBuilder::new()
    ///     .with_sqlite("sqlite://bulwark.db?mode=rwc")
    ///     .await?
    ///     .apply_migrations(true)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<
        GuardOrchestratorBuilder<WithStorage<crate::SqliteRepositoryProvider>>,
        GuardOrchestratorBuilderError,
    > {
        let pool = sqlx::SqlitePool::connect(url)
            .await
            .map_err(|e| GuardOrchestratorBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_sqlite_pool(pool))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> GuardOrchestratorBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: RepositoryProvider> GuardOrchestratorBuilder<WithStorage<R>> {
    /// Set the lockout thresholds and windows.
    ///
    /// Default: 5 failures, 30 minute lockout, 15 minute reset window
    pub fn with_login_policy(mut self, config: LoginGuardConfig) -> Self {
        self.login_policy = config;
        self
    }

    /// Attach the cipher used for sensitive record fields.
    ///
    /// Without a cipher, [`GuardOrchestrator::seal_record`] and
    /// [`GuardOrchestrator::open_record`] fail with a missing key error.
    pub fn with_cipher(mut self, cipher: SensitiveFieldCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Register a handler that receives every persisted security event.
    pub fn with_event_handler(mut self, handler: Arc<dyn SecurityEventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the guard.
    ///
    /// # Errors
    ///
    /// Returns an error if the login policy is invalid or migrations fail.
    pub async fn build(self) -> Result<GuardOrchestrator<R>, GuardOrchestratorBuilderError> {
        self.login_policy
            .validate()
            .map_err(|e| GuardOrchestratorBuilderError::InvalidConfiguration(e.to_string()))?;

        let event_bus = SecurityEventBus::new();
        for handler in self.event_handlers {
            event_bus.register(handler).await;
        }

        let guard = GuardOrchestrator::from_parts(
            self.storage.repositories,
            self.login_policy,
            self.cipher,
            event_bus,
        );

        if self.apply_migrations {
            guard
                .migrate()
                .await
                .map_err(|e| GuardOrchestratorBuilderError::Migration(e.to_string()))?;
        }

        tracing::debug!(
            max_failures = guard.tracker().config().max_failures,
            cipher = guard.cipher().is_some(),
            "Guard built"
        );

        Ok(guard)
    }
}
