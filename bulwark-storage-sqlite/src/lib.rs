//! SQLite storage backend for bulwark
//!
//! Provides [`SqliteRepositoryProvider`], a durable
//! [`RepositoryProvider`](bulwark_core::RepositoryProvider) for login attempt
//! buckets and the security audit trail.
//!
//! ```rust,ignore
//! use bulwark_storage_sqlite::SqliteRepositoryProvider;
//!
//! let pool = sqlx::SqlitePool::connect("sqlite://bulwark.db?mode=rwc").await?;
//! let provider = SqliteRepositoryProvider::new(pool);
//! provider.migrate().await?;
//! ```
pub mod migrations;
pub mod repositories;

pub use repositories::{
    SqliteLoginAttemptRepository, SqliteRepositoryProvider, SqliteSecurityEventRepository,
};
