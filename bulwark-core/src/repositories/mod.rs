//! Repository traits for the guard's data access layer
//!
//! The repository system uses a composable trait hierarchy:
//!
//! - Individual `*Repository` traits define the operations for each record kind
//! - Individual `*RepositoryProvider` traits provide access to each repository type
//! - [`RepositoryProvider`] is a supertrait combining the provider traits plus lifecycle methods

pub mod adapter;
pub mod login_attempt;
pub mod security_event;

pub use adapter::{LoginAttemptRepositoryAdapter, SecurityEventRepositoryAdapter};
pub use login_attempt::LoginAttemptRepository;
pub use security_event::SecurityEventRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for login attempt bucket storage.
pub trait LoginAttemptRepositoryProvider: Send + Sync + 'static {
    /// The login attempt repository implementation type
    type LoginAttemptRepo: LoginAttemptRepository;

    /// Get the login attempt repository
    fn login_attempt(&self) -> &Self::LoginAttemptRepo;
}

/// Provider trait for security event storage.
pub trait SecurityEventRepositoryProvider: Send + Sync + 'static {
    /// The security event repository implementation type
    type SecurityEventRepo: SecurityEventRepository;

    /// Get the security event repository
    fn security_event(&self) -> &Self::SecurityEventRepo;
}

/// Provider trait that storage backends implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// 1. Implement [`LoginAttemptRepository`] and [`SecurityEventRepository`]
/// 2. Implement each individual `*RepositoryProvider` trait
/// 3. Implement this trait with `migrate()` and `health_check()`
///
/// # Example
///
/// ```rust,ignore
/// use bulwark_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl LoginAttemptRepositoryProvider for MyStorage {
///     type LoginAttemptRepo = MyLoginAttemptRepository;
///     fn login_attempt(&self) -> &Self::LoginAttemptRepo { &self.login_attempts }
/// }
///
/// // ... implement SecurityEventRepositoryProvider ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider:
    LoginAttemptRepositoryProvider + SecurityEventRepositoryProvider
{
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
