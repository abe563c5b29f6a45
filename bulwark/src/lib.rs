//! # Bulwark
//!
//! Bulwark is the security guard for a login flow. It sits between the
//! request-ingress layer and the credential check and provides:
//!
//! - Brute force protection with progressive lockout keyed by (identifier, source IP)
//! - An append-only security audit trail with query and aggregation helpers
//! - Encryption and masking of sensitive (PII) fields
//!
//! The [`GuardOrchestrator`] composes these into a single decision surface for
//! the authentication flow. Every call receives an explicit [`RequestContext`]
//! resolved by the ingress layer; nothing is kept in ambient state.
//!
//! ## Storage Support
//!
//! - In-memory (always available)
//! - SQLite (`sqlite` feature, enabled by default)
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulwark::{GuardOrchestrator, RequestContext};
//! use bulwark_storage_sqlite::SqliteRepositoryProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
//!     let repositories = Arc::new(SqliteRepositoryProvider::new(pool));
//!
//!     let guard = GuardOrchestrator::builder(repositories)
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let ctx = RequestContext::new("10.0.0.5", Some("curl/8.5.0".to_string()));
//!     guard.check_login_allowed(&ctx, "a@b.com").await?;
//!
//!     // ... verify credentials ...
//!     let credentials_valid = false;
//!
//!     guard
//!         .record_login_attempt(&ctx, "a@b.com", credentials_valid)
//!         .await?;
//!     Ok(())
//! }
//! ```
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bulwark_core::{
    RepositoryProvider,
    error::{CryptoError, GuardError},
    repositories::{LoginAttemptRepositoryAdapter, SecurityEventRepositoryAdapter},
    services::{LoginAttemptTracker, SecurityAuditTrail},
};
use serde_json::json;

mod builder;

pub use builder::{GuardOrchestratorBuilder, GuardOrchestratorBuilderError, NoStorage, WithStorage};

/// Re-export core types from bulwark_core
///
/// These types are commonly used when working with the guard API.
pub use bulwark_core::{
    AttemptOutcome, BucketKey, Error, EventQuery, LoginAttemptBucket, LoginGuardConfig,
    NewSecurityEvent, RequestContext, SecurityEvent, SecurityEventBus, SecurityEventHandler,
    SecurityEventType, SecurityStatistics, SensitiveFieldCipher, SensitiveFields,
};

/// Re-export the in-memory storage backend
pub use bulwark_core::memory::InMemoryRepositoryProvider;

/// Re-export the SQLite storage backend
#[cfg(feature = "sqlite")]
pub use bulwark_storage_sqlite::SqliteRepositoryProvider;

/// Identifier recorded for events raised by callers without a principal.
pub const ANONYMOUS_IDENTIFIER: &str = "anonymous";

/// Characters of an identifier left readable in log output.
const LOG_VISIBLE_CHARS: usize = 3;

/// The tracker type wired to a repository provider.
pub type ProviderTracker<R> = LoginAttemptTracker<LoginAttemptRepositoryAdapter<R>>;

/// The audit trail type wired to a repository provider.
pub type ProviderAuditTrail<R> = SecurityAuditTrail<SecurityEventRepositoryAdapter<R>>;

/// The main guard instance
///
/// Composes the [`LoginAttemptTracker`], the [`SecurityAuditTrail`] and an
/// optional [`SensitiveFieldCipher`] over a single repository provider.
///
/// Decisions come from the tracker alone. Audit events are appended after the
/// decision is made; if an append fails the failure is logged, counted in
/// [`GuardOrchestrator::audit_write_failures`], and the decision is returned
/// unchanged.
pub struct GuardOrchestrator<R: RepositoryProvider> {
    repositories: Arc<R>,
    tracker: Arc<ProviderTracker<R>>,
    audit: Arc<ProviderAuditTrail<R>>,
    cipher: Option<SensitiveFieldCipher>,
    audit_write_failures: AtomicU64,
}

impl<R: RepositoryProvider> GuardOrchestrator<R> {
    /// Create a guard with the default login policy and no field cipher
    ///
    /// Use [`GuardOrchestrator::builder`] to customize the policy, attach a
    /// cipher or register event handlers.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::from_parts(
            repositories,
            LoginGuardConfig::default(),
            None,
            SecurityEventBus::new(),
        )
    }

    /// Start building a guard over `repositories`
    pub fn builder(repositories: Arc<R>) -> GuardOrchestratorBuilder<WithStorage<R>> {
        GuardOrchestratorBuilder::new().with_repositories(repositories)
    }

    pub(crate) fn from_parts(
        repositories: Arc<R>,
        config: LoginGuardConfig,
        cipher: Option<SensitiveFieldCipher>,
        event_bus: SecurityEventBus,
    ) -> Self {
        let tracker = Arc::new(LoginAttemptTracker::new(
            Arc::new(LoginAttemptRepositoryAdapter::new(repositories.clone())),
            config,
        ));
        let audit = Arc::new(SecurityAuditTrail::with_event_bus(
            Arc::new(SecurityEventRepositoryAdapter::new(repositories.clone())),
            event_bus,
        ));

        Self {
            repositories,
            tracker,
            audit,
            cipher,
            audit_write_failures: AtomicU64::new(0),
        }
    }

    /// Run migrations for every repository
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Check that the storage backend is reachable
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    pub fn tracker(&self) -> &ProviderTracker<R> {
        &self.tracker
    }

    pub fn audit(&self) -> &ProviderAuditTrail<R> {
        &self.audit
    }

    pub fn cipher(&self) -> Option<&SensitiveFieldCipher> {
        self.cipher.as_ref()
    }

    /// Number of security events that could not be persisted since startup
    pub fn audit_write_failures(&self) -> u64 {
        self.audit_write_failures.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Login decisions
    // ------------------------------------------------------------------

    /// Whether a login for the pair may proceed to the credential check
    pub async fn can_attempt_login(&self, identifier: &str, ip: &str) -> Result<bool, Error> {
        self.tracker.can_attempt(identifier, ip).await
    }

    /// Whether the pair is currently locked out
    pub async fn is_user_blocked(&self, identifier: &str, ip: &str) -> Result<bool, Error> {
        self.tracker.is_locked(identifier, ip).await
    }

    pub async fn get_remaining_lockout_minutes(
        &self,
        identifier: &str,
        ip: &str,
    ) -> Result<i64, Error> {
        self.tracker.remaining_lockout_minutes(identifier, ip).await
    }

    /// Gate a login before credentials are checked.
    ///
    /// A blocked attempt is audited as a failed `LOGIN_ATTEMPT` and rejected
    /// with [`GuardError::TooManyAttempts`]. The rejection is the same whether
    /// or not the identifier belongs to an account.
    pub async fn check_login_allowed(
        &self,
        ctx: &RequestContext,
        identifier: &str,
    ) -> Result<(), Error> {
        let ip = ctx.client_ip();
        if self.tracker.can_attempt(identifier, ip).await? {
            return Ok(());
        }

        let retry_after_minutes = self
            .tracker
            .remaining_lockout_minutes(identifier, ip)
            .await?
            .max(1);

        tracing::warn!(
            identifier = %SensitiveFieldCipher::mask(identifier, LOG_VISIBLE_CHARS),
            ip = %ip,
            retry_after_minutes,
            "Blocked login attempt"
        );

        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::LoginAttempt,
                "Login attempt blocked: too many failed attempts",
                identifier,
            )
            .with_success(false)
            .with_json_data(&json!({ "retry_after_minutes": retry_after_minutes })),
        )
        .await;

        Err(GuardError::TooManyAttempts {
            retry_after_minutes,
        }
        .into())
    }

    /// Record the result of a credential check.
    ///
    /// Appends `LOGIN_SUCCESS` or `LOGIN_FAILURE`, plus `ACCOUNT_LOCKED` when
    /// this attempt locked the pair.
    pub async fn record_login_attempt(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        success: bool,
    ) -> Result<AttemptOutcome, Error> {
        let outcome = self
            .tracker
            .record(identifier, ctx.client_ip(), success)
            .await?;

        let (event_type, description) = if success {
            (SecurityEventType::LoginSuccess, "Successful login")
        } else {
            (SecurityEventType::LoginFailure, "Failed login attempt")
        };

        self.audit_event(
            NewSecurityEvent::from_context(ctx, event_type, description, identifier)
                .with_success(success)
                .with_json_data(&json!({
                    "failure_count": outcome.bucket.failure_count,
                    "locked": outcome.is_locked(),
                })),
        )
        .await;

        if outcome.newly_locked {
            self.audit_event(
                NewSecurityEvent::from_context(
                    ctx,
                    SecurityEventType::AccountLocked,
                    "Account locked after too many failed login attempts",
                    identifier,
                )
                .with_success(false)
                .with_json_data(&json!({
                    "failure_count": outcome.bucket.failure_count,
                    "locked_until": outcome.bucket.locked_until,
                })),
            )
            .await;
        }

        Ok(outcome)
    }

    /// Administratively clear failures and any lock for the pair.
    ///
    /// The `ACCOUNT_UNLOCKED` event is attributed to the unlocked pair; the
    /// administrator and their address go into `additional_data`.
    ///
    /// # Returns
    ///
    /// `false` if the pair has no bucket, in which case nothing is audited.
    pub async fn unlock_user(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        ip: &str,
        performed_by: &str,
    ) -> Result<bool, Error> {
        let unlocked = self.tracker.unlock(identifier, ip).await?;
        if !unlocked {
            return Ok(false);
        }

        self.audit_event(
            NewSecurityEvent::new(
                SecurityEventType::AccountUnlocked,
                format!("Account unlocked by {performed_by}"),
                identifier,
                ip,
            )
            .with_user_agent(ctx.user_agent().map(str::to_string))
            .with_success(true)
            .with_json_data(&json!({
                "performed_by": performed_by,
                "performed_from": ctx.client_ip(),
            })),
        )
        .await;

        Ok(true)
    }

    // ------------------------------------------------------------------
    // Audit recorders
    // ------------------------------------------------------------------

    /// Record an attempt to use an operation the caller is not permitted to use.
    pub async fn record_unauthorized_access(
        &self,
        ctx: &RequestContext,
        operation: &str,
        details: &str,
    ) -> Option<SecurityEvent> {
        tracing::warn!(
            operation,
            ip = %ctx.client_ip(),
            "Unauthorized access attempt"
        );

        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::UnauthorizedAccess,
                format!("Unauthorized access attempt: {operation}"),
                Self::principal(ctx),
            )
            .with_success(false)
            .with_additional_data(details),
        )
        .await
    }

    pub async fn record_security_violation(
        &self,
        ctx: &RequestContext,
        violation_type: &str,
        details: &str,
    ) -> Option<SecurityEvent> {
        tracing::warn!(
            violation_type,
            ip = %ctx.client_ip(),
            "Security violation"
        );

        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::SecurityViolation,
                format!("Security violation: {violation_type}"),
                Self::principal(ctx),
            )
            .with_success(false)
            .with_additional_data(details),
        )
        .await
    }

    pub async fn record_sensitive_operation(
        &self,
        ctx: &RequestContext,
        operation: &str,
        identifier: &str,
    ) -> Option<SecurityEvent> {
        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::SensitiveOperation,
                format!("Sensitive operation: {operation}"),
                identifier,
            )
            .with_success(true),
        )
        .await
    }

    pub async fn record_logout(
        &self,
        ctx: &RequestContext,
        identifier: &str,
    ) -> Option<SecurityEvent> {
        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::Logout,
                "User logged out",
                identifier,
            )
            .with_success(true),
        )
        .await
    }

    pub async fn record_password_change(
        &self,
        ctx: &RequestContext,
        identifier: &str,
        success: bool,
    ) -> Option<SecurityEvent> {
        let description = if success {
            "Password changed"
        } else {
            "Password change failed"
        };

        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::PasswordChange,
                description,
                identifier,
            )
            .with_success(success),
        )
        .await
    }

    pub async fn record_token_refresh(
        &self,
        ctx: &RequestContext,
        identifier: &str,
    ) -> Option<SecurityEvent> {
        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::TokenRefresh,
                "Access token refreshed",
                identifier,
            )
            .with_success(true),
        )
        .await
    }

    pub async fn record_data_access(
        &self,
        ctx: &RequestContext,
        resource: &str,
        identifier: &str,
    ) -> Option<SecurityEvent> {
        self.audit_event(
            NewSecurityEvent::from_context(
                ctx,
                SecurityEventType::DataAccess,
                format!("Data access: {resource}"),
                identifier,
            )
            .with_success(true),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Sensitive fields
    // ------------------------------------------------------------------

    /// Encrypt the sensitive fields of `record` before it is persisted
    pub fn seal_record<T: SensitiveFields + ?Sized>(&self, record: &mut T) -> Result<(), Error> {
        self.require_cipher()?.seal(record)?;
        Ok(())
    }

    /// Decrypt the sensitive fields of a persisted `record`
    pub fn open_record<T: SensitiveFields + ?Sized>(&self, record: &mut T) -> Result<(), Error> {
        self.require_cipher()?.open(record)?;
        Ok(())
    }

    fn require_cipher(&self) -> Result<&SensitiveFieldCipher, CryptoError> {
        self.cipher.as_ref().ok_or(CryptoError::MissingKey)
    }

    fn principal(ctx: &RequestContext) -> &str {
        ctx.principal().unwrap_or(ANONYMOUS_IDENTIFIER)
    }

    /// Append an event; a failure is logged and counted, never returned.
    async fn audit_event(&self, event: NewSecurityEvent) -> Option<SecurityEvent> {
        let event_type = event.event_type;
        let identifier = SensitiveFieldCipher::mask(&event.user_identifier, LOG_VISIBLE_CHARS);

        match self.audit.append(event).await {
            Ok(event) => Some(event),
            Err(e) => {
                self.audit_write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    event_type = %event_type,
                    identifier = %identifier,
                    "Failed to write security event"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::memory::InMemoryRepositoryProvider;

    fn guard() -> GuardOrchestrator<InMemoryRepositoryProvider> {
        let _ = tracing_subscriber::fmt().try_init();
        GuardOrchestrator::new(Arc::new(InMemoryRepositoryProvider::new()))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("10.0.0.5", Some("Mozilla/5.0".to_string()))
    }

    #[tokio::test]
    async fn test_recorders_use_principal_or_anonymous() {
        let guard = guard();

        let anonymous = guard
            .record_unauthorized_access(&ctx(), "DELETE /admin/users", "missing role")
            .await
            .unwrap();
        assert_eq!(anonymous.user_identifier, ANONYMOUS_IDENTIFIER);
        assert_eq!(anonymous.event_type, SecurityEventType::UnauthorizedAccess);
        assert_eq!(anonymous.success, Some(false));
        assert_eq!(anonymous.additional_data.as_deref(), Some("missing role"));
        assert_eq!(anonymous.user_agent.as_deref(), Some("Mozilla/5.0"));

        let violation = guard
            .record_security_violation(
                &ctx().with_principal("vet@clinic.com"),
                "CSRF_TOKEN_MISMATCH",
                "token did not match session",
            )
            .await
            .unwrap();
        assert_eq!(violation.user_identifier, "vet@clinic.com");
        assert_eq!(violation.description, "Security violation: CSRF_TOKEN_MISMATCH");
    }

    #[tokio::test]
    async fn test_recorders_write_typed_events() {
        let guard = guard();
        let ctx = ctx();

        guard
            .record_sensitive_operation(&ctx, "EXPORT_RECORDS", "a@b.com")
            .await
            .unwrap();
        guard.record_logout(&ctx, "a@b.com").await.unwrap();
        guard
            .record_password_change(&ctx, "a@b.com", false)
            .await
            .unwrap();
        guard.record_token_refresh(&ctx, "a@b.com").await.unwrap();
        guard
            .record_data_access(&ctx, "pets/42", "a@b.com")
            .await
            .unwrap();

        let types: Vec<_> = guard
            .audit()
            .by_identifier("a@b.com")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            [
                SecurityEventType::SensitiveOperation,
                SecurityEventType::Logout,
                SecurityEventType::PasswordChange,
                SecurityEventType::TokenRefresh,
                SecurityEventType::DataAccess,
            ]
        );
        assert_eq!(guard.audit_write_failures(), 0);
    }

    #[tokio::test]
    async fn test_sealing_requires_cipher() {
        struct Profile {
            tax_id: Option<String>,
        }

        impl SensitiveFields for Profile {
            fn sensitive_fields(&mut self) -> Vec<&mut Option<String>> {
                vec![&mut self.tax_id]
            }
        }

        let guard = guard();
        let mut profile = Profile {
            tax_id: Some("123-45-6789".to_string()),
        };

        let err = guard.seal_record(&mut profile).unwrap_err();
        assert!(err.is_crypto_error());
        assert_eq!(profile.tax_id.as_deref(), Some("123-45-6789"));
    }
}
