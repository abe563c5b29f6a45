use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    context::RequestContext,
    error::{Error, ValidationError},
    id::{EVENT_PREFIX, generate_prefixed_id},
};

/// Closed set of security event kinds.
///
/// Stored and serialized as the canonical SCREAMING_SNAKE_CASE name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    LoginAttempt,
    LoginSuccess,
    LoginFailure,
    Logout,
    PasswordChange,
    AccountLocked,
    AccountUnlocked,
    UnauthorizedAccess,
    SecurityViolation,
    TokenRefresh,
    DataAccess,
    SensitiveOperation,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 12] = [
        SecurityEventType::LoginAttempt,
        SecurityEventType::LoginSuccess,
        SecurityEventType::LoginFailure,
        SecurityEventType::Logout,
        SecurityEventType::PasswordChange,
        SecurityEventType::AccountLocked,
        SecurityEventType::AccountUnlocked,
        SecurityEventType::UnauthorizedAccess,
        SecurityEventType::SecurityViolation,
        SecurityEventType::TokenRefresh,
        SecurityEventType::DataAccess,
        SecurityEventType::SensitiveOperation,
    ];

    /// Event types counted as violations in queries and statistics.
    pub const VIOLATIONS: [SecurityEventType; 2] = [
        SecurityEventType::SecurityViolation,
        SecurityEventType::UnauthorizedAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginAttempt => "LOGIN_ATTEMPT",
            SecurityEventType::LoginSuccess => "LOGIN_SUCCESS",
            SecurityEventType::LoginFailure => "LOGIN_FAILURE",
            SecurityEventType::Logout => "LOGOUT",
            SecurityEventType::PasswordChange => "PASSWORD_CHANGE",
            SecurityEventType::AccountLocked => "ACCOUNT_LOCKED",
            SecurityEventType::AccountUnlocked => "ACCOUNT_UNLOCKED",
            SecurityEventType::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            SecurityEventType::SecurityViolation => "SECURITY_VIOLATION",
            SecurityEventType::TokenRefresh => "TOKEN_REFRESH",
            SecurityEventType::DataAccess => "DATA_ACCESS",
            SecurityEventType::SensitiveOperation => "SENSITIVE_OPERATION",
        }
    }

    pub fn is_violation(&self) -> bool {
        Self::VIOLATIONS.contains(self)
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEventType(s.to_string()))
    }
}

/// A persisted security audit record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: SecurityEventType,
    pub description: String,
    pub user_identifier: String,
    pub source_ip: String,
    pub user_agent: Option<String>,
    /// `None` when the outcome is not applicable or unknown
    pub success: Option<bool>,
    pub occurred_at: DateTime<Utc>,
    pub additional_data: Option<String>,
}

/// An event about to be appended to the audit trail.
///
/// The id and timestamp are assigned when the event is built into a
/// [`SecurityEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSecurityEvent {
    pub event_type: SecurityEventType,
    pub description: String,
    pub user_identifier: String,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub success: Option<bool>,
    pub additional_data: Option<String>,
}

impl NewSecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        description: impl Into<String>,
        user_identifier: impl Into<String>,
        source_ip: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            description: description.into(),
            user_identifier: user_identifier.into(),
            source_ip: source_ip.into(),
            user_agent: None,
            success: None,
            additional_data: None,
        }
    }

    /// Start an event whose source IP and user agent come from `ctx`.
    pub fn from_context(
        ctx: &RequestContext,
        event_type: SecurityEventType,
        description: impl Into<String>,
        user_identifier: impl Into<String>,
    ) -> Self {
        Self::new(event_type, description, user_identifier, ctx.client_ip())
            .with_user_agent(ctx.user_agent().map(str::to_string))
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_additional_data(mut self, data: impl Into<String>) -> Self {
        self.additional_data = Some(data.into());
        self
    }

    /// Serialize `data` as JSON into `additional_data`.
    pub fn with_json_data(self, data: &serde_json::Value) -> Self {
        self.with_additional_data(data.to_string())
    }

    /// Assign an id and timestamp.
    pub fn into_event(self, occurred_at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent {
            id: generate_prefixed_id(EVENT_PREFIX),
            event_type: self.event_type,
            description: self.description,
            user_identifier: self.user_identifier,
            source_ip: self.source_ip,
            user_agent: self.user_agent,
            success: self.success,
            occurred_at,
            additional_data: self.additional_data,
        }
    }
}

/// A trait for reacting to security events after they have been persisted
///
/// Handlers are the place for alerting or forwarding to a SIEM. They run
/// after the guard decision has been made, and their failures never change it.
///
/// # Examples
///
/// ```
/// # use bulwark_core::events::{SecurityEvent, SecurityEventHandler};
/// # use bulwark_core::Error;
/// # use async_trait::async_trait;
/// struct AlertOnLockout;
///
/// #[async_trait]
/// impl SecurityEventHandler for AlertOnLockout {
///     async fn handle_event(&self, event: &SecurityEvent) -> Result<(), Error> {
///         // Page someone...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SecurityEventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), Error>;
}

/// Fan-out of persisted security events to registered handlers
#[derive(Clone)]
pub struct SecurityEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn SecurityEventHandler>>>>,
}

impl Default for SecurityEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn SecurityEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Dispatch to every handler; returns how many handlers failed.
    ///
    /// A failing handler does not stop dispatch to the remaining ones.
    pub async fn emit(&self, event: &SecurityEvent) -> usize {
        let mut failures = 0;
        for handler in self.handlers.read().await.iter() {
            if let Err(e) = handler.handle_event(event).await {
                failures += 1;
                tracing::warn!(
                    error = %e,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Security event handler failed"
                );
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditWriteFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        call_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SecurityEventHandler for CountingHandler {
        async fn handle_event(&self, _event: &SecurityEvent) -> Result<(), Error> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ErroringHandler;

    #[async_trait]
    impl SecurityEventHandler for ErroringHandler {
        async fn handle_event(&self, _event: &SecurityEvent) -> Result<(), Error> {
            Err(AuditWriteFailure::Persistence("siem offline".into()).into())
        }
    }

    fn test_event() -> SecurityEvent {
        NewSecurityEvent::new(
            SecurityEventType::LoginFailure,
            "Failed login",
            "a@b.com",
            "10.0.0.5",
        )
        .with_success(false)
        .into_event(Utc::now())
    }

    #[test]
    fn test_event_type_round_trips_through_canonical_name() {
        for event_type in SecurityEventType::ALL {
            let parsed: SecurityEventType = event_type.as_str().parse().unwrap();
            assert_eq!(parsed, event_type);
        }
        assert_eq!(SecurityEventType::AccountUnlocked.to_string(), "ACCOUNT_UNLOCKED");
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = "LOGIN".parse::<SecurityEventType>();
        assert!(matches!(result, Err(ValidationError::UnknownEventType(s)) if s == "LOGIN"));
    }

    #[test]
    fn test_event_type_serde_uses_canonical_name() {
        let json = serde_json::to_string(&SecurityEventType::SensitiveOperation).unwrap();
        assert_eq!(json, "\"SENSITIVE_OPERATION\"");
    }

    #[test]
    fn test_violation_types() {
        assert!(SecurityEventType::SecurityViolation.is_violation());
        assert!(SecurityEventType::UnauthorizedAccess.is_violation());
        assert!(!SecurityEventType::LoginFailure.is_violation());
    }

    #[test]
    fn test_from_context_copies_ip_and_user_agent() {
        let ctx = RequestContext::new("10.0.0.5", Some("Mozilla/5.0".to_string()));
        let event = NewSecurityEvent::from_context(
            &ctx,
            SecurityEventType::Logout,
            "User logged out",
            "a@b.com",
        )
        .into_event(Utc::now());

        assert!(event.id.starts_with("sev_"));
        assert_eq!(event.source_ip, "10.0.0.5");
        assert_eq!(event.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(event.success, None);
    }

    #[tokio::test]
    async fn test_event_bus_empty() {
        let bus = SecurityEventBus::default();
        assert_eq!(bus.emit(&test_event()).await, 0);
    }

    #[tokio::test]
    async fn test_event_bus_failures_do_not_stop_dispatch() {
        let bus = SecurityEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.register(Arc::new(ErroringHandler)).await;
        bus.register(Arc::new(CountingHandler {
            call_count: count.clone(),
        }))
        .await;

        assert_eq!(bus.emit(&test_event()).await, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
