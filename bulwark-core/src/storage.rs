//! Persisted records and read models for the login guard and audit trail.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    events::SecurityEventType,
    id::{BUCKET_PREFIX, generate_prefixed_id},
};

/// Natural key of a [`LoginAttemptBucket`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub user_identifier: String,
    pub source_ip: String,
}

impl BucketKey {
    pub fn new(user_identifier: impl Into<String>, source_ip: impl Into<String>) -> Self {
        Self {
            user_identifier: user_identifier.into(),
            source_ip: source_ip.into(),
        }
    }
}

/// Brute force counter and lock state for one (identifier, source IP) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptBucket {
    pub id: String,
    pub user_identifier: String,
    pub source_ip: String,
    pub last_attempt_at: DateTime<Utc>,
    pub failure_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Incremented on every successful write; used for compare-and-swap
    pub version: i64,
}

impl LoginAttemptBucket {
    /// A fresh, unlocked bucket with no outstanding failures.
    pub fn new(key: &BucketKey, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_prefixed_id(BUCKET_PREFIX),
            user_identifier: key.user_identifier.clone(),
            source_ip: key.source_ip.clone(),
            last_attempt_at: now,
            failure_count: 0,
            locked_until: None,
            version: 0,
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey::new(&self.user_identifier, &self.source_ip)
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// A lock was set but its deadline has passed.
    pub fn lock_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until <= now)
    }

    /// The last attempt is older than `reset_window`.
    pub fn window_expired_at(&self, now: DateTime<Utc>, reset_window: Duration) -> bool {
        now - self.last_attempt_at > reset_window
    }

    pub fn clear(&mut self) {
        self.failure_count = 0;
        self.locked_until = None;
    }
}

/// Result of recording an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub bucket: LoginAttemptBucket,
    /// This attempt moved the bucket from open to locked
    pub newly_locked: bool,
}

impl AttemptOutcome {
    pub fn is_locked(&self) -> bool {
        self.bucket.is_locked_at(Utc::now())
    }
}

/// Conjunctive filter over the audit trail.
///
/// Unset fields match everything. Results are in insertion order unless
/// [`EventQuery::newest_first`] is set, in which case `limit` keeps the
/// most recent matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Match any of these types; empty matches all types
    pub event_types: Vec<SecurityEventType>,
    pub user_identifier: Option<String>,
    pub source_ip: Option<String>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Return matches in reverse insertion order
    pub newest_first: bool,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = SecurityEventType>) -> Self {
        self.event_types = types.into_iter().collect();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.user_identifier = Some(identifier.into());
        self
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Whether `event` satisfies every set filter (ignores `limit` and ordering).
    pub fn matches(&self, event: &crate::events::SecurityEvent) -> bool {
        (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && self
                .user_identifier
                .as_deref()
                .is_none_or(|id| event.user_identifier == id)
            && self
                .source_ip
                .as_deref()
                .is_none_or(|ip| event.source_ip == ip)
            && self.from.is_none_or(|from| event.occurred_at >= from)
            && self.to.is_none_or(|to| event.occurred_at <= to)
    }
}

/// Aggregate view of the audit trail over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatistics {
    pub window_start: DateTime<Utc>,
    pub total_events: u64,
    pub failed_logins: u64,
    pub violations: u64,
    /// Histogram in order of first appearance
    pub events_by_type: Vec<(SecurityEventType, u64)>,
    /// Busiest source IPs, ties broken by first appearance
    pub top_source_ips: Vec<(String, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NewSecurityEvent;

    #[test]
    fn test_new_bucket_is_open() {
        let now = Utc::now();
        let bucket = LoginAttemptBucket::new(&BucketKey::new("a@b.com", "10.0.0.5"), now);

        assert!(bucket.id.starts_with("lab_"));
        assert_eq!(bucket.failure_count, 0);
        assert_eq!(bucket.version, 0);
        assert!(!bucket.is_locked_at(now));
        assert!(!bucket.lock_lapsed_at(now));
        assert_eq!(bucket.key(), BucketKey::new("a@b.com", "10.0.0.5"));
    }

    #[test]
    fn test_lock_state_transitions_on_wall_clock() {
        let now = Utc::now();
        let mut bucket = LoginAttemptBucket::new(&BucketKey::new("a@b.com", "10.0.0.5"), now);
        bucket.failure_count = 5;
        bucket.locked_until = Some(now + Duration::minutes(30));

        assert!(bucket.is_locked_at(now));
        assert!(!bucket.is_locked_at(now + Duration::minutes(31)));
        assert!(bucket.lock_lapsed_at(now + Duration::minutes(31)));

        bucket.clear();
        assert_eq!(bucket.failure_count, 0);
        assert_eq!(bucket.locked_until, None);
    }

    #[test]
    fn test_window_expiry() {
        let now = Utc::now();
        let bucket = LoginAttemptBucket::new(&BucketKey::new("a@b.com", "10.0.0.5"), now);
        let window = Duration::minutes(15);

        assert!(!bucket.window_expired_at(now + Duration::minutes(15), window));
        assert!(bucket.window_expired_at(now + Duration::minutes(16), window));
    }

    #[test]
    fn test_event_query_matches() {
        let now = Utc::now();
        let event = NewSecurityEvent::new(
            SecurityEventType::LoginFailure,
            "Failed login",
            "a@b.com",
            "10.0.0.5",
        )
        .into_event(now);

        assert!(EventQuery::new().matches(&event));
        assert!(
            EventQuery::new()
                .with_types([SecurityEventType::LoginFailure, SecurityEventType::Logout])
                .with_identifier("a@b.com")
                .with_source_ip("10.0.0.5")
                .since(now)
                .until(now)
                .matches(&event)
        );
        assert!(
            !EventQuery::new()
                .with_types([SecurityEventType::Logout])
                .matches(&event)
        );
        assert!(!EventQuery::new().with_identifier("c@d.com").matches(&event));
        assert!(
            !EventQuery::new()
                .since(now + Duration::seconds(1))
                .matches(&event)
        );
    }
}
