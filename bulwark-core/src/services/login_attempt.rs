//! Brute force protection keyed by (identifier, source IP).
//!
//! Each pair owns a [`LoginAttemptBucket`] that counts consecutive failures.
//! Reaching [`LoginGuardConfig::max_failures`] locks the pair for
//! [`LoginGuardConfig::lockout_duration`]; inactivity longer than
//! [`LoginGuardConfig::reset_window`] forgives outstanding failures. Locks are
//! wall-clock deadlines, so a lapsed lock is cleared by whichever call next
//! observes it.
//!
//! # Atomicity
//!
//! Every read-modify-write on a bucket runs under a per-key async mutex and is
//! committed with a versioned compare-and-swap. The mutex serializes callers
//! within this process; the compare-and-swap catches writers in other
//! processes sharing the same storage. A lost swap is retried up to
//! [`LoginGuardConfig::max_update_retries`] times before surfacing as a
//! [`ConcurrencyError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark_core::services::LoginAttemptTracker;
//!
//! let tracker = LoginAttemptTracker::new(repository, LoginGuardConfig::default());
//!
//! if !tracker.can_attempt("a@b.com", "10.0.0.5").await? {
//!     // Reject before checking credentials
//! }
//!
//! let outcome = tracker.record("a@b.com", "10.0.0.5", false).await?;
//! if outcome.newly_locked {
//!     // Alert
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    Error,
    config::LoginGuardConfig,
    crypto::SensitiveFieldCipher,
    error::{ConcurrencyError, StorageError},
    repositories::LoginAttemptRepository,
    storage::{AttemptOutcome, BucketKey, LoginAttemptBucket},
    validation::{validate_identifier, validate_source_ip},
};

/// Characters of an identifier left visible in log output.
const LOG_VISIBLE_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    Create,
    Skip,
}

/// Stateful login guard.
///
/// Thread-safe; share one instance (behind an `Arc`) across all request
/// handlers so that the per-key locks are shared too.
pub struct LoginAttemptTracker<R: LoginAttemptRepository> {
    repository: Arc<R>,
    config: LoginGuardConfig,
    key_locks: DashMap<BucketKey, Arc<Mutex<()>>>,
}

impl<R: LoginAttemptRepository> LoginAttemptTracker<R> {
    pub fn new(repository: Arc<R>, config: LoginGuardConfig) -> Self {
        Self {
            repository,
            config,
            key_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoginGuardConfig {
        &self.config
    }

    /// Whether a login may be attempted for this pair right now.
    ///
    /// Creates the bucket on first sight. A stale window or a lapsed lock is
    /// forgiven (and persisted) before the decision is made.
    pub async fn can_attempt(&self, identifier: &str, ip: &str) -> Result<bool, Error> {
        let key = Self::key(identifier, ip)?;
        let max_failures = self.config.max_failures;
        let reset_window = self.config.reset_window;

        let allowed = self
            .apply(&key, OnMissing::Create, |bucket, now| {
                if bucket.is_locked_at(now) {
                    return false;
                }
                if bucket.lock_lapsed_at(now) || bucket.window_expired_at(now, reset_window) {
                    bucket.clear();
                }
                bucket.failure_count < max_failures
            })
            .await?
            .is_some_and(|(_, allowed)| allowed);

        if !allowed {
            tracing::warn!(
                identifier = %SensitiveFieldCipher::mask(identifier, LOG_VISIBLE_CHARS),
                ip = %ip,
                "Login attempt blocked"
            );
        }

        Ok(allowed)
    }

    /// Whether the pair is currently locked.
    ///
    /// Never creates a bucket. A lapsed lock is cleared as a side effect.
    pub async fn is_locked(&self, identifier: &str, ip: &str) -> Result<bool, Error> {
        let key = Self::key(identifier, ip)?;

        Ok(self
            .apply(&key, OnMissing::Skip, |bucket, now| {
                if bucket.lock_lapsed_at(now) {
                    bucket.clear();
                }
                bucket.is_locked_at(now)
            })
            .await?
            .is_some_and(|(_, locked)| locked))
    }

    /// Record the result of a credential check.
    ///
    /// A success clears all failures and any lock. A failure increments the
    /// count and locks the pair when the threshold is reached. Failures while
    /// a lock is active neither extend the lock nor grow the count.
    pub async fn record(
        &self,
        identifier: &str,
        ip: &str,
        success: bool,
    ) -> Result<AttemptOutcome, Error> {
        let key = Self::key(identifier, ip)?;
        let max_failures = self.config.max_failures;
        let lockout_duration = self.config.lockout_duration;
        let reset_window = self.config.reset_window;

        let (bucket, newly_locked) = self
            .apply(&key, OnMissing::Create, |bucket, now| {
                if success {
                    bucket.clear();
                    bucket.last_attempt_at = now;
                    return false;
                }

                if !bucket.is_locked_at(now)
                    && (bucket.lock_lapsed_at(now) || bucket.window_expired_at(now, reset_window))
                {
                    bucket.clear();
                }
                bucket.last_attempt_at = now;

                if bucket.is_locked_at(now) {
                    return false;
                }

                bucket.failure_count = bucket.failure_count.saturating_add(1).min(max_failures);
                if bucket.failure_count >= max_failures {
                    // An unvalidated policy may overflow; stay locked rather than panic
                    bucket.locked_until = Some(
                        now.checked_add_signed(lockout_duration)
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    );
                    return true;
                }
                false
            })
            .await?
            .ok_or_else(|| {
                Error::Storage(StorageError::Database(
                    "login attempt bucket disappeared during update".to_string(),
                ))
            })?;

        if newly_locked {
            tracing::info!(
                identifier = %SensitiveFieldCipher::mask(identifier, LOG_VISIBLE_CHARS),
                ip = %ip,
                failures = bucket.failure_count,
                locked_until = ?bucket.locked_until,
                "Login attempt bucket locked"
            );
        } else {
            tracing::debug!(
                identifier = %SensitiveFieldCipher::mask(identifier, LOG_VISIBLE_CHARS),
                ip = %ip,
                success,
                failures = bucket.failure_count,
                "Recorded login attempt"
            );
        }

        Ok(AttemptOutcome {
            bucket,
            newly_locked,
        })
    }

    /// Whole minutes until the lock lapses, rounded up; 0 when not locked.
    pub async fn remaining_lockout_minutes(&self, identifier: &str, ip: &str) -> Result<i64, Error> {
        let key = Self::key(identifier, ip)?;
        let now = Utc::now();

        let remaining = self
            .repository
            .find(&key)
            .await?
            .and_then(|bucket| bucket.locked_until)
            .filter(|until| *until > now)
            .map(|until| {
                let millis = (until - now).num_milliseconds();
                ((millis + 59_999) / 60_000).max(1)
            })
            .unwrap_or(0);

        Ok(remaining)
    }

    /// Clear failures and any lock for the pair.
    ///
    /// # Returns
    ///
    /// `false` if no bucket exists for the pair.
    pub async fn unlock(&self, identifier: &str, ip: &str) -> Result<bool, Error> {
        let key = Self::key(identifier, ip)?;

        let unlocked = self
            .apply(&key, OnMissing::Skip, |bucket, _| bucket.clear())
            .await?
            .is_some();

        if unlocked {
            tracing::info!(
                identifier = %SensitiveFieldCipher::mask(identifier, LOG_VISIBLE_CHARS),
                ip = %ip,
                "Login attempt bucket unlocked"
            );
        }

        Ok(unlocked)
    }

    /// Read-only snapshot of the bucket for the pair.
    pub async fn status(
        &self,
        identifier: &str,
        ip: &str,
    ) -> Result<Option<LoginAttemptBucket>, Error> {
        let key = Self::key(identifier, ip)?;
        self.repository.find(&key).await
    }

    fn key(identifier: &str, ip: &str) -> Result<BucketKey, Error> {
        validate_identifier(identifier)?;
        validate_source_ip(ip)?;
        Ok(BucketKey::new(identifier, ip))
    }

    /// Run `transition` against the current bucket and commit the result.
    ///
    /// The transition may be invoked more than once if the swap is lost. When
    /// it leaves the bucket unchanged nothing is written.
    async fn apply<T>(
        &self,
        key: &BucketKey,
        on_missing: OnMissing,
        mut transition: impl FnMut(&mut LoginAttemptBucket, DateTime<Utc>) -> T,
    ) -> Result<Option<(LoginAttemptBucket, T)>, Error> {
        // Declared first so it drops last, after this caller's clone is gone
        let _prune = PruneKeyLock {
            locks: &self.key_locks,
            key,
        };
        let lock = self.key_locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;
        self.apply_locked(key, on_missing, &mut transition).await
    }

    async fn apply_locked<T>(
        &self,
        key: &BucketKey,
        on_missing: OnMissing,
        transition: &mut impl FnMut(&mut LoginAttemptBucket, DateTime<Utc>) -> T,
    ) -> Result<Option<(LoginAttemptBucket, T)>, Error> {
        let attempts = self.config.max_update_retries + 1;

        for attempt in 1..=attempts {
            let now = Utc::now();
            let current = match self.repository.find(key).await? {
                Some(bucket) => bucket,
                None if on_missing == OnMissing::Create => {
                    let fresh = LoginAttemptBucket::new(key, now);
                    if !self.repository.insert(&fresh).await? {
                        tracing::debug!(attempt, "Lost bucket creation race, re-reading");
                        continue;
                    }
                    fresh
                }
                None => return Ok(None),
            };

            let mut next = current.clone();
            let value = transition(&mut next, now);
            if next == current {
                return Ok(Some((next, value)));
            }

            next.version = current.version + 1;
            if self
                .repository
                .compare_and_swap(&next, current.version)
                .await?
            {
                return Ok(Some((next, value)));
            }

            tracing::warn!(
                attempt,
                max_attempts = attempts,
                ip = %key.source_ip,
                "Concurrent update on login attempt bucket, retrying"
            );
        }

        Err(ConcurrencyError::RetriesExhausted {
            identifier: SensitiveFieldCipher::mask(&key.user_identifier, LOG_VISIBLE_CHARS),
            attempts,
        }
        .into())
    }
}

/// Removes the per-key mutex from the map once no caller holds it.
///
/// Runs on every exit from `apply`, including when the caller's future is
/// dropped while waiting for the mutex.
struct PruneKeyLock<'a> {
    locks: &'a DashMap<BucketKey, Arc<Mutex<()>>>,
    key: &'a BucketKey,
}

impl Drop for PruneKeyLock<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
