//! In-memory storage backend
//!
//! Suitable for tests and single-process deployments where lockout state does
//! not need to survive a restart. Buckets live in a [`DashMap`] keyed by their
//! natural key, and compare-and-swap is performed under the map's shard lock.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::RwLock;

use crate::{
    Error,
    events::{NewSecurityEvent, SecurityEvent},
    repositories::{
        LoginAttemptRepository, LoginAttemptRepositoryProvider, RepositoryProvider,
        SecurityEventRepository, SecurityEventRepositoryProvider,
    },
    storage::{BucketKey, EventQuery, LoginAttemptBucket},
};

#[derive(Debug, Default)]
pub struct InMemoryLoginAttemptRepository {
    buckets: DashMap<BucketKey, LoginAttemptBucket>,
}

impl InMemoryLoginAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl LoginAttemptRepository for InMemoryLoginAttemptRepository {
    async fn find(&self, key: &BucketKey) -> Result<Option<LoginAttemptBucket>, Error> {
        Ok(self.buckets.get(key).map(|b| b.clone()))
    }

    async fn insert(&self, bucket: &LoginAttemptBucket) -> Result<bool, Error> {
        match self.buckets.entry(bucket.key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(bucket.clone());
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        bucket: &LoginAttemptBucket,
        expected_version: i64,
    ) -> Result<bool, Error> {
        match self.buckets.get_mut(&bucket.key()) {
            Some(mut stored) if stored.version == expected_version => {
                *stored = bucket.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySecurityEventRepository {
    events: RwLock<Vec<SecurityEvent>>,
}

impl InMemorySecurityEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecurityEventRepository for InMemorySecurityEventRepository {
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        // Stamp under the write lock so timestamps follow insertion order
        let mut events = self.events.write().await;
        let event = event.into_event(Utc::now());
        events.push(event.clone());
        Ok(event)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, Error> {
        let events = self.events.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);
        let matching = events.iter().filter(|e| query.matches(e));

        Ok(if query.newest_first {
            matching.rev().take(limit).cloned().collect()
        } else {
            matching.take(limit).cloned().collect()
        })
    }
}

/// [`RepositoryProvider`] backed entirely by process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepositoryProvider {
    login_attempts: InMemoryLoginAttemptRepository,
    security_events: InMemorySecurityEventRepository,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoginAttemptRepositoryProvider for InMemoryRepositoryProvider {
    type LoginAttemptRepo = InMemoryLoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        &self.login_attempts
    }
}

impl SecurityEventRepositoryProvider for InMemoryRepositoryProvider {
    type SecurityEventRepo = InMemorySecurityEventRepository;

    fn security_event(&self) -> &Self::SecurityEventRepo {
        &self.security_events
    }
}

#[async_trait]
impl RepositoryProvider for InMemoryRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
