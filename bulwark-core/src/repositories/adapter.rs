use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Error,
    events::{NewSecurityEvent, SecurityEvent},
    repositories::{LoginAttemptRepository, RepositoryProvider, SecurityEventRepository},
    storage::{BucketKey, EventQuery, LoginAttemptBucket},
};

/// Adapter that wraps a RepositoryProvider and implements [`LoginAttemptRepository`]
pub struct LoginAttemptRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> LoginAttemptRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> LoginAttemptRepository for LoginAttemptRepositoryAdapter<R> {
    async fn find(&self, key: &BucketKey) -> Result<Option<LoginAttemptBucket>, Error> {
        self.provider.login_attempt().find(key).await
    }

    async fn insert(&self, bucket: &LoginAttemptBucket) -> Result<bool, Error> {
        self.provider.login_attempt().insert(bucket).await
    }

    async fn compare_and_swap(
        &self,
        bucket: &LoginAttemptBucket,
        expected_version: i64,
    ) -> Result<bool, Error> {
        self.provider
            .login_attempt()
            .compare_and_swap(bucket, expected_version)
            .await
    }
}

/// Adapter that wraps a RepositoryProvider and implements [`SecurityEventRepository`]
pub struct SecurityEventRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SecurityEventRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SecurityEventRepository for SecurityEventRepositoryAdapter<R> {
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        self.provider.security_event().append(event).await
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.provider.security_event().query(query).await
    }
}
