//! SQLite implementation of the login attempt bucket repository.

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::{StorageError, utilities::BackendResultExt},
    id::{BUCKET_PREFIX, validate_prefixed_id},
    repositories::LoginAttemptRepository,
    storage::{BucketKey, LoginAttemptBucket},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct SqliteLoginAttemptRepository {
    pool: SqlitePool,
}

impl SqliteLoginAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteLoginAttemptBucket {
    id: String,
    user_identifier: String,
    source_ip: String,
    last_attempt_at: i64,
    failure_count: i64,
    locked_until: Option<i64>,
    version: i64,
}

impl TryFrom<SqliteLoginAttemptBucket> for LoginAttemptBucket {
    type Error = Error;

    fn try_from(row: SqliteLoginAttemptBucket) -> Result<Self, Self::Error> {
        if !validate_prefixed_id(&row.id, BUCKET_PREFIX) {
            return Err(StorageError::Database(format!("Invalid bucket id {}", row.id)).into());
        }

        Ok(LoginAttemptBucket {
            id: row.id,
            user_identifier: row.user_identifier,
            source_ip: row.source_ip,
            last_attempt_at: from_millis(row.last_attempt_at)?,
            failure_count: u32::try_from(row.failure_count).map_err(|_| {
                StorageError::Database(format!("Invalid failure count {}", row.failure_count))
            })?,
            locked_until: row.locked_until.map(from_millis).transpose()?,
            version: row.version,
        })
    }
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Database(format!("Invalid timestamp {millis}")).into())
}

#[async_trait]
impl LoginAttemptRepository for SqliteLoginAttemptRepository {
    async fn find(&self, key: &BucketKey) -> Result<Option<LoginAttemptBucket>, Error> {
        let row = sqlx::query_as::<_, SqliteLoginAttemptBucket>(
            r#"
            SELECT id, user_identifier, source_ip, last_attempt_at, failure_count, locked_until, version
            FROM login_attempt_buckets
            WHERE user_identifier = ? AND source_ip = ?
            "#,
        )
        .bind(&key.user_identifier)
        .bind(&key.source_ip)
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to load login attempt bucket")?;

        row.map(LoginAttemptBucket::try_from).transpose()
    }

    async fn insert(&self, bucket: &LoginAttemptBucket) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO login_attempt_buckets
                (id, user_identifier, source_ip, last_attempt_at, failure_count, locked_until, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_identifier, source_ip) DO NOTHING
            "#,
        )
        .bind(&bucket.id)
        .bind(&bucket.user_identifier)
        .bind(&bucket.source_ip)
        .bind(bucket.last_attempt_at.timestamp_millis())
        .bind(i64::from(bucket.failure_count))
        .bind(bucket.locked_until.map(|t| t.timestamp_millis()))
        .bind(bucket.version)
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to insert login attempt bucket")?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        bucket: &LoginAttemptBucket,
        expected_version: i64,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE login_attempt_buckets
            SET last_attempt_at = ?, failure_count = ?, locked_until = ?, version = ?
            WHERE user_identifier = ? AND source_ip = ? AND version = ?
            "#,
        )
        .bind(bucket.last_attempt_at.timestamp_millis())
        .bind(i64::from(bucket.failure_count))
        .bind(bucket.locked_until.map(|t| t.timestamp_millis()))
        .bind(bucket.version)
        .bind(&bucket.user_identifier)
        .bind(&bucket.source_ip)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to update login attempt bucket")?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{MigrationManager, SqliteMigrationManager, all_migrations};
    use chrono::Duration;

    async fn setup_test_db() -> SqlitePool {
        let _ = tracing_subscriber::fmt().try_init();
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let manager = SqliteMigrationManager::new(pool.clone());
        manager
            .initialize()
            .await
            .expect("Failed to initialize migrations");
        manager
            .up(&all_migrations())
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn key() -> BucketKey {
        BucketKey::new("a@b.com", "10.0.0.5")
    }

    #[tokio::test]
    async fn test_find_missing_bucket() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        assert!(repo.find(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        let mut bucket = LoginAttemptBucket::new(&key(), Utc::now());
        bucket.failure_count = 2;
        bucket.locked_until = Some(Utc::now() + Duration::minutes(30));

        assert!(repo.insert(&bucket).await.unwrap());

        let stored = repo.find(&key()).await.unwrap().unwrap();
        assert_eq!(stored.id, bucket.id);
        assert_eq!(stored.failure_count, 2);
        assert_eq!(
            stored.last_attempt_at.timestamp_millis(),
            bucket.last_attempt_at.timestamp_millis()
        );
        assert_eq!(
            stored.locked_until.map(|t| t.timestamp_millis()),
            bucket.locked_until.map(|t| t.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_insert_conflict_returns_false() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        let first = LoginAttemptBucket::new(&key(), Utc::now());
        let second = LoginAttemptBucket::new(&key(), Utc::now());

        assert!(repo.insert(&first).await.unwrap());
        assert!(!repo.insert(&second).await.unwrap());
        assert_eq!(repo.find(&key()).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        let mut bucket = LoginAttemptBucket::new(&key(), Utc::now());
        repo.insert(&bucket).await.unwrap();

        bucket.failure_count = 1;
        bucket.version = 1;
        assert!(repo.compare_and_swap(&bucket, 0).await.unwrap());

        let mut stale = bucket.clone();
        stale.failure_count = 4;
        assert!(!repo.compare_and_swap(&stale, 0).await.unwrap());

        let stored = repo.find(&key()).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_clears_lock() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        let mut bucket = LoginAttemptBucket::new(&key(), Utc::now());
        bucket.failure_count = 5;
        bucket.locked_until = Some(Utc::now() + Duration::minutes(30));
        repo.insert(&bucket).await.unwrap();

        bucket.clear();
        bucket.version = 1;
        assert!(repo.compare_and_swap(&bucket, 0).await.unwrap());

        let stored = repo.find(&key()).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 0);
        assert_eq!(stored.locked_until, None);
    }

    #[tokio::test]
    async fn test_find_rejects_malformed_id() {
        let repo = SqliteLoginAttemptRepository::new(setup_test_db().await);
        let mut bucket = LoginAttemptBucket::new(&key(), Utc::now());
        bucket.id = "lab_short".to_string();
        repo.insert(&bucket).await.unwrap();

        assert!(repo.find(&key()).await.unwrap_err().is_storage_error());
    }
}
