//! Repository trait for login attempt buckets.

use async_trait::async_trait;

use crate::{
    Error,
    storage::{BucketKey, LoginAttemptBucket},
};

/// Storage for per-(identifier, source IP) brute force buckets.
///
/// Implementations never update a bucket unconditionally: every write goes
/// through [`compare_and_swap`](Self::compare_and_swap) so that concurrent
/// writers, including ones in other processes, cannot lose each other's
/// increments.
///
/// # Security Considerations
///
/// - Buckets are created for identifiers that do not exist as accounts, to
///   prevent user enumeration.
/// - Source IPs stored here may be subject to data retention regulations.
#[async_trait]
pub trait LoginAttemptRepository: Send + Sync + 'static {
    /// Load the bucket for `key`, if one has been created.
    async fn find(&self, key: &BucketKey) -> Result<Option<LoginAttemptBucket>, Error>;

    /// Insert a new bucket unless one already exists for its natural key.
    ///
    /// # Returns
    ///
    /// `false` when another writer created the bucket first. The caller should
    /// re-read it instead of retrying the insert.
    async fn insert(&self, bucket: &LoginAttemptBucket) -> Result<bool, Error>;

    /// Replace the stored bucket if its version still equals `expected_version`.
    ///
    /// On success the stored version becomes `expected_version + 1`; the caller
    /// is expected to have set `bucket.version` accordingly.
    ///
    /// # Returns
    ///
    /// `false` when the stored version differs (a lost race) or the bucket is gone.
    async fn compare_and_swap(
        &self,
        bucket: &LoginAttemptBucket,
        expected_version: i64,
    ) -> Result<bool, Error>;
}
