//! Repository trait for the append-only security audit trail.

use async_trait::async_trait;

use crate::{
    Error,
    events::{NewSecurityEvent, SecurityEvent},
    storage::EventQuery,
};

/// Append-only storage for [`SecurityEvent`]s.
///
/// Events are never updated or deleted here; retention is handled outside of
/// this crate.
#[async_trait]
pub trait SecurityEventRepository: Send + Sync + 'static {
    /// Persist a new event, assigning its id and timestamp.
    ///
    /// Failures are reported as [`AuditWriteFailure`](crate::error::AuditWriteFailure).
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error>;

    /// Events matching `query`, in insertion order.
    async fn query(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, Error>;
}
