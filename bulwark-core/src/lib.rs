//! Core functionality for the bulwark project
//!
//! This crate contains the building blocks of the login guard: the
//! [`LoginAttemptTracker`] brute force state machine, the append-only
//! [`SecurityAuditTrail`], the [`SensitiveFieldCipher`] for PII fields and the
//! per-request [`RequestContext`].
//!
//! Services depend only on the traits in [`repositories`]. Storage backends
//! implement [`RepositoryProvider`]; an in-memory backend lives in [`memory`]
//! and a SQLite backend in the `bulwark-storage-sqlite` crate.
//!
//! Application code usually goes through the `GuardOrchestrator` in the
//! `bulwark` crate rather than using these services directly.
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod events;
pub mod id;
pub mod memory;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod validation;

pub use config::LoginGuardConfig;
pub use context::RequestContext;
pub use crypto::{SensitiveFieldCipher, SensitiveFields};
pub use error::Error;
pub use events::{
    NewSecurityEvent, SecurityEvent, SecurityEventBus, SecurityEventHandler, SecurityEventType,
};
pub use repositories::RepositoryProvider;
pub use services::{LoginAttemptTracker, SecurityAuditTrail};
pub use storage::{AttemptOutcome, BucketKey, EventQuery, LoginAttemptBucket, SecurityStatistics};
