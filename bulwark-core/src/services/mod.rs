//! Service layer for guard and audit logic
//!
//! Services encapsulate the decision logic and depend only on the repository
//! traits, so they run unchanged against any storage backend.

pub mod audit;
pub mod login_attempt;

pub use audit::SecurityAuditTrail;
pub use login_attempt::LoginAttemptTracker;
