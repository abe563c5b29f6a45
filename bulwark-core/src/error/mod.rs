pub mod utilities;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Audit write failure: {0}")]
    Audit(#[from] AuditWriteFailure),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Guard(#[from] GuardError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Unknown security event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Error)]
pub enum ConcurrencyError {
    #[error("Lost update on login attempt bucket for {identifier} after {attempts} attempts")]
    RetriesExhausted { identifier: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Field encryption key is not configured")]
    MissingKey,

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed")]
    Decryption,

    #[error("Random number generator failure: {0}")]
    Rng(String),
}

#[derive(Debug, Error)]
pub enum AuditWriteFailure {
    #[error("Failed to persist security event: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Decisions the guard reports back to the authentication flow.
///
/// The message is intentionally identical for known and unknown identifiers.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Too many login attempts. Please try again in {retry_after_minutes} minutes.")]
    TooManyAttempts { retry_after_minutes: i64 },
}

impl Error {
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_concurrency_error(&self) -> bool {
        matches!(self, Error::Concurrency(_))
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    pub fn is_audit_error(&self) -> bool {
        matches!(self, Error::Audit(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_too_many_attempts(&self) -> bool {
        matches!(self, Error::Guard(GuardError::TooManyAttempts { .. }))
    }

    /// Minutes until a blocked caller may retry, if this error is a lockout.
    pub fn retry_after_minutes(&self) -> Option<i64> {
        match self {
            Error::Guard(GuardError::TooManyAttempts {
                retry_after_minutes,
            }) => Some(*retry_after_minutes),
            _ => None,
        }
    }
}
