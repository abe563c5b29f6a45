use crate::{
    Error,
    error::{AuditWriteFailure, StorageError},
};

/// Extension trait for Result types to simplify backend error mapping
///
/// Storage backends use these helpers to fold driver errors into the bulwark
/// error taxonomy without repeating the same `map_err` closures.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark_core::error::utilities::BackendResultExt;
///
/// query.execute(&pool).await.map_db_err_with_context("Failed to insert bucket")?;
/// query.execute(&pool).await.map_audit_err()?;
/// ```
pub trait BackendResultExt<T> {
    /// Convert a backend error to a storage error
    fn map_db_err(self) -> Result<T, Error>;

    /// Convert a backend error to a storage error with additional context
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;

    /// Convert a backend error raised while appending to the audit trail
    fn map_audit_err(self) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> BackendResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            Error::Storage(StorageError::Database(format!("{context}: {e}")))
        })
    }

    fn map_audit_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Audit(AuditWriteFailure::Persistence(e.to_string())))
    }
}
