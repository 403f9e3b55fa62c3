//! Error model shared by the compiler and the runner.

use thiserror::Error;

/// Result type used by job execution.
pub type JobResult<T> = Result<T, JobError>;

/// A classified failure reported by the destination database.
///
/// Classification happens in the adapter that talks to the driver; everything
/// above it only sees these variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// Deadlock or serialization failure. The transaction was aborted by the
    /// server and the work can be retried as a whole.
    #[error("concurrency conflict ({code}): {message}")]
    Conflict { code: String, message: String },

    /// Any other error raised while running a statement.
    #[error("statement failed{}: {message}", code_suffix(.code))]
    Statement {
        code: Option<String>,
        message: String,
    },

    /// The connection is unusable (refused, closed, I/O failure).
    #[error("connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit/rollback called out of order.
    #[error("invalid transaction state: {0}")]
    TransactionState(String),
}

impl DatabaseError {
    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            code: None,
            message: message.into(),
        }
    }

    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Failure of a single job.
///
/// The runner branches on [`JobError::is_critical`]: a critical failure means
/// the job must be retried *and* the condition is systemic enough that the
/// rest of the batch should back off.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Explicitly classified failure with a criticality flag.
    #[error("job failed: {reason}")]
    Failed { reason: String, critical: bool },

    /// The payload did not contain a usable `id`/`type`.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Unclassified database failure, propagated unchanged.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl JobError {
    pub fn failed(reason: impl Into<String>, critical: bool) -> Self {
        Self::Failed {
            reason: reason.into(),
            critical,
        }
    }

    /// Critical retryable failure (deadlock, serialization conflict).
    pub fn critical(reason: impl Into<String>) -> Self {
        Self::failed(reason, true)
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Failed { critical: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_flagged_failures_are_critical() {
        assert!(JobError::critical("deadlock").is_critical());
        assert!(!JobError::failed("boom", false).is_critical());
        assert!(!JobError::invalid_payload("missing id").is_critical());

        let db: JobError = DatabaseError::conflict("40P01", "deadlock detected").into();
        assert!(!db.is_critical());
    }

    #[test]
    fn statement_error_display_includes_code_when_present() {
        let with_code = DatabaseError::Statement {
            code: Some("42P01".to_string()),
            message: "relation \"users\" does not exist".to_string(),
        };
        assert_eq!(
            with_code.to_string(),
            "statement failed (42P01): relation \"users\" does not exist"
        );

        let without = DatabaseError::statement("syntax error");
        assert_eq!(without.to_string(), "statement failed: syntax error");
    }
}
