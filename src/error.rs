//! Error types for the lock broker.
//!
//! Uses thiserror for derive macros. Ordinary lock contention is never an
//! error (acquire calls return `false`); only cancellation, lock-set failures
//! and configuration problems surface here.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for lock broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Invalid arguments, or a configuration file that cannot be read or validated.
    #[error("{0}")]
    UserError(String),

    /// A lock set could not obtain one of its locks.
    #[error("Lock acquisition failed: {0}")]
    LockUnavailable(String),

    /// A blocking wait was aborted because the holder was cancelled.
    #[error("Lock wait on {object} cancelled for holder {holder}")]
    Cancelled { object: String, holder: String },

    /// Snapshot or config (de)serialization failed.
    #[error("Serialization failed: {0}")]
    SerializationError(String),
}

impl BrokerError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BrokerError::UserError(_) => exit_codes::USER_ERROR,
            BrokerError::LockUnavailable(_) => exit_codes::LOCK_FAILURE,
            BrokerError::Cancelled { .. } => exit_codes::CANCELLED,
            BrokerError::SerializationError(_) => exit_codes::USER_ERROR,
        }
    }

    /// Whether this error is a cancelled wait rather than a failed acquisition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled { .. })
    }
}

/// Result type alias for lock broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_has_correct_exit_code() {
        let err = BrokerError::UserError("bad argument".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn test_lock_unavailable_has_correct_exit_code() {
        let err = BrokerError::LockUnavailable("connector locked".to_string());
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_has_correct_exit_code() {
        let err = BrokerError::Cancelled {
            object: "Security Group 'web' (7)".to_string(),
            holder: "sync-job#3".to_string(),
        };
        assert_eq!(err.exit_code(), exit_codes::CANCELLED);
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = BrokerError::LockUnavailable("Fail to gain lock for Job 'sync'.".to_string());
        assert_eq!(
            err.to_string(),
            "Lock acquisition failed: Fail to gain lock for Job 'sync'."
        );

        let err = BrokerError::Cancelled {
            object: "Job 'sync' (1)".to_string(),
            holder: "task#9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Lock wait on Job 'sync' (1) cancelled for holder task#9"
        );
    }
}
