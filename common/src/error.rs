//! Error types for ledger operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Steps of a transfer, in the order the engine runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
    /// Inserting the transfer record.
    CreateTransfer,
    /// Inserting the debit entry on the source account.
    CreateFromEntry,
    /// Inserting the credit entry on the destination account.
    CreateToEntry,
    /// Adjusting the source account balance.
    AdjustFromBalance,
    /// Adjusting the destination account balance.
    AdjustToBalance,
}

impl TransferStep {
    /// Stable name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStep::CreateTransfer => "create_transfer",
            TransferStep::CreateFromEntry => "create_from_entry",
            TransferStep::CreateToEntry => "create_to_entry",
            TransferStep::AdjustFromBalance => "adjust_from_balance",
            TransferStep::AdjustToBalance => "adjust_to_balance",
        }
    }
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Store-level I/O or constraint failure.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// A single-row lookup matched nothing.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Gave up waiting for a row lock held by another transaction.
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    /// The store aborted the transaction to keep it serializable.
    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    /// The unit of work failed and the rollback that followed failed too.
    #[error("{source} (rollback also failed: {rollback})")]
    RollbackFailure {
        source: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    /// A transfer step failed; the whole transfer was aborted.
    #[error("Transfer step {step} failed: {source}")]
    StepFailed {
        step: TransferStep,
        source: Box<LedgerError>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LedgerError {
    /// Annotate an error with the transfer step that produced it.
    pub fn at_step(self, step: TransferStep) -> Self {
        LedgerError::StepFailed {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through step annotations.
    ///
    /// For a rollback failure this is the root cause of the original error,
    /// not of the rollback.
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::StepFailed { source, .. } => source.root_cause(),
            LedgerError::RollbackFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The transfer step that failed, if the error carries one.
    pub fn failed_step(&self) -> Option<TransferStep> {
        match self {
            LedgerError::StepFailed { step, .. } => Some(*step),
            LedgerError::RollbackFailure { source, .. } => source.failed_step(),
            _ => None,
        }
    }

    /// Check if the caller may retry the whole operation.
    ///
    /// Only contention errors qualify. A rollback failure never does: the
    /// state of the connection that failed to roll back is unknown.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::LockTimeout(_) | LedgerError::SerializationConflict(_) => true,
            LedgerError::StepFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::LockTimeout(_) => "LOCK_TIMEOUT",
            LedgerError::SerializationConflict(_) => "SERIALIZATION_CONFLICT",
            LedgerError::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            LedgerError::StepFailed { source, .. } => source.error_code(),
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
