//! Error types for NostroVostro settlement.
//!
//! Business-level rejections (invalid amount, missing accounts, insufficient
//! funds) are not errors: they are recorded on the journaled
//! [`Transaction`](crate::Transaction). The variants here are failures of the
//! call itself.

use crate::{CurrencyPair, InstitutionId};
use thiserror::Error;

/// Main error type for settlement operations.
#[derive(Error, Debug)]
pub enum SettleError {
    /// Instruction does not have the expected number of fields.
    #[error("Incorrect number of arguments. Expecting {expected} - MT103 format, got {actual}")]
    MalformedInstruction { expected: usize, actual: usize },

    /// Institution record not found in the store.
    #[error("Institution not found: {0}")]
    InstitutionNotFound(InstitutionId),

    /// Institution already registered.
    #[error("Institution already exists: {0}")]
    InstitutionExists(InstitutionId),

    /// Invalid institution identifier.
    #[error("Invalid institution id: {0:?}")]
    InvalidInstitutionId(String),

    /// An institution record lists the same holder twice.
    #[error("Duplicate relationship: {owner} already keeps an account for {holder}")]
    DuplicateRelationship {
        owner: InstitutionId,
        holder: InstitutionId,
    },

    /// A balance change would leave the decimal range.
    #[error("Balance overflow: {owner} account for {holder}")]
    BalanceOverflow {
        owner: InstitutionId,
        holder: InstitutionId,
    },

    /// No FX factor configured for the pair.
    #[error("Unknown currency pair: {0}")]
    UnknownCurrencyPair(CurrencyPair),

    /// One settlement leg was written and the other was not.
    #[error("Partial commit for {ref_number}: {reason} (compensated: {compensated})")]
    PartialCommit {
        ref_number: String,
        reason: String,
        compensated: bool,
    },

    /// A version-checked write lost to a concurrent writer.
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// Optimistic concurrency retries exhausted.
    #[error("Concurrent modification of {ref_number} after {attempts} attempts")]
    ConcurrentModification { ref_number: String, attempts: u32 },

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Service is not accepting requests (starting, recovering or stopped).
    #[error("Service not accepting requests")]
    NotAccepting,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SettleError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettleError::Conflict(_)
                | SettleError::ConcurrentModification { .. }
                | SettleError::Timeout(_)
                | SettleError::NotAccepting
        )
    }

    /// Whether the ledger may be left unbalanced by this failure.
    pub fn is_ledger_inconsistency(&self) -> bool {
        matches!(self, SettleError::PartialCommit { compensated: false, .. })
    }

    /// Get error code for responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            SettleError::MalformedInstruction { .. } => "MALFORMED_INSTRUCTION",
            SettleError::InstitutionNotFound(_) => "LOOKUP_FAILURE",
            SettleError::InstitutionExists(_) => "INSTITUTION_EXISTS",
            SettleError::InvalidInstitutionId(_) => "INVALID_INSTITUTION_ID",
            SettleError::DuplicateRelationship { .. } => "DUPLICATE_RELATIONSHIP",
            SettleError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            SettleError::UnknownCurrencyPair(_) => "UNKNOWN_CURRENCY_PAIR",
            SettleError::PartialCommit { .. } => "PARTIAL_COMMIT",
            SettleError::Conflict(_) => "WRITE_CONFLICT",
            SettleError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            SettleError::Timeout(_) => "TIMEOUT",
            SettleError::Storage(_) => "STORAGE_ERROR",
            SettleError::Serialization(_) => "SERIALIZATION_ERROR",
            SettleError::NotAccepting => "NOT_ACCEPTING",
            SettleError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for SettleError {
    fn from(e: serde_json::Error) -> Self {
        SettleError::Serialization(e.to_string())
    }
}

/// Result type alias for settlement operations.
pub type Result<T> = std::result::Result<T, SettleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SettleError::Timeout("settle".into()).is_retryable());
        assert!(SettleError::ConcurrentModification {
            ref_number: "R1".into(),
            attempts: 3
        }
        .is_retryable());
        assert!(!SettleError::InstitutionNotFound("BANKX".into()).is_retryable());
    }

    #[test]
    fn test_partial_commit_is_distinct() {
        let uncompensated = SettleError::PartialCommit {
            ref_number: "R1".into(),
            reason: "debit failed".into(),
            compensated: false,
        };
        assert!(uncompensated.is_ledger_inconsistency());
        assert_eq!(uncompensated.error_code(), "PARTIAL_COMMIT");

        let compensated = SettleError::PartialCommit {
            ref_number: "R1".into(),
            reason: "debit failed".into(),
            compensated: true,
        };
        assert!(!compensated.is_ledger_inconsistency());
    }
}
