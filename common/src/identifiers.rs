//! Identifier types for NostroVostro entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the default audit role. A history query made with this id
/// returns every journaled transaction.
pub const DEFAULT_AUDITOR_ID: &str = "AUDITOR";

/// Identifier of a financial institution.
///
/// Doubles as the storage key of the institution's record. Typically a BIC
/// or an assigned short code such as `BANKA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstitutionId(String);

impl InstitutionId {
    /// Create a new institution ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the institution ID format.
    pub fn is_valid(&self) -> bool {
        // Non-empty, alphanumeric with underscores; must not collide with
        // the reserved key namespaces (which all contain '/').
        !self.0.is_empty()
            && self.0.len() <= 64
            && self.0.chars().all(|c| c.is_alphanumeric() || c == '_')
    }
}

impl fmt::Display for InstitutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstitutionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstitutionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for InstitutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of a transaction in the journal. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The first sequence number handed out by an empty journal.
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    /// Create from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The sequence number following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Zero-padded form, so lexicographic key order equals journal order.
    pub fn padded(&self) -> String {
        format!("{:020}", self.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_institution_id_validation() {
        assert!(InstitutionId::new("BANKA").is_valid());
        assert!(InstitutionId::new("JPMORGAN_NY").is_valid());
        assert!(!InstitutionId::new("").is_valid());
        assert!(!InstitutionId::new("journal/head").is_valid());
        assert!(!InstitutionId::new("bank-with-dash").is_valid());
    }

    #[test]
    fn test_institution_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&InstitutionId::new("BANKA")).unwrap();
        assert_eq!(json, "\"BANKA\"");
    }

    #[test]
    fn test_sequence_padding_orders_lexicographically() {
        let a = SequenceNumber::new(9).padded();
        let b = SequenceNumber::new(10).padded();
        assert!(a < b);
        assert_eq!(SequenceNumber::FIRST.next().value(), 2);
    }
}
