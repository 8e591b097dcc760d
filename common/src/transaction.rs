//! Payment instructions and journaled transactions.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, InstitutionId, SettleError};

/// Message recorded on a transaction that settled.
pub const COMPLETED_MESSAGE: &str = "Transaction Completed";

/// A raw payment instruction in the ten-field MT103-style wire layout.
///
/// The amount is kept as submitted; parsing it is part of validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
    pub ref_number: String,
    pub op_code: String,
    pub value_date: String,
    pub currency: Currency,
    pub amount: String,
    pub sender: InstitutionId,
    pub receiver: InstitutionId,
    pub ordering_customer: String,
    pub beneficiary_customer: String,
    pub charges_detail: String,
}

impl PaymentInstruction {
    /// Number of fields in the wire layout.
    pub const FIELD_COUNT: usize = 10;

    /// Build from ordered wire fields.
    ///
    /// `refNumber, opCode, valueDate, currency, amount, sender, receiver,
    /// orderingCustomer, beneficiaryCustomer, chargesDetail`
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, SettleError> {
        if fields.len() != Self::FIELD_COUNT {
            return Err(SettleError::MalformedInstruction {
                expected: Self::FIELD_COUNT,
                actual: fields.len(),
            });
        }

        let field = |i: usize| fields[i].as_ref().to_string();

        Ok(Self {
            ref_number: field(0),
            op_code: field(1),
            value_date: field(2),
            currency: Currency::new(field(3)),
            amount: field(4),
            sender: InstitutionId::new(field(5)),
            receiver: InstitutionId::new(field(6)),
            ordering_customer: field(7),
            beneficiary_customer: field(8),
            charges_detail: field(9),
        })
    }
}

/// Outcome code stored on a transaction. Serialized as `1` / `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusCode {
    /// Validation passed and both legs were posted.
    Completed,
    /// Rejected by validation; no balance changed.
    Failed,
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> u8 {
        match code {
            StatusCode::Completed => 1,
            StatusCode::Failed => 0,
        }
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusCode::Completed),
            0 => Ok(StatusCode::Failed),
            other => Err(format!("unknown status code {}", other)),
        }
    }
}

/// Business-level reasons a transaction can be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Amount field is not a decimal number.
    InvalidAmount,
    /// Receiver keeps no account for the sender.
    NostroAccountMissing {
        sender: InstitutionId,
        receiver: InstitutionId,
    },
    /// No FX pair from the instruction currency to the nostro currency.
    InvalidCurrency,
    /// Converted amount exceeds the nostro balance.
    InsufficientFunds,
    /// Sender's account for the receiver is in another currency.
    VostroCurrencyMismatch {
        sender: InstitutionId,
        receiver: InstitutionId,
        currency: Currency,
    },
    /// Sender keeps no account for the receiver.
    VostroAccountMissing {
        sender: InstitutionId,
        receiver: InstitutionId,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidAmount => write!(f, "Invalid Amount"),
            FailureReason::NostroAccountMissing { sender, receiver } => {
                write!(f, "Nostro Account for {} doesn't exist in {}", sender, receiver)
            }
            FailureReason::InvalidCurrency => write!(f, "Invalid Currency"),
            FailureReason::InsufficientFunds => write!(f, "Insufficient funds on Nostro Account"),
            FailureReason::VostroCurrencyMismatch {
                sender,
                receiver,
                currency,
            } => write!(
                f,
                "{} doesn't have an account in {} with {}",
                receiver, currency, sender
            ),
            FailureReason::VostroAccountMissing { sender, receiver } => {
                write!(f, "Vostro Account for {} doesn't exist in {}", receiver, sender)
            }
        }
    }
}

/// One settlement instruction together with its outcome.
///
/// Field names follow the existing ledger data; the descriptive names are
/// accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "refNumber")]
    pub ref_number: String,
    #[serde(rename = "opCode")]
    pub op_code: String,
    #[serde(rename = "vDate", alias = "valueDate")]
    pub value_date: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub sender: InstitutionId,
    pub receiver: InstitutionId,
    #[serde(rename = "ordcust", alias = "orderingCustomer")]
    pub ordering_customer: String,
    #[serde(rename = "benefcust", alias = "beneficiaryCustomer")]
    pub beneficiary_customer: String,
    #[serde(rename = "detcharges", alias = "chargesDetail")]
    pub charges_detail: String,
    #[serde(rename = "statusCode")]
    pub status_code: StatusCode,
    #[serde(rename = "statusMsg", alias = "statusMessage")]
    pub status_message: String,
    /// Factor applied to the nostro leg.
    #[serde(rename = "fxRate", default, skip_serializing_if = "Option::is_none")]
    pub fx_rate: Option<Decimal>,
    /// Amount debited from the nostro account, in its currency.
    #[serde(rename = "convertedAmount", default, skip_serializing_if = "Option::is_none")]
    pub converted_amount: Option<Decimal>,
}

impl Transaction {
    /// Start a transaction from an instruction. The status is optimistic
    /// until validation says otherwise; the amount is zero until parsed.
    pub fn from_instruction(instruction: &PaymentInstruction) -> Self {
        Self {
            ref_number: instruction.ref_number.clone(),
            op_code: instruction.op_code.clone(),
            value_date: instruction.value_date.clone(),
            currency: instruction.currency.clone(),
            amount: Decimal::ZERO,
            sender: instruction.sender.clone(),
            receiver: instruction.receiver.clone(),
            ordering_customer: instruction.ordering_customer.clone(),
            beneficiary_customer: instruction.beneficiary_customer.clone(),
            charges_detail: instruction.charges_detail.clone(),
            status_code: StatusCode::Completed,
            status_message: COMPLETED_MESSAGE.to_string(),
            fx_rate: None,
            converted_amount: None,
        }
    }

    /// Mark as failed. Overwrites any earlier failure message.
    pub fn fail(&mut self, reason: &FailureReason) {
        self.status_code = StatusCode::Failed;
        self.status_message = reason.to_string();
    }

    /// Whether the transaction settled.
    pub fn is_completed(&self) -> bool {
        self.status_code == StatusCode::Completed
    }

    /// Whether the institution is sender or receiver.
    pub fn involves(&self, institution: &InstitutionId) -> bool {
        &self.sender == institution || &self.receiver == institution
    }
}
