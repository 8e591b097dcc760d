//! Instruction validation.
//!
//! Every check runs, in a fixed order, and each failure overwrites the
//! status message of the one before it: the message a caller sees is that of
//! the last failing check. A later passing check never clears a failure.

use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use nostrovostro_common::{
    FailureReason, InstitutionRecord, Money, PaymentInstruction, Result, Transaction,
};
use nostrovostro_fx::{Conversion, FxEngine, FxError};
use nostrovostro_ledger::{InstitutionDirectory, Version};

/// A record as read during validation.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub record: InstitutionRecord,
    pub version: Version,
}

/// Everything validation learned about an instruction.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Transaction carrying the final status.
    pub transaction: Transaction,
    /// Every failed check, in evaluation order.
    pub failures: Vec<FailureReason>,
    /// Sender's record, where the vostro account lives.
    pub sender: RecordSnapshot,
    /// Receiver's record, where the nostro account lives.
    pub receiver: RecordSnapshot,
    /// Nostro-leg conversion, when the rate resolved.
    pub conversion: Option<Conversion>,
}

impl ValidationOutcome {
    /// Whether the instruction may be settled.
    pub fn is_settleable(&self) -> bool {
        self.failures.is_empty()
    }

    /// Amount to debit from the nostro account, in its currency.
    pub fn nostro_debit(&self) -> Decimal {
        self.conversion
            .as_ref()
            .map(|c| c.output.value)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Parse an instruction amount, in plain or scientific notation.
///
/// A negative amount parses but is still refused as invalid: it would credit
/// the nostro and debit the vostro, moving money against the direction of
/// the funds check. Zero, signed or not, is accepted.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let amount = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()?;
    (!amount.is_sign_negative() || amount.is_zero()).then_some(amount)
}

/// Checks instructions against current records and the FX table.
#[derive(Debug, Clone)]
pub struct TransactionValidator {
    directory: InstitutionDirectory,
    fx: FxEngine,
}

impl TransactionValidator {
    /// Create a validator.
    pub fn new(directory: InstitutionDirectory, fx: FxEngine) -> Self {
        Self { directory, fx }
    }

    /// Validate an instruction.
    ///
    /// Validation failures are reported on the returned transaction. A
    /// missing sender or receiver record is an error.
    #[instrument(skip(self, instruction), fields(ref_number = %instruction.ref_number))]
    pub async fn validate(&self, instruction: &PaymentInstruction) -> Result<ValidationOutcome> {
        let mut transaction = Transaction::from_instruction(instruction);
        let mut failures = Vec::new();

        match parse_amount(&instruction.amount) {
            Some(amount) => transaction.amount = amount,
            None => failures.push(FailureReason::InvalidAmount),
        }

        let (record, version) = self.directory.load_versioned(&instruction.receiver).await?;
        let receiver = RecordSnapshot { record, version };

        let mut conversion = None;
        match receiver.record.account_for(&instruction.sender) {
            Some(nostro) => {
                let amount = Money::new(transaction.amount, instruction.currency.clone());
                match self.fx.convert(&amount, &nostro.currency) {
                    Ok(c) => {
                        if !nostro.can_debit(c.output.value) {
                            failures.push(FailureReason::InsufficientFunds);
                        }
                        conversion = Some(c);
                    }
                    // No representable amount can be covered by the nostro.
                    Err(FxError::Overflow { .. }) => failures.push(FailureReason::InsufficientFunds),
                    Err(_) => failures.push(FailureReason::InvalidCurrency),
                }
            }
            None => failures.push(FailureReason::NostroAccountMissing {
                sender: instruction.sender.clone(),
                receiver: instruction.receiver.clone(),
            }),
        }

        let (record, version) = self.directory.load_versioned(&instruction.sender).await?;
        let sender = RecordSnapshot { record, version };

        match sender.record.account_for(&instruction.receiver) {
            Some(vostro) if vostro.currency != instruction.currency => {
                failures.push(FailureReason::VostroCurrencyMismatch {
                    sender: instruction.sender.clone(),
                    receiver: instruction.receiver.clone(),
                    currency: instruction.currency.clone(),
                })
            }
            Some(vostro) if !vostro.can_credit(transaction.amount) => {
                failures.push(FailureReason::InvalidAmount)
            }
            Some(_) => {}
            None => failures.push(FailureReason::VostroAccountMissing {
                sender: instruction.sender.clone(),
                receiver: instruction.receiver.clone(),
            }),
        }

        for failure in &failures {
            transaction.fail(failure);
        }
        if failures.is_empty() {
            if let Some(c) = &conversion {
                transaction.fx_rate = Some(c.factor());
                transaction.converted_amount = Some(c.output.value);
            }
        }

        debug!(
            status = transaction.status_message.as_str(),
            failures = failures.len(),
            "Instruction validated"
        );

        Ok(ValidationOutcome {
            transaction,
            failures,
            sender,
            receiver,
            conversion,
        })
    }
}
