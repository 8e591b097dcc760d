//! Institution records and their correspondent accounts.
//!
//! An institution's record lists the accounts it keeps *for* other
//! institutions: from the owner's point of view each entry is a vostro
//! account, and from the holder's point of view the same entry is its nostro
//! account held abroad.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, InstitutionId};

/// One counterparty relationship held by an institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Institution the money belongs to.
    pub holder: InstitutionId,
    /// Currency the account is kept in.
    pub currency: Currency,
    /// Net settled balance.
    #[serde(rename = "cashBalance")]
    pub cash_balance: Decimal,
}

impl Account {
    /// Create a new account.
    pub fn new(holder: impl Into<InstitutionId>, currency: Currency, cash_balance: Decimal) -> Self {
        Self {
            holder: holder.into(),
            currency,
            cash_balance,
        }
    }

    /// Whether the balance can absorb a debit without going negative.
    pub fn can_debit(&self, amount: Decimal) -> bool {
        self.cash_balance
            .checked_sub(amount)
            .is_some_and(|rest| rest >= Decimal::ZERO)
    }

    /// Whether a credit of `amount` keeps the balance representable.
    pub fn can_credit(&self, amount: Decimal) -> bool {
        self.cash_balance.checked_add(amount).is_some()
    }

    /// Add a signed delta to the balance. Returns the new balance, or `None`
    /// with the balance untouched if the sum is out of range.
    pub fn credit(&mut self, delta: Decimal) -> Option<Decimal> {
        self.cash_balance = self.cash_balance.checked_add(delta)?;
        Some(self.cash_balance)
    }
}

/// All accounts one institution keeps for its correspondents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    /// Owning institution.
    pub owner: InstitutionId,
    /// Accounts, at most one per holder.
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl InstitutionRecord {
    /// Create a record with no accounts.
    pub fn new(owner: impl Into<InstitutionId>) -> Self {
        Self {
            owner: owner.into(),
            accounts: Vec::new(),
        }
    }

    /// Builder-style account addition.
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    /// The account held for `holder`, if any.
    pub fn account_for(&self, holder: &InstitutionId) -> Option<&Account> {
        self.accounts.iter().find(|a| &a.holder == holder)
    }

    /// Mutable access to the account held for `holder`.
    pub fn account_for_mut(&mut self, holder: &InstitutionId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| &a.holder == holder)
    }

    /// First holder that appears more than once, if any.
    pub fn duplicate_holder(&self) -> Option<&InstitutionId> {
        let mut seen = HashSet::new();
        self.accounts
            .iter()
            .map(|a| &a.holder)
            .find(|holder| !seen.insert(*holder))
    }
}

/// Nostro/vostro relationship graph of one institution.
///
/// Derived on every query; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilateralView {
    /// The queried institution.
    pub owner: InstitutionId,
    /// One partial record per correspondent that holds money for `owner`,
    /// each containing only that account.
    pub nostro: Vec<InstitutionRecord>,
    /// The queried institution's own record.
    pub vostro: Vec<InstitutionRecord>,
}
