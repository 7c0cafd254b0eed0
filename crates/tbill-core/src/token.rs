use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AccountId = String;
pub type Amount = u64;

/// Failures reported by the token collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient balance in account {account}")]
    InsufficientBalance { account: AccountId },
    #[error("allowance granted by {owner} to {spender} is too low")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
    },
}

/// The fungible-token collaborator the ledger moves value through.
///
/// The ledger acts as the spender: buyers pre-authorize its custody account
/// before a purchase, and the interest fund pre-authorizes it for payouts.
/// Balance storage and allowance bookkeeping live entirely behind this trait.
pub trait TokenTransferPort {
    /// Account the port holds in custody for the ledger.
    fn custody_account(&self) -> &str;

    /// Current balance of `account`.
    fn balance_of(&self, account: &str) -> Amount;

    /// Move `amount` out of the ledger's custody account into `to`.
    fn transfer(&mut self, to: &str, amount: Amount) -> Result<(), TokenError>;

    /// Move `amount` from `owner` to `to`, spending the allowance `owner`
    /// granted to the ledger's custody account.
    fn transfer_from(&mut self, owner: &str, to: &str, amount: Amount) -> Result<(), TokenError>;
}

/// In-memory token ledger with ERC20-style balances and allowances.
///
/// Serves as the reference collaborator for tests and the CLI; a production
/// deployment would implement [`TokenTransferPort`] against the real token
/// contract instead.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryToken {
    custody: AccountId,
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
}

impl InMemoryToken {
    pub fn new(custody: impl Into<AccountId>) -> Self {
        Self {
            custody: custody.into(),
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    /// Credit freshly issued tokens to `to`.
    pub fn mint(&mut self, to: &str, amount: Amount) {
        *self.balances.entry(to.to_string()).or_default() += amount;
    }

    /// Authorize `spender` to move up to `amount` of `owner`'s tokens.
    /// Overwrites any previous authorization between the pair.
    pub fn approve(&mut self, owner: &str, spender: &str, amount: Amount) {
        self.allowances
            .entry(owner.to_string())
            .or_default()
            .insert(spender.to_string(), amount);
    }

    /// Remaining authorization from `owner` to `spender`.
    pub fn allowance(&self, owner: &str, spender: &str) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn move_balance(&mut self, from: &str, to: &str, amount: Amount) -> Result<(), TokenError> {
        if amount == 0 {
            return Ok(());
        }
        match self.balances.get_mut(from) {
            Some(balance) if *balance >= amount => *balance -= amount,
            _ => {
                return Err(TokenError::InsufficientBalance {
                    account: from.to_string(),
                })
            }
        }
        *self.balances.entry(to.to_string()).or_default() += amount;
        Ok(())
    }
}

impl TokenTransferPort for InMemoryToken {
    fn custody_account(&self) -> &str {
        &self.custody
    }

    fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&mut self, to: &str, amount: Amount) -> Result<(), TokenError> {
        let custody = self.custody.clone();
        self.move_balance(&custody, to, amount)
    }

    fn transfer_from(&mut self, owner: &str, to: &str, amount: Amount) -> Result<(), TokenError> {
        let spender = self.custody.clone();
        let allowed = self.allowance(owner, &spender);
        if allowed < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: owner.to_string(),
                spender,
            });
        }
        self.move_balance(owner, to, amount)?;
        self.approve(owner, &spender, allowed - amount);
        Ok(())
    }
}
