//! The token ledger capability.
//!
//! The chain validates token operations structurally and through this
//! trait; bookkeeping internals (supply tables, holder balances) are an
//! external collaborator. [`MemoryTokenLedger`] is the built-in
//! implementation used by tests and single-process nodes.

use std::collections::HashMap;

use umbra_chain::tokens::{TokenId, TokenOperation};
use umbra_chain::transaction::Transaction;

use crate::error::TokenError;

/// The ledger surface the chain requires of its token collaborator.
///
/// `operator` is the 20-byte address derived from the transaction's first
/// transparent input; owner-only operations check against it.
pub trait TokenLedger: Send + Sync {
    fn symbol_exists(&self, symbol: &str) -> bool;
    fn owner_of(&self, token: &TokenId) -> Option<[u8; 20]>;
    fn balance_of(&self, token: &TokenId, holder: &[u8; 20]) -> u64;

    /// Validate `op` without applying it.
    fn validate(
        &self,
        op: &TokenOperation,
        operator: &[u8; 20],
    ) -> Result<(), TokenError> {
        match op {
            TokenOperation::Issue { symbol, .. } => {
                if self.symbol_exists(symbol) {
                    return Err(TokenError::SymbolTaken(symbol.clone()));
                }
            }
            TokenOperation::Mint { token, .. }
            | TokenOperation::TransferOwnership { token, .. } => {
                match self.owner_of(token) {
                    None => return Err(TokenError::UnknownToken),
                    Some(owner) if owner != *operator => return Err(TokenError::NotOwner),
                    Some(_) => {}
                }
            }
            TokenOperation::Transfer { token, amount, .. }
            | TokenOperation::Shield { token, amount }
            | TokenOperation::Burn { token, amount } => {
                if self.owner_of(token).is_none() {
                    return Err(TokenError::UnknownToken);
                }
                let have = self.balance_of(token, operator);
                if have < *amount {
                    return Err(TokenError::InsufficientBalance {
                        have,
                        need: *amount,
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply a validated operation. `tx` supplies the issuing fingerprint
    /// for `Issue`.
    fn apply(
        &mut self,
        op: &TokenOperation,
        operator: &[u8; 20],
        tx: &Transaction,
    ) -> Result<(), TokenError>;

    /// Undo a previously applied operation.
    fn rollback(
        &mut self,
        op: &TokenOperation,
        operator: &[u8; 20],
        tx: &Transaction,
    ) -> Result<(), TokenError>;
}

#[derive(Clone, Debug, Default)]
struct TokenRecord {
    symbol: String,
    owner: [u8; 20],
    supply: u64,
    balances: HashMap<[u8; 20], u64>,
}

/// An in-memory token ledger.
#[derive(Default)]
pub struct MemoryTokenLedger {
    tokens: HashMap<TokenId, TokenRecord>,
    symbols: HashMap<String, TokenId>,
}

impl MemoryTokenLedger {
    pub fn new() -> MemoryTokenLedger {
        MemoryTokenLedger::default()
    }

    fn record_mut(&mut self, token: &TokenId) -> Result<&mut TokenRecord, TokenError> {
        self.tokens.get_mut(token).ok_or(TokenError::UnknownToken)
    }
}

impl TokenLedger for MemoryTokenLedger {
    fn symbol_exists(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    fn owner_of(&self, token: &TokenId) -> Option<[u8; 20]> {
        self.tokens.get(token).map(|record| record.owner)
    }

    fn balance_of(&self, token: &TokenId, holder: &[u8; 20]) -> u64 {
        self.tokens
            .get(token)
            .and_then(|record| record.balances.get(holder).copied())
            .unwrap_or(0)
    }

    fn apply(
        &mut self,
        op: &TokenOperation,
        operator: &[u8; 20],
        tx: &Transaction,
    ) -> Result<(), TokenError> {
        self.validate(op, operator)?;
        match op {
            TokenOperation::Issue {
                symbol,
                supply,
                owner,
                ..
            } => {
                let token = TokenId(tx.hash().0);
                let mut balances = HashMap::new();
                balances.insert(*owner, *supply);
                self.tokens.insert(
                    token,
                    TokenRecord {
                        symbol: symbol.clone(),
                        owner: *owner,
                        supply: *supply,
                        balances,
                    },
                );
                self.symbols.insert(symbol.clone(), token);
            }
            TokenOperation::Transfer { token, amount, to } => {
                let record = self.record_mut(token)?;
                let from = record.balances.entry(*operator).or_insert(0);
                *from -= amount;
                *record.balances.entry(*to).or_insert(0) += amount;
            }
            TokenOperation::Mint { token, amount } => {
                let record = self.record_mut(token)?;
                record.supply = record
                    .supply
                    .checked_add(*amount)
                    .ok_or(TokenError::SupplyOverflow)?;
                *record.balances.entry(*operator).or_insert(0) += amount;
            }
            TokenOperation::TransferOwnership { token, new_owner } => {
                self.record_mut(token)?.owner = *new_owner;
            }
            TokenOperation::Shield { token, amount }
            | TokenOperation::Burn { token, amount } => {
                let record = self.record_mut(token)?;
                *record.balances.entry(*operator).or_insert(0) -= amount;
                if matches!(op, TokenOperation::Burn { .. }) {
                    record.supply = record.supply.saturating_sub(*amount);
                }
            }
        }
        Ok(())
    }

    fn rollback(
        &mut self,
        op: &TokenOperation,
        operator: &[u8; 20],
        tx: &Transaction,
    ) -> Result<(), TokenError> {
        match op {
            TokenOperation::Issue { symbol, .. } => {
                let token = TokenId(tx.hash().0);
                self.tokens.remove(&token);
                self.symbols.remove(symbol);
            }
            TokenOperation::Transfer { token, amount, to } => {
                let record = self.record_mut(token)?;
                *record.balances.entry(*to).or_insert(0) -= amount;
                *record.balances.entry(*operator).or_insert(0) += amount;
            }
            TokenOperation::Mint { token, amount } => {
                let record = self.record_mut(token)?;
                record.supply = record.supply.saturating_sub(*amount);
                *record.balances.entry(*operator).or_insert(0) -= amount;
            }
            TokenOperation::TransferOwnership { token, .. } => {
                // The previous owner is the transaction operator.
                self.record_mut(token)?.owner = *operator;
            }
            TokenOperation::Shield { token, amount }
            | TokenOperation::Burn { token, amount } => {
                let record = self.record_mut(token)?;
                *record.balances.entry(*operator).or_insert(0) += amount;
                if matches!(op, TokenOperation::Burn { .. }) {
                    record.supply = record.supply.saturating_add(*amount);
                }
            }
        }
        Ok(())
    }
}
