//! Ledger arena and the per-run transaction boundary
//!
//! Balances live in one addressable arena keyed by (account, asset). All
//! mutation flows through [`LedgerTxn`]: deltas are staged against a view
//! that includes earlier staged deltas, every debit is checked before
//! anything is applied, and `commit` applies the whole set while the arena
//! lock is held. A dropped transaction applies nothing.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use parking_lot::MutexGuard;

use crate::error::LedgerError;
use crate::types::{BalanceRecord, LedgerDelta, LedgerKey, StateSnapshot};

/// Balance arena for (account, asset) pairs
#[derive(Debug, Default)]
pub struct Ledger {
    balances: Mutex<BTreeMap<LedgerKey, u64>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a balance directly, outside any run. Used for genesis/test
    /// funding only; runtime mutation goes through transactions.
    pub fn seed_balance(&self, key: LedgerKey, amount: u64) {
        self.balances.lock().insert(key, amount);
    }

    /// Current balance for a key; absent keys read as zero
    pub fn balance(&self, key: &LedgerKey) -> u64 {
        self.balances.lock().get(key).copied().unwrap_or(0)
    }

    /// Open the single-writer transaction boundary.
    ///
    /// The arena lock is held until the returned transaction commits or
    /// drops, so no observer can see a partially applied run.
    pub fn transaction(&self) -> LedgerTxn<'_> {
        LedgerTxn {
            guard: self.balances.lock(),
            staged: Vec::new(),
        }
    }
}

/// One atomic unit of ledger mutation, scoped to a run
pub struct LedgerTxn<'a> {
    guard: MutexGuard<'a, BTreeMap<LedgerKey, u64>>,
    staged: Vec<LedgerDelta>,
}

impl LedgerTxn<'_> {
    /// Snapshot the given keys as seen by this transaction
    pub fn snapshot(&self, keys: &[LedgerKey]) -> StateSnapshot {
        let entries = keys
            .iter()
            .map(|key| BalanceRecord {
                account_id: key.account_id.clone(),
                asset_id: key.asset_id.clone(),
                balance: self.effective_balance(key),
            })
            .collect();
        StateSnapshot::from_entries(entries)
    }

    /// Balance of a key including earlier staged deltas
    pub fn effective_balance(&self, key: &LedgerKey) -> u64 {
        self.effective_wide(key).clamp(0, u64::MAX as i128) as u64
    }

    // Widened arithmetic so staged sums near u64::MAX cannot wrap.
    fn effective_wide(&self, key: &LedgerKey) -> i128 {
        let base = self.guard.get(key).copied().unwrap_or(0) as i128;
        let staged: i128 = self
            .staged
            .iter()
            .filter(|d| &d.key == key)
            .map(|d| d.amount as i128)
            .sum();
        base + staged
    }

    /// Stage a debit, failing if the effective balance cannot cover it
    pub fn stage_debit(&mut self, key: &LedgerKey, amount: u64) -> Result<(), LedgerError> {
        let available = self.effective_wide(key);
        if available < amount as i128 {
            return Err(LedgerError::InsufficientBalance {
                account: key.account_id.clone(),
                asset: key.asset_id.clone(),
                required: amount,
                available: available.clamp(0, u64::MAX as i128) as u64,
            });
        }
        self.staged.push(LedgerDelta::debit(key.clone(), amount));
        Ok(())
    }

    /// Stage a credit, failing on balance overflow
    pub fn stage_credit(&mut self, key: &LedgerKey, amount: u64) -> Result<(), LedgerError> {
        if self.effective_wide(key) + amount as i128 > u64::MAX as i128 {
            return Err(LedgerError::BalanceOverflow {
                account: key.account_id.clone(),
                asset: key.asset_id.clone(),
            });
        }
        self.staged.push(LedgerDelta::credit(key.clone(), amount));
        Ok(())
    }

    /// Stage a signed delta produced by a module handler
    pub fn stage_delta(&mut self, delta: &LedgerDelta) -> Result<(), LedgerError> {
        if delta.amount >= 0 {
            self.stage_credit(&delta.key, delta.amount as u64)
        } else {
            self.stage_debit(&delta.key, delta.amount.unsigned_abs())
        }
    }

    /// Apply every staged delta. Infallible by construction: each stage
    /// call already validated against the effective view under the lock.
    pub fn commit(mut self) {
        for delta in self.staged.drain(..) {
            let entry = self.guard.entry(delta.key).or_insert(0);
            if delta.amount >= 0 {
                *entry += delta.amount as u64;
            } else {
                *entry -= delta.amount.unsigned_abs();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balances_default_to_zero() {
        let ledger = Ledger::new();
        assert_eq!(ledger.balance(&LedgerKey::new("nobody", "NYXT")), 0);
    }

    #[test]
    fn test_commit_applies_all_staged_deltas() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");
        let bob = LedgerKey::new("bob", "NYXT");
        ledger.seed_balance(alice.clone(), 100);

        let mut txn = ledger.transaction();
        txn.stage_debit(&alice, 40).unwrap();
        txn.stage_credit(&bob, 40).unwrap();
        txn.commit();

        assert_eq!(ledger.balance(&alice), 60);
        assert_eq!(ledger.balance(&bob), 40);
    }

    #[test]
    fn test_dropped_transaction_applies_nothing() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");
        ledger.seed_balance(alice.clone(), 100);

        {
            let mut txn = ledger.transaction();
            txn.stage_debit(&alice, 40).unwrap();
            // dropped without commit
        }

        assert_eq!(ledger.balance(&alice), 100);
    }

    #[test]
    fn test_insufficient_debit_is_rejected_with_no_partial_state() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");
        ledger.seed_balance(alice.clone(), 30);

        let mut txn = ledger.transaction();
        txn.stage_debit(&alice, 20).unwrap();
        let err = txn.stage_debit(&alice, 20).unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 20);
                assert_eq!(available, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        drop(txn);
        assert_eq!(ledger.balance(&alice), 30);
    }

    #[test]
    fn test_staged_credit_is_visible_to_later_debit() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");

        let mut txn = ledger.transaction();
        txn.stage_credit(&alice, 50).unwrap();
        txn.stage_debit(&alice, 50).unwrap();
        txn.commit();

        assert_eq!(ledger.balance(&alice), 0);
    }

    #[test]
    fn test_snapshot_reflects_effective_view() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");
        ledger.seed_balance(alice.clone(), 10);

        let mut txn = ledger.transaction();
        txn.stage_credit(&alice, 5).unwrap();
        let snapshot = txn.snapshot(&[alice.clone()]);
        assert_eq!(snapshot.balance(&alice), 15);
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let ledger = Ledger::new();
        let alice = LedgerKey::new("alice", "NYXT");
        ledger.seed_balance(alice.clone(), u64::MAX - 1);

        let mut txn = ledger.transaction();
        assert!(matches!(
            txn.stage_credit(&alice, 2),
            Err(LedgerError::BalanceOverflow { .. })
        ));
    }
}
