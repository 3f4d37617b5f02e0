//! Chain and balance audit
//!
//! Read-only checks run against a snapshot. None of them lock anything.

use crate::{
    chain,
    error::{Error, Result},
    journal,
    storage::{keys, ReadTables, CF_ACCOUNT_ENTRIES, CF_TRANSACTIONS},
    types::{AccountId, Amount, Transaction, TxHash},
};
use rocksdb::IteratorMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Why a chain position failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainFault {
    /// Sequence numbers are not contiguous
    Gap {
        /// Sequence that was expected next
        expected: u64,
    },
    /// Transaction was never sealed
    Unsealed,
    /// `prev_hash` does not point at the previous transaction
    BrokenLink,
    /// Recomputed hash differs from the stored one
    HashMismatch {
        /// Hash stored on the row
        stored: TxHash,
        /// Hash recomputed from the row and its entries
        computed: TxHash,
    },
    /// Head row disagrees with the last transaction
    HeadMismatch,
}

/// Result of walking the hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Transactions checked before stopping
    pub transactions_checked: u64,
    /// First broken sequence, if any
    pub first_broken: Option<(u64, ChainFault)>,
}

impl ChainReport {
    /// Whether every link verified
    pub fn is_valid(&self) -> bool {
        self.first_broken.is_none()
    }
}

/// Walk every transaction in sequence order and recompute its hash
pub fn verify_chain<R: ReadTables>(reader: &R) -> Result<ChainReport> {
    let rows = reader.scan_raw(CF_TRANSACTIONS, IteratorMode::Start, &[], None)?;

    let mut prev: Option<TxHash> = None;
    let mut checked = 0u64;
    for (key, value) in rows {
        let seq = keys::seq_from(&key).ok_or_else(|| Error::integrity("malformed transaction key"))?;
        let tx: Transaction = bincode::deserialize(&value)?;
        let expected = checked + 1;

        let fault = if seq != expected || tx.seq != seq {
            Some(ChainFault::Gap { expected })
        } else if let Some(stored) = tx.hash {
            if tx.prev_hash != prev {
                Some(ChainFault::BrokenLink)
            } else {
                let entries = journal::entries_at(reader, seq)?;
                let computed = chain::seal_hash(prev.as_ref(), &tx, &entries);
                (computed != stored).then_some(ChainFault::HashMismatch { stored, computed })
            }
        } else {
            Some(ChainFault::Unsealed)
        };

        if let Some(fault) = fault {
            return Ok(ChainReport {
                transactions_checked: checked,
                first_broken: Some((seq, fault)),
            });
        }

        prev = tx.hash;
        checked += 1;
    }

    let head = reader.chain_head()?;
    if head.seq != checked || head.hash != prev {
        return Ok(ChainReport {
            transactions_checked: checked,
            first_broken: Some((head.seq, ChainFault::HeadMismatch)),
        });
    }

    Ok(ChainReport {
        transactions_checked: checked,
        first_broken: None,
    })
}

/// Account whose aggregate disagrees with its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    /// Account
    pub account: AccountId,
    /// Value in the balance aggregate
    pub stored: Amount,
    /// Sum of the account's entries
    pub computed: Amount,
}

/// Recompute every balance from the entries and compare with the aggregate
pub fn verify_balances<R: ReadTables>(reader: &R) -> Result<Vec<BalanceMismatch>> {
    let mut computed: BTreeMap<AccountId, Amount> = BTreeMap::new();
    for (key, value) in reader.scan_raw(CF_ACCOUNT_ENTRIES, IteratorMode::Start, &[], None)? {
        let bytes: [u8; 16] = key
            .get(..16)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::integrity("malformed account entry key"))?;
        let account = AccountId::from_uuid(uuid::Uuid::from_bytes(bytes));
        let delta: Amount = bincode::deserialize(&value)?;
        let slot = computed.entry(account).or_insert(0);
        *slot = slot
            .checked_add(delta)
            .ok_or_else(|| Error::integrity("recomputed balance overflows"))?;
    }

    let stored = journal::all_balances(reader)?;

    let mut mismatches = Vec::new();
    let accounts: BTreeSet<&AccountId> = stored.keys().chain(computed.keys()).collect();
    for account in accounts {
        let s = stored.get(account).copied().unwrap_or(0);
        let c = computed.get(account).copied().unwrap_or(0);
        if s != c {
            mismatches.push(BalanceMismatch {
                account: *account,
                stored: s,
                computed: c,
            });
        }
    }
    Ok(mismatches)
}

/// Sum of all balances. Always zero on a healthy ledger.
pub fn total_supply<R: ReadTables>(reader: &R) -> Result<i128> {
    Ok(journal::all_balances(reader)?
        .values()
        .map(|b| *b as i128)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::{Store, CF_ENTRIES},
        types::{LedgerEntry, Posting, Reason, TransactionRequest, UserId},
        Config,
    };
    use tempfile::TempDir;

    fn seeded_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let store = Store::open(&config).unwrap();

        let alice = UserId::new();
        let bob = UserId::new();
        for (amount, transfer) in [(100, 30), (50, 10)] {
            let mut uow = store.begin(None).unwrap();
            let house = uow.ensure_house().unwrap();
            let a = uow.ensure_default_wallet(alice).unwrap();
            let b = uow.ensure_default_wallet(bob).unwrap();
            uow.record_transaction(&TransactionRequest::new(
                Reason::Gift,
                vec![Posting::debit(house.id, amount), Posting::credit(a.id, amount)],
            ))
            .unwrap();
            uow.record_transaction(&TransactionRequest::new(
                Reason::Transfer,
                vec![Posting::debit(a.id, transfer), Posting::credit(b.id, transfer)],
            ))
            .unwrap();
            uow.commit().unwrap();
        }
        (store, temp_dir)
    }

    #[test]
    fn test_healthy_ledger_verifies() {
        let (store, _temp) = seeded_store();
        let view = store.read();

        let report = verify_chain(&view).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.transactions_checked, 4);
        assert!(verify_balances(&view).unwrap().is_empty());
        assert_eq!(total_supply(&view).unwrap(), 0);
    }

    #[test]
    fn test_empty_ledger_verifies() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let store = Store::open(&config).unwrap();

        let report = verify_chain(&store.read()).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.transactions_checked, 0);
    }

    #[test]
    fn test_tampered_entry_breaks_chain() {
        let (store, _temp) = seeded_store();

        let view = store.read();
        let mut entry: LedgerEntry = journal::entries_at(&view, 2).unwrap().remove(0);
        drop(view);
        entry.delta -= 1;
        store
            .tamper(CF_ENTRIES, &keys::entry(entry.seq, entry.index), &entry)
            .unwrap();

        let report = verify_chain(&store.read()).unwrap();
        assert_eq!(report.transactions_checked, 1);
        assert!(matches!(
            report.first_broken,
            Some((2, ChainFault::HashMismatch { .. }))
        ));
    }

    #[test]
    fn test_tampered_link_detected() {
        let (store, _temp) = seeded_store();

        let view = store.read();
        let mut tx = journal::transaction_at(&view, 3).unwrap().unwrap();
        drop(view);
        tx.prev_hash = None;
        store.tamper(CF_TRANSACTIONS, &keys::seq(3), &tx).unwrap();

        let report = verify_chain(&store.read()).unwrap();
        assert_eq!(report.first_broken, Some((3, ChainFault::BrokenLink)));
    }

    #[test]
    fn test_tampered_balance_detected() {
        let (store, _temp) = seeded_store();

        let view = store.read();
        let house = crate::accounts::house(&view).unwrap().unwrap();
        drop(view);
        store
            .tamper(crate::storage::CF_BALANCES, house.id.as_bytes(), &0i64)
            .unwrap();

        let view = store.read();
        let mismatches = verify_balances(&view).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].account, house.id);
        assert_eq!(mismatches[0].computed, -150);
        assert_ne!(total_supply(&view).unwrap(), 0);
    }
}
