//! Ledger store: double-entry transactions and balances
//!
//! A transaction is begun, receives its entries, and is sealed when the unit
//! of work commits (see [`UnitOfWork::commit`]). Balances are maintained as an
//! incremental aggregate written in the same unit of work as the entries, so
//! a balance read inside a unit of work sees its own movements.

use crate::{
    accounts,
    error::{Error, Result},
    storage::{
        keys, PendingEntry, PendingTransaction, ReadTables, UnitOfWork, CF_ACCOUNT_ENTRIES,
        CF_BALANCES, CF_ENTRIES, CF_TRANSACTIONS, CF_TX_INDEX,
    },
    types::{
        AccountId, Amount, BetId, HistoryItem, LedgerEntry, Reason, Transaction, TransactionId,
        TransactionRecord, TransactionRequest,
    },
};
use chrono::Utc;
use rocksdb::{Direction, IteratorMode};
use std::collections::BTreeMap;

/// Current balance of an account
pub fn balance<R: ReadTables>(reader: &R, account: &AccountId) -> Result<Amount> {
    match reader.get::<Amount>(CF_BALANCES, account.as_bytes())? {
        Some(balance) => Ok(balance),
        None => accounts::account(reader, account).map(|_| 0),
    }
}

/// Transaction header by chain sequence
pub fn transaction_at<R: ReadTables>(reader: &R, seq: u64) -> Result<Option<Transaction>> {
    reader.get(CF_TRANSACTIONS, &keys::seq(seq))
}

/// Entries of the transaction at `seq`, in insertion order
pub fn entries_at<R: ReadTables>(reader: &R, seq: u64) -> Result<Vec<LedgerEntry>> {
    Ok(reader
        .scan_prefix::<LedgerEntry>(CF_ENTRIES, &keys::seq(seq))?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect())
}

/// Transaction with its entries
pub fn transaction<R: ReadTables>(reader: &R, id: &TransactionId) -> Result<TransactionRecord> {
    let seq: u64 = reader
        .get(CF_TX_INDEX, id.as_bytes())?
        .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
    let transaction = transaction_at(reader, seq)?
        .ok_or_else(|| Error::integrity(format!("index points at missing transaction {}", seq)))?;
    let entries = entries_at(reader, seq)?;
    Ok(TransactionRecord {
        transaction,
        entries,
    })
}

/// Public transaction log, newest first
pub fn transactions_page<R: ReadTables>(
    reader: &R,
    offset: usize,
    limit: usize,
) -> Result<Vec<TransactionRecord>> {
    let head = reader.chain_head()?;
    let top = head.seq.saturating_sub(offset as u64);
    if top == 0 || limit == 0 {
        return Ok(Vec::new());
    }

    let start = keys::seq(top);
    reader
        .scan_raw(
            CF_TRANSACTIONS,
            IteratorMode::From(&start, Direction::Reverse),
            &[],
            Some(limit),
        )?
        .into_iter()
        .map(|(_, value)| {
            let transaction: Transaction = bincode::deserialize(&value)?;
            let entries = entries_at(reader, transaction.seq)?;
            Ok(TransactionRecord {
                transaction,
                entries,
            })
        })
        .collect()
}

/// Statement of one account, newest first. Entries of one transaction are netted.
pub fn account_history<R: ReadTables>(
    reader: &R,
    account: &AccountId,
    limit: usize,
) -> Result<Vec<HistoryItem>> {
    accounts::account(reader, account)?;

    let end = keys::account_entry_end(account);
    let rows = reader.scan_raw(
        CF_ACCOUNT_ENTRIES,
        IteratorMode::From(&end, Direction::Reverse),
        account.as_bytes(),
        None,
    )?;

    let mut items: Vec<HistoryItem> = Vec::new();
    for (key, value) in rows {
        let seq = keys::seq_from_account_entry(&key)
            .ok_or_else(|| Error::integrity("malformed account entry key"))?;
        let delta: Amount = bincode::deserialize(&value)?;

        if let Some(last) = items.last_mut() {
            if last.transaction.seq == seq {
                last.delta = last
                    .delta
                    .checked_add(delta)
                    .ok_or_else(|| Error::integrity("history delta overflows"))?;
                continue;
            }
        }
        if items.len() == limit {
            break;
        }
        let transaction = transaction_at(reader, seq)?
            .ok_or_else(|| Error::integrity(format!("entry points at missing transaction {}", seq)))?;
        items.push(HistoryItem { transaction, delta });
    }
    Ok(items)
}

/// Every stored balance row
pub fn all_balances<R: ReadTables>(reader: &R) -> Result<BTreeMap<AccountId, Amount>> {
    reader
        .scan_prefix::<Amount>(CF_BALANCES, &[])?
        .into_iter()
        .map(|(key, balance)| {
            let bytes: [u8; 16] = key
                .as_slice()
                .try_into()
                .map_err(|_| Error::integrity("malformed balance key"))?;
            Ok((AccountId::from_uuid(uuid::Uuid::from_bytes(bytes)), balance))
        })
        .collect()
}

impl UnitOfWork<'_> {
    /// Open a pending ledger transaction and assign its chain sequence
    pub fn begin_transaction(
        &mut self,
        reason: Reason,
        bet_id: Option<BetId>,
        note: Option<String>,
    ) -> Result<TransactionId> {
        let tx = Transaction {
            id: TransactionId::new(),
            seq: self.next_seq,
            reason,
            bet_id,
            note,
            created_at: Utc::now(),
            prev_hash: None,
            hash: None,
        };
        self.next_seq += 1;

        self.put_raw(CF_TRANSACTIONS, &keys::seq(tx.seq), &tx)?;
        self.put_raw(CF_TX_INDEX, tx.id.as_bytes(), &tx.seq)?;

        tracing::debug!(tx_id = %tx.id, seq = tx.seq, reason = %reason, "Transaction begun");

        let id = tx.id;
        self.pending.push(PendingTransaction {
            tx,
            entries: Vec::new(),
        });
        Ok(id)
    }

    /// Add one entry to a pending transaction and move the account's balance
    pub fn add_entry(&mut self, tx_id: TransactionId, account: AccountId, delta: Amount) -> Result<()> {
        if delta == 0 {
            return Err(Error::Validation("zero-delta entries are not allowed".to_string()));
        }

        let Some(position) = self.pending.iter().position(|p| p.tx.id == tx_id) else {
            return Err(match self.get::<u64>(CF_TX_INDEX, tx_id.as_bytes())? {
                Some(_) => Error::integrity(format!("transaction {} is sealed", tx_id)),
                None => Error::TransactionNotFound(tx_id.to_string()),
            });
        };

        let target = accounts::account(&*self, &account)?;

        let current: Amount = self.lock_row(CF_BALANCES, account.as_bytes())?.unwrap_or(0);
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::integrity(format!("balance of {} overflows", account)))?;

        let (seq, index) = {
            let pending = &self.pending[position];
            (pending.tx.seq, pending.entries.len() as u32)
        };
        let entry = LedgerEntry {
            tx_id,
            seq,
            index,
            account_id: account,
            delta,
        };

        self.put_raw(CF_ENTRIES, &keys::entry(seq, index), &entry)?;
        self.put_raw(CF_ACCOUNT_ENTRIES, &keys::account_entry(&account, seq, index), &delta)?;
        self.put_raw(CF_BALANCES, account.as_bytes(), &updated)?;

        self.pending[position].entries.push(PendingEntry {
            entry,
            exempt: target.is_house,
        });
        Ok(())
    }

    /// Begin a transaction and add every posting of `request`
    pub fn record_transaction(&mut self, request: &TransactionRequest) -> Result<TransactionId> {
        request.validate()?;
        let tx_id = self.begin_transaction(request.reason, request.bet_id, request.note.clone())?;
        for posting in &request.postings {
            self.add_entry(tx_id, posting.account, posting.delta)?;
        }
        Ok(tx_id)
    }

    /// Balance of an account read under an exclusive row lock
    pub fn lock_balance(&self, account: &AccountId) -> Result<Amount> {
        match self.lock_row::<Amount>(CF_BALANCES, account.as_bytes())? {
            Some(balance) => Ok(balance),
            None => accounts::account(self, account).map(|_| 0),
        }
    }
}
