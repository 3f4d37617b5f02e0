//! Storage layer using RocksDB
//!
//! The store is a pessimistic `TransactionDB`; every public operation runs as
//! one [`UnitOfWork`] (one RocksDB transaction). Mutating units of work first
//! take an exclusive lock on the chain head, so writers are serialised the way
//! a single-writer ledger is.
//!
//! # Column Families
//!
//! - `meta` - Chain head (key: `chain_head`)
//! - `accounts` - Accounts (key: account_id)
//! - `account_index` - Default wallet per user, escrow per bet, house marker
//! - `transactions` - Ledger transactions (key: seq)
//! - `tx_index` - Transaction id to seq
//! - `entries` - Ledger entries (key: seq || index)
//! - `account_entries` - Per-account statement index (key: account || seq || index)
//! - `balances` - Incremental balance aggregate (key: account_id)
//!
//! Callers may register additional tables when opening the store. Those are
//! freely writable through the generic accessors; ledger tables are not.

use crate::{
    error::{Error, Result},
    metrics::Metrics,
    types::{AccountId, Amount, ChainHead, LedgerEntry, Transaction, TxHash},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, SnapshotWithThreadMode,
    Transaction as DbTransaction, TransactionDB, TransactionDBOptions, TransactionOptions,
    WriteOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Column family names
pub(crate) const CF_META: &str = "meta";
pub(crate) const CF_ACCOUNTS: &str = "accounts";
pub(crate) const CF_ACCOUNT_INDEX: &str = "account_index";
pub(crate) const CF_TRANSACTIONS: &str = "transactions";
pub(crate) const CF_TX_INDEX: &str = "tx_index";
pub(crate) const CF_ENTRIES: &str = "entries";
pub(crate) const CF_ACCOUNT_ENTRIES: &str = "account_entries";
pub(crate) const CF_BALANCES: &str = "balances";

/// Tables owned by the ledger. Generic writes to these are refused.
pub const LEDGER_TABLES: &[&str] = &[
    CF_META,
    CF_ACCOUNTS,
    CF_ACCOUNT_INDEX,
    CF_TRANSACTIONS,
    CF_TX_INDEX,
    CF_ENTRIES,
    CF_ACCOUNT_ENTRIES,
    CF_BALANCES,
];

const HEAD_KEY: &[u8] = b"chain_head";

/// Key encodings. All integers are big-endian so that scans follow numeric order.
pub(crate) mod keys {
    use crate::types::{AccountId, BetId, UserId};

    pub(crate) const HOUSE: &[u8] = b"house";

    pub(crate) fn seq(seq: u64) -> [u8; 8] {
        seq.to_be_bytes()
    }

    pub(crate) fn entry(seq: u64, index: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(12);
        key.extend_from_slice(&seq.to_be_bytes());
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    pub(crate) fn account_entry(account: &AccountId, seq: u64, index: u32) -> Vec<u8> {
        let mut key = account.as_bytes().to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    /// Upper bound of an account's statement, for reverse scans
    pub(crate) fn account_entry_end(account: &AccountId) -> Vec<u8> {
        let mut key = account.as_bytes().to_vec();
        key.extend_from_slice(&[0xFF; 12]);
        key
    }

    pub(crate) fn wallet(user: &UserId) -> Vec<u8> {
        let mut key = vec![b'w'];
        key.extend_from_slice(user.as_bytes());
        key
    }

    pub(crate) fn escrow(bet: &BetId) -> Vec<u8> {
        let mut key = vec![b'e'];
        key.extend_from_slice(bet.as_bytes());
        key
    }

    pub(crate) fn seq_from(key: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    pub(crate) fn seq_from_account_entry(key: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = key.get(16..24)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

type RawRow = (Vec<u8>, Vec<u8>);

fn collect_scan<I>(iter: I, prefix: &[u8], limit: Option<usize>) -> Result<Vec<RawRow>>
where
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut rows = Vec::new();
    for item in iter {
        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        rows.push((key.into_vec(), value.into_vec()));
    }
    Ok(rows)
}

/// Read access shared by units of work and snapshot views
pub trait ReadTables {
    /// Raw point read
    fn get_raw(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Raw scan starting at `mode`, stopping at the first key outside `prefix`
    fn scan_raw(
        &self,
        table: &str,
        mode: IteratorMode<'_>,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<RawRow>>;

    /// Typed point read
    fn get<V: DeserializeOwned>(&self, table: &str, key: &[u8]) -> Result<Option<V>> {
        self.get_raw(table, key)?
            .map(|bytes| bincode::deserialize(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Typed prefix scan in key order
    fn scan_prefix<V: DeserializeOwned>(&self, table: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>> {
        self.scan_raw(table, IteratorMode::From(prefix, Direction::Forward), prefix, None)?
            .into_iter()
            .map(|(key, value)| Ok((key, bincode::deserialize(&value)?)))
            .collect()
    }

    /// Whether any row starts with `prefix`
    fn any_with_prefix(&self, table: &str, prefix: &[u8]) -> Result<bool> {
        Ok(!self
            .scan_raw(table, IteratorMode::From(prefix, Direction::Forward), prefix, Some(1))?
            .is_empty())
    }

    /// Last sealed chain position as committed
    fn chain_head(&self) -> Result<ChainHead> {
        Ok(self.get(CF_META, HEAD_KEY)?.unwrap_or_default())
    }
}

/// Storage wrapper for RocksDB
#[derive(Clone)]
pub struct Store {
    db: Arc<TransactionDB>,
    tables: Arc<Vec<String>>,
    lock_timeout_ms: u64,
    metrics: Metrics,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("tables", &self.tables)
            .field("lock_timeout_ms", &self.lock_timeout_ms)
            .finish()
    }
}

impl Store {
    /// Open or create database with the ledger tables only
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_tables(config, &[])
    }

    /// Open or create database, registering caller-owned tables next to the ledger's
    pub fn open_with_tables(config: &Config, extra_tables: &[&str]) -> Result<Self> {
        let path = &config.data_dir;

        for (i, table) in extra_tables.iter().enumerate() {
            if LEDGER_TABLES.contains(table) || extra_tables[..i].contains(table) {
                return Err(Error::Config(format!("table '{}' registered twice", table)));
            }
        }

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.locking.lock_timeout_ms as i64);

        let mut cf_descriptors: Vec<ColumnFamilyDescriptor> = LEDGER_TABLES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options_ledger(name)))
            .collect();
        cf_descriptors.extend(
            extra_tables
                .iter()
                .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options_extra())),
        );

        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        let metrics = Metrics::new().map_err(|e| Error::Storage(e.to_string()))?;

        let store = Self {
            db: Arc::new(db),
            tables: Arc::new(extra_tables.iter().map(|t| t.to_string()).collect()),
            lock_timeout_ms: config.locking.lock_timeout_ms,
            metrics,
        };

        let head = store.read().chain_head()?;
        store.metrics.update_chain_height(head.seq);

        tracing::info!(
            path = ?path,
            tables = LEDGER_TABLES.len() + extra_tables.len(),
            chain_height = head.seq,
            "Opened RocksDB"
        );

        Ok(store)
    }

    // Column family options

    fn cf_options_ledger(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Append-only history, rarely read back
            CF_TRANSACTIONS | CF_ENTRIES | CF_ACCOUNT_ENTRIES => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
        }
        opts
    }

    fn cf_options_extra() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Metrics of this store
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Consistent point-in-time view for reads
    pub fn read(&self) -> ReadView<'_> {
        ReadView {
            store: self,
            snapshot: self.db.snapshot(),
        }
    }

    /// Start a mutating unit of work.
    ///
    /// Takes the writer lock (chain head row) before returning, so the deadline
    /// and lock timeout already apply here.
    pub fn begin(&self, deadline: Option<Instant>) -> Result<UnitOfWork<'_>> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Timeout);
        }

        let lock_timeout_ms = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now()).as_millis() as u64;
                remaining.clamp(1, self.lock_timeout_ms)
            }
            None => self.lock_timeout_ms,
        };
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(lock_timeout_ms as i64);
        txn_opts.set_deadlock_detect(true);

        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);

        let mut uow = UnitOfWork {
            store: self,
            txn,
            deadline,
            head: ChainHead::default(),
            next_seq: 1,
            pending: Vec::new(),
            started: Instant::now(),
        };

        let head: ChainHead = uow.lock_row(CF_META, HEAD_KEY)?.unwrap_or_default();
        uow.head = head;
        uow.next_seq = head.seq + 1;

        Ok(uow)
    }

    /// Write a ledger row bypassing every guard. Tests use it to simulate tampering.
    #[cfg(test)]
    pub(crate) fn tamper<V: Serialize>(&self, table: &str, key: &[u8], value: &V) -> Result<()> {
        let cf = self.cf_handle(table)?;
        self.db.put_cf(cf, key, bincode::serialize(value)?)?;
        Ok(())
    }
}

/// Snapshot view over the committed state
pub struct ReadView<'a> {
    store: &'a Store,
    snapshot: SnapshotWithThreadMode<'a, TransactionDB>,
}

impl fmt::Debug for ReadView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadView").finish_non_exhaustive()
    }
}

impl ReadTables for ReadView<'_> {
    fn get_raw(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.store.cf_handle(table)?;
        Ok(self.snapshot.get_cf(cf, key)?)
    }

    fn scan_raw(
        &self,
        table: &str,
        mode: IteratorMode<'_>,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<RawRow>> {
        let cf = self.store.cf_handle(table)?;
        collect_scan(self.snapshot.iterator_cf(cf, mode), prefix, limit)
    }
}

/// Entry added to a pending transaction in this unit of work
#[derive(Debug, Clone)]
pub(crate) struct PendingEntry {
    pub(crate) entry: LedgerEntry,
    pub(crate) exempt: bool,
}

/// Ledger transaction begun in this unit of work, sealed at commit
#[derive(Debug, Clone)]
pub(crate) struct PendingTransaction {
    pub(crate) tx: Transaction,
    pub(crate) entries: Vec<PendingEntry>,
}

/// Outcome of a committed unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Ledger transactions sealed, in chain order
    pub sealed: Vec<(u64, TxHash)>,
    /// Chain head after commit
    pub head: ChainHead,
}

/// One atomic unit of work.
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls everything back.
pub struct UnitOfWork<'a> {
    store: &'a Store,
    txn: DbTransaction<'a, TransactionDB>,
    deadline: Option<Instant>,
    pub(crate) head: ChainHead,
    pub(crate) next_seq: u64,
    pub(crate) pending: Vec<PendingTransaction>,
    started: Instant,
}

impl fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("deadline", &self.deadline)
            .field("head", &self.head)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ReadTables for UnitOfWork<'_> {
    fn get_raw(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.store.cf_handle(table)?;
        Ok(self.txn.get_cf(cf, key)?)
    }

    fn scan_raw(
        &self,
        table: &str,
        mode: IteratorMode<'_>,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<RawRow>> {
        let cf = self.store.cf_handle(table)?;
        collect_scan(self.txn.iterator_cf(cf, mode), prefix, limit)
    }
}

impl<'a> UnitOfWork<'a> {
    /// Fail with `Timeout` once the caller's deadline has passed
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// Store this unit of work belongs to
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Read a row and hold an exclusive lock on it until the unit of work ends
    pub fn get_for_update<V: DeserializeOwned>(&self, table: &str, key: &[u8]) -> Result<Option<V>> {
        self.lock_row(table, key)
    }

    /// Insert or replace a row in a caller-owned table
    pub fn put<V: Serialize>(&self, table: &str, key: &[u8], value: &V) -> Result<()> {
        Self::guard(table)?;
        self.put_raw(table, key, value)
    }

    /// Delete a row from a caller-owned table
    pub fn delete(&self, table: &str, key: &[u8]) -> Result<()> {
        Self::guard(table)?;
        let cf = self.store.cf_handle(table)?;
        self.txn.delete_cf(cf, key)?;
        Ok(())
    }

    /// Insert a row unless the key is taken.
    ///
    /// Returns the existing row when there is one; the new value is then not written.
    pub fn insert_if_absent<V>(&self, table: &str, key: &[u8], value: &V) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        Self::guard(table)?;
        match self.lock_row(table, key)? {
            Some(existing) => Ok(Some(existing)),
            None => {
                self.put_raw(table, key, value)?;
                Ok(None)
            }
        }
    }

    fn guard(table: &str) -> Result<()> {
        if LEDGER_TABLES.contains(&table) {
            return Err(Error::integrity(format!(
                "table '{}' is append-only ledger state",
                table
            )));
        }
        Ok(())
    }

    pub(crate) fn lock_row<V: DeserializeOwned>(&self, table: &str, key: &[u8]) -> Result<Option<V>> {
        self.check_deadline()?;
        let cf = self.store.cf_handle(table)?;
        let bytes = self
            .txn
            .get_for_update_cf(cf, key, true)
            .map_err(|e| self.lock_error(e))?;
        bytes
            .map(|bytes| bincode::deserialize(&bytes).map_err(Error::from))
            .transpose()
    }

    pub(crate) fn put_raw<V: Serialize>(&self, table: &str, key: &[u8], value: &V) -> Result<()> {
        let cf = self.store.cf_handle(table)?;
        self.txn.put_cf(cf, key, bincode::serialize(value)?)?;
        Ok(())
    }

    fn lock_error(&self, err: rocksdb::Error) -> Error {
        if self.check_deadline().is_err() {
            Error::Timeout
        } else {
            err.into()
        }
    }

    /// Validate and seal every pending ledger transaction, then commit atomically
    pub fn commit(mut self) -> Result<CommitSummary> {
        self.check_deadline()?;
        let (sealed, entries) = self.seal()?;
        self.check_deadline()?;

        let store = self.store;
        let head = self.head;
        let started = self.started;
        self.txn.commit().map_err(Error::from)?;

        store
            .metrics
            .record_commit(sealed.len(), entries, started.elapsed().as_secs_f64());
        if !sealed.is_empty() {
            store.metrics.update_chain_height(head.seq);
        }

        Ok(CommitSummary { sealed, head })
    }

    /// Discard everything written in this unit of work
    pub fn rollback(self) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }

    fn seal(&mut self) -> Result<(Vec<(u64, TxHash)>, usize)> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| p.tx.seq);

        // Net movement per non-exempt account across the whole unit of work
        let mut net: BTreeMap<AccountId, Amount> = BTreeMap::new();
        let mut entry_count = 0;
        for p in &pending {
            if p.entries.len() < 2 {
                return Err(Error::integrity(format!(
                    "transaction {} has {} entries",
                    p.tx.id,
                    p.entries.len()
                )));
            }
            let mut sum: Amount = 0;
            for e in &p.entries {
                if e.entry.delta == 0 {
                    return Err(Error::integrity(format!("transaction {} has a zero entry", p.tx.id)));
                }
                sum = sum
                    .checked_add(e.entry.delta)
                    .ok_or_else(|| Error::integrity("entry sum overflows"))?;
                if !e.exempt {
                    let slot = net.entry(e.entry.account_id).or_insert(0);
                    *slot = slot
                        .checked_add(e.entry.delta)
                        .ok_or_else(|| Error::integrity("net movement overflows"))?;
                }
            }
            if sum != 0 {
                return Err(Error::integrity(format!(
                    "transaction {} entries sum to {}",
                    p.tx.id, sum
                )));
            }
            entry_count += p.entries.len();
        }

        // Replay from the balance each account had before this unit of work;
        // no transaction may leave a non-exempt account negative
        let mut running: BTreeMap<AccountId, Amount> = BTreeMap::new();
        for (account, movement) in &net {
            let balance: Amount = self.get(CF_BALANCES, account.as_bytes())?.unwrap_or(0);
            let before = balance
                .checked_sub(*movement)
                .ok_or_else(|| Error::integrity("opening balance overflows"))?;
            running.insert(*account, before);
        }
        for p in &pending {
            let mut moved: BTreeMap<AccountId, Amount> = BTreeMap::new();
            for e in p.entries.iter().filter(|e| !e.exempt) {
                let slot = moved.entry(e.entry.account_id).or_insert(0);
                *slot = slot.saturating_add(e.entry.delta);
            }
            for (account, movement) in moved {
                let slot = running.entry(account).or_insert(0);
                let after = slot
                    .checked_add(movement)
                    .ok_or_else(|| Error::integrity("running balance overflows"))?;
                if after < 0 {
                    return Err(Error::InsufficientFunds {
                        account,
                        balance: *slot,
                        requested: movement.saturating_neg(),
                    });
                }
                *slot = after;
            }
        }

        let mut sealed = Vec::with_capacity(pending.len());
        for p in pending {
            let mut tx = p.tx;
            let entries: Vec<LedgerEntry> = p.entries.into_iter().map(|e| e.entry).collect();
            let hash = crate::chain::seal_hash(self.head.hash.as_ref(), &tx, &entries);
            tx.prev_hash = self.head.hash;
            tx.hash = Some(hash);
            self.put_raw(CF_TRANSACTIONS, &keys::seq(tx.seq), &tx)?;
            self.head = ChainHead {
                seq: tx.seq,
                hash: Some(hash),
            };

            tracing::debug!(tx_id = %tx.id, seq = tx.seq, hash = %hash, "Transaction sealed");
            sealed.push((tx.seq, hash));
        }

        if !sealed.is_empty() {
            let head = self.head;
            self.put_raw(CF_META, HEAD_KEY, &head)?;
        }

        Ok((sealed, entry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let store = Store::open_with_tables(&config, &["notes"]).unwrap();
        assert!(store.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(store.db.cf_handle("notes").is_some());
        assert_eq!(store.read().chain_head().unwrap(), ChainHead::default());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let (config, _temp) = test_config();
        let err = Store::open_with_tables(&config, &[CF_BALANCES]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_put_commit_and_read() {
        let (config, _temp) = test_config();
        let store = Store::open_with_tables(&config, &["notes"]).unwrap();

        let uow = store.begin(None).unwrap();
        uow.put("notes", b"a", &"first".to_string()).unwrap();
        let own: Option<String> = uow.get("notes", b"a").unwrap();
        assert_eq!(own.as_deref(), Some("first"));
        uow.commit().unwrap();

        let stored: Option<String> = store.read().get("notes", b"a").unwrap();
        assert_eq!(stored.as_deref(), Some("first"));
    }

    #[test]
    fn test_drop_rolls_back() {
        let (config, _temp) = test_config();
        let store = Store::open_with_tables(&config, &["notes"]).unwrap();

        {
            let uow = store.begin(None).unwrap();
            uow.put("notes", b"a", &1u32).unwrap();
        }

        let stored: Option<u32> = store.read().get("notes", b"a").unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_ledger_tables_are_guarded() {
        let (config, _temp) = test_config();
        let store = Store::open(&config).unwrap();
        let uow = store.begin(None).unwrap();

        let err = uow.put(CF_ENTRIES, b"x", &1i64).unwrap_err();
        assert!(matches!(err, Error::IntegrityViolation(_)));
        let err = uow.delete(CF_TRANSACTIONS, b"x").unwrap_err();
        assert!(matches!(err, Error::IntegrityViolation(_)));
    }

    #[test]
    fn test_insert_if_absent_returns_existing() {
        let (config, _temp) = test_config();
        let store = Store::open_with_tables(&config, &["keys"]).unwrap();
        let uow = store.begin(None).unwrap();

        assert_eq!(uow.insert_if_absent("keys", b"k", &1u32).unwrap(), None);
        assert_eq!(uow.insert_if_absent("keys", b"k", &2u32).unwrap(), Some(1));
        uow.commit().unwrap();

        let stored: Option<u32> = store.read().get("keys", b"k").unwrap();
        assert_eq!(stored, Some(1));
    }

    #[test]
    fn test_prefix_scan_in_key_order() {
        let (config, _temp) = test_config();
        let store = Store::open_with_tables(&config, &["rows"]).unwrap();
        let uow = store.begin(None).unwrap();
        uow.put("rows", b"b2", &2u8).unwrap();
        uow.put("rows", b"a1", &0u8).unwrap();
        uow.put("rows", b"b1", &1u8).unwrap();
        uow.put("rows", b"c1", &3u8).unwrap();
        uow.commit().unwrap();

        let rows: Vec<(Vec<u8>, u8)> = store.read().scan_prefix("rows", b"b").unwrap();
        let values: Vec<u8> = rows.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let (config, _temp) = test_config();
        let store = Store::open(&config).unwrap();
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(store.begin(Some(past)), Err(Error::Timeout)));
    }

    #[test]
    fn test_writer_lock_contention_is_a_conflict() {
        let (config, _temp) = test_config();
        let mut config = config;
        config.locking.lock_timeout_ms = 50;
        let store = Store::open(&config).unwrap();

        let _writer = store.begin(None).unwrap();
        let err = store.begin(None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }
}
