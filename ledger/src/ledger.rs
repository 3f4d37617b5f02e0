//! Main ledger orchestration layer
//!
//! Ties together storage, the hash chain, the balance projection and metrics
//! into an async API. Every call runs one unit of work on tokio's blocking
//! pool, so RocksDB lock waits never stall the async workers.
//!
//! # Example
//!
//! ```no_run
//! use wagerbook_ledger::{Config, Ledger, Posting, Reason, TransactionRequest, UserId};
//!
//! #[tokio::main]
//! async fn main() -> wagerbook_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let user = UserId::new();
//!     let tx_id = ledger
//!         .execute("gift", None, move |uow| {
//!             let house = uow.ensure_house()?;
//!             let wallet = uow.ensure_default_wallet(user)?;
//!             uow.record_transaction(&TransactionRequest::new(
//!                 Reason::Gift,
//!                 vec![Posting::debit(house.id, 100), Posting::credit(wallet.id, 100)],
//!             ))
//!         })
//!         .await?;
//!
//!     let record = ledger.transaction(tx_id).await?;
//!     assert_eq!(record.entries.len(), 2);
//!     Ok(())
//! }
//! ```

use crate::{
    audit::{self, BalanceMismatch, ChainReport},
    error::ErrorKind,
    journal,
    metrics::Metrics,
    projection::{BalanceProjection, ProjectionHandle},
    storage::{ReadView, Store, UnitOfWork},
    types::{AccountId, Amount, HistoryItem, TransactionId, TransactionRecord, TransactionRequest},
    Config, Error, Result,
};
use std::fmt;
use std::time::{Duration, Instant};

/// Errors that can be classified into the shared taxonomy
pub trait Classify: fmt::Display {
    /// Coarse error kind
    fn kind(&self) -> ErrorKind;
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        Error::kind(self)
    }
}

/// Main ledger interface
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Storage shared with blocking tasks
    store: Store,

    /// Cached balances for read-mostly views
    projection: BalanceProjection,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_tables(config, &[]).await
    }

    /// Open ledger and register caller-owned tables in the same store
    pub async fn open_with_tables(config: Config, tables: &[&str]) -> Result<Self> {
        config.validate()?;
        let store = Store::open_with_tables(&config, tables)?;

        Ok(Self {
            store,
            projection: BalanceProjection::new(),
            config,
        })
    }

    /// Underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        self.store.metrics()
    }

    /// Cached balance projection
    pub fn projection(&self) -> &BalanceProjection {
        &self.projection
    }

    /// Start refreshing the projection in the background
    pub fn start_projection(&self) -> ProjectionHandle {
        self.projection
            .spawn_refresher(self.store.clone(), self.config.projection.refresh_interval())
    }

    /// Run `op` as one atomic unit of work.
    ///
    /// The closure runs on the blocking pool with the writer lock held. If it
    /// returns `Ok`, pending ledger transactions are validated and sealed and
    /// everything commits together; any error rolls the whole unit back.
    pub async fn execute<T, E, F>(&self, op: &'static str, timeout: Option<Duration>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Classify + Send + 'static,
    {
        let store = self.store.clone();
        let deadline = timeout.map(|t| Instant::now() + t);

        let result = tokio::task::spawn_blocking(move || -> std::result::Result<T, E> {
            let mut uow = store.begin(deadline)?;
            let value = f(&mut uow)?;
            uow.commit()?;
            Ok(value)
        })
        .await
        .unwrap_or_else(|join| Err(E::from(Error::from(join))));

        if let Err(e) = &result {
            self.store.metrics().record_rollback();
            match e.kind() {
                ErrorKind::Integrity => {
                    self.store.metrics().record_integrity_violation();
                    tracing::error!(op, error = %e, "Unit of work aborted by integrity violation");
                }
                ErrorKind::Internal => {
                    tracing::error!(op, error = %e, "Unit of work failed");
                }
                kind => {
                    tracing::debug!(op, ?kind, error = %e, "Unit of work rolled back");
                }
            }
        }

        result
    }

    /// Run `f` against a consistent snapshot on the blocking pool
    pub async fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ReadView<'_>) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store.read()))
            .await
            .unwrap_or_else(|join| Err(E::from(Error::from(join))))
    }

    /// Record one balanced transaction in its own unit of work
    pub async fn record_transaction(
        &self,
        request: TransactionRequest,
        timeout: Option<Duration>,
    ) -> Result<TransactionId> {
        request.validate()?;
        self.execute("record_transaction", timeout, move |uow| uow.record_transaction(&request))
            .await
    }

    /// Authoritative balance of an account
    pub async fn balance(&self, account: AccountId) -> Result<Amount> {
        self.read(move |view| journal::balance(view, &account)).await
    }

    /// Transaction with its entries
    pub async fn transaction(&self, id: TransactionId) -> Result<TransactionRecord> {
        self.read(move |view| journal::transaction(view, &id)).await
    }

    /// Public transaction log, newest first
    pub async fn transactions_page(&self, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.read(move |view| journal::transactions_page(view, offset, limit))
            .await
    }

    /// Statement of one account, newest first
    pub async fn account_history(&self, account: AccountId, limit: usize) -> Result<Vec<HistoryItem>> {
        self.read(move |view| journal::account_history(view, &account, limit))
            .await
    }

    /// Walk and verify the whole hash chain
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        let report = self.read(|view| audit::verify_chain(view)).await?;
        match &report.first_broken {
            Some((seq, fault)) => {
                tracing::error!(seq, ?fault, checked = report.transactions_checked, "Hash chain broken")
            }
            None => tracing::info!(checked = report.transactions_checked, "Hash chain verified"),
        }
        Ok(report)
    }

    /// Compare the balance aggregate with the entries
    pub async fn verify_balances(&self) -> Result<Vec<BalanceMismatch>> {
        self.read(|view| audit::verify_balances(view)).await
    }

    /// Sum of all balances
    pub async fn total_supply(&self) -> Result<i128> {
        self.read(|view| audit::total_supply(view)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Posting, Reason, UserId};
    use tempfile::TempDir;

    async fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Ledger::open(config).await.unwrap();
        (ledger, temp_dir)
    }

    async fn fund(ledger: &Ledger, user: UserId, amount: Amount) -> AccountId {
        ledger
            .execute("fund", None, move |uow| {
                let house = uow.ensure_house()?;
                let wallet = uow.ensure_default_wallet(user)?;
                uow.record_transaction(&TransactionRequest::new(
                    Reason::Gift,
                    vec![Posting::debit(house.id, amount), Posting::credit(wallet.id, amount)],
                ))?;
                Ok::<_, Error>(wallet.id)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger().await;
        assert_eq!(ledger.total_supply().await.unwrap(), 0);
        assert!(ledger.verify_chain().await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_record_transaction_validates_first() {
        let (ledger, _temp) = create_test_ledger().await;
        let wallet = fund(&ledger, UserId::new(), 10).await;

        let err = ledger
            .record_transaction(
                TransactionRequest::new(Reason::Transfer, vec![Posting::credit(wallet, 5)]),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(ledger.metrics().rollbacks_total.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_unit_leaves_nothing_behind() {
        let (ledger, _temp) = create_test_ledger().await;
        let alice = fund(&ledger, UserId::new(), 10).await;
        let bob = UserId::new();

        let err = ledger
            .execute("transfer", None, move |uow| {
                let to = uow.ensure_default_wallet(bob)?;
                uow.record_transaction(&TransactionRequest::new(
                    Reason::Transfer,
                    vec![Posting::debit(alice, 11), Posting::credit(to.id, 11)],
                ))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        assert_eq!(ledger.balance(alice).await.unwrap(), 10);
        assert_eq!(ledger.transactions_page(0, 10).await.unwrap().len(), 1);
        assert_eq!(ledger.metrics().rollbacks_total.get(), 1);
        assert!(ledger
            .read(move |view| crate::accounts::default_wallet(view, &bob))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_deadline_rolls_back() {
        let (ledger, _temp) = create_test_ledger().await;
        let user = UserId::new();

        let err = ledger
            .execute("slow", Some(Duration::from_millis(20)), move |uow| {
                uow.ensure_default_wallet(user)?;
                std::thread::sleep(Duration::from_millis(50));
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(ledger
            .read(move |view| crate::accounts::default_wallet(view, &user))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_history_and_lookup() {
        let (ledger, _temp) = create_test_ledger().await;
        let user = UserId::new();
        let wallet = fund(&ledger, user, 7).await;
        fund(&ledger, user, 3).await;

        let history = ledger.account_history(wallet, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].delta, 3);
        assert_eq!(history[1].delta, 7);

        let record = ledger.transaction(history[1].transaction.id).await.unwrap();
        assert_eq!(record.transaction.reason, Reason::Gift);
        assert_eq!(ledger.balance(wallet).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_concurrent_units_serialise() {
        let (ledger, _temp) = create_test_ledger().await;
        let user = UserId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { fund(&ledger, user, 5).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = ledger.verify_chain().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.transactions_checked, 8);
        assert_eq!(ledger.total_supply().await.unwrap(), 0);
        assert!(ledger.verify_balances().await.unwrap().is_empty());
    }
}
