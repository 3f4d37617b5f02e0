//! Read-side balance projection
//!
//! A concurrent cache of every account balance, rebuilt from the store's
//! balance aggregate by a background task. It serves dashboards and
//! leaderboards; authorisation decisions always read the store inside their
//! unit of work instead.
//!
//! ```text
//!   interval tick ──► spawn_blocking(refresh) ──► DashMap<AccountId, Amount>
//!        ▲                                              │
//!        └──────────── shutdown signal ◄── ProjectionHandle
//! ```

use crate::{
    error::{Error, Result},
    journal,
    storage::Store,
    types::{AccountId, Amount},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Cached view of all balances
#[derive(Debug, Clone, Default)]
pub struct BalanceProjection {
    balances: Arc<DashMap<AccountId, Amount>>,
    refreshed_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl BalanceProjection {
    /// Empty projection
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached balance, if the account was seen by the last refresh
    pub fn get(&self, account: &AccountId) -> Option<Amount> {
        self.balances.get(account).map(|b| *b)
    }

    /// Number of cached accounts
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Time of the last successful refresh
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.refreshed_at.read()
    }

    /// Rebuild from a store snapshot. Blocking.
    pub fn refresh(&self, store: &Store) -> Result<usize> {
        let fresh = journal::all_balances(&store.read())?;
        self.balances.retain(|account, _| fresh.contains_key(account));
        for (account, balance) in &fresh {
            self.balances.insert(*account, *balance);
        }
        *self.refreshed_at.write() = Some(Utc::now());
        Ok(fresh.len())
    }

    /// Rebuild on the blocking pool
    pub async fn refresh_async(&self, store: &Store) -> Result<usize> {
        let projection = self.clone();
        let store = store.clone();
        tokio::task::spawn_blocking(move || projection.refresh(&store)).await?
    }

    /// Start the periodic refresher
    pub fn spawn_refresher(&self, store: Store, every: Duration) -> ProjectionHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let projection = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match projection.refresh_async(&store).await {
                            Ok(accounts) => tracing::debug!(accounts, "Balance projection refreshed"),
                            Err(e) => tracing::warn!(error = %e, "Balance projection refresh failed"),
                        }
                    }
                    _ = &mut stop => break,
                }
            }
        });

        ProjectionHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

/// Handle to the background refresher
#[derive(Debug)]
pub struct ProjectionHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ProjectionHandle {
    /// Stop the refresher and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| Error::Concurrency(format!("Projection task failed: {}", e)))
    }
}

impl Drop for ProjectionHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        types::{Posting, Reason, TransactionRequest, UserId},
        Config,
    };
    use tempfile::TempDir;

    fn gifted_store(amount: Amount) -> (Store, AccountId, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let store = Store::open(&config).unwrap();

        let mut uow = store.begin(None).unwrap();
        let house = uow.ensure_house().unwrap();
        let wallet = uow.ensure_default_wallet(UserId::new()).unwrap();
        uow.record_transaction(&TransactionRequest::new(
            Reason::Gift,
            vec![Posting::debit(house.id, amount), Posting::credit(wallet.id, amount)],
        ))
        .unwrap();
        uow.commit().unwrap();
        (store, wallet.id, temp_dir)
    }

    #[test]
    fn test_refresh_populates() {
        let (store, wallet, _temp) = gifted_store(25);
        let projection = BalanceProjection::new();
        assert!(projection.is_empty());

        assert_eq!(projection.refresh(&store).unwrap(), 2);
        assert_eq!(projection.get(&wallet), Some(25));
        assert!(projection.refreshed_at().is_some());
    }

    #[tokio::test]
    async fn test_background_refresher() {
        let (store, wallet, _temp) = gifted_store(40);
        let projection = BalanceProjection::new();

        let handle = projection.spawn_refresher(store.clone(), Duration::from_millis(10));
        for _ in 0..100 {
            if projection.get(&wallet).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(projection.get(&wallet), Some(40));

        handle.shutdown().await.unwrap();
    }
}
