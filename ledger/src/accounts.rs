//! Account store
//!
//! Wallets belong to users, escrows to bets. Each user has at most one default
//! wallet and each bet exactly one escrow, found through the `account_index`
//! table. Creation is create-if-absent on the index row: the index key is
//! locked, and a caller that finds it already set re-reads the existing account.

use crate::{
    error::{Error, Result},
    storage::{keys, ReadTables, UnitOfWork, CF_ACCOUNTS, CF_ACCOUNT_INDEX},
    types::{Account, AccountId, AccountOwner, BetId, UserId},
};
use chrono::Utc;

/// Load an account by id
pub fn account<R: ReadTables>(reader: &R, id: &AccountId) -> Result<Account> {
    reader
        .get(CF_ACCOUNTS, id.as_bytes())?
        .ok_or_else(|| Error::AccountNotFound(id.to_string()))
}

fn indexed<R: ReadTables>(reader: &R, index_key: &[u8]) -> Result<Option<Account>> {
    match reader.get::<AccountId>(CF_ACCOUNT_INDEX, index_key)? {
        Some(id) => account(reader, &id).map(Some),
        None => Ok(None),
    }
}

/// Default wallet of a user, if it has been created
pub fn default_wallet<R: ReadTables>(reader: &R, user: &UserId) -> Result<Option<Account>> {
    indexed(reader, &keys::wallet(user))
}

/// Escrow of a bet, if it has been created
pub fn escrow<R: ReadTables>(reader: &R, bet: &BetId) -> Result<Option<Account>> {
    indexed(reader, &keys::escrow(bet))
}

/// The house account, if it has been created
pub fn house<R: ReadTables>(reader: &R) -> Result<Option<Account>> {
    indexed(reader, keys::HOUSE)
}

/// Every account, in id order
pub fn all_accounts<R: ReadTables>(reader: &R) -> Result<Vec<Account>> {
    Ok(reader
        .scan_prefix::<Account>(CF_ACCOUNTS, &[])?
        .into_iter()
        .map(|(_, account)| account)
        .collect())
}

impl UnitOfWork<'_> {
    /// Default wallet of `user`, created on first use
    pub fn ensure_default_wallet(&self, user: UserId) -> Result<Account> {
        if user.is_house() {
            return self.ensure_house();
        }
        self.create_if_absent(&keys::wallet(&user), || Account {
            id: AccountId::new(),
            owner: AccountOwner::User(user),
            name: format!("wallet:{}", user),
            is_default: true,
            is_house: false,
            created_at: Utc::now(),
        })
    }

    /// Escrow of `bet`, created on first stake
    pub fn ensure_escrow(&self, bet: BetId) -> Result<Account> {
        self.create_if_absent(&keys::escrow(&bet), || Account {
            id: AccountId::new(),
            owner: AccountOwner::Escrow(bet),
            name: format!("escrow:{}", bet),
            is_default: false,
            is_house: false,
            created_at: Utc::now(),
        })
    }

    /// The house wallet, created lazily on first use
    pub fn ensure_house(&self) -> Result<Account> {
        let account = self.create_if_absent(keys::HOUSE, || Account {
            id: AccountId::new(),
            owner: AccountOwner::User(UserId::HOUSE),
            name: "wallet:house".to_string(),
            is_default: true,
            is_house: true,
            created_at: Utc::now(),
        })?;
        let wallet_key = keys::wallet(&UserId::HOUSE);
        if self.lock_row::<AccountId>(CF_ACCOUNT_INDEX, &wallet_key)?.is_none() {
            self.put_raw(CF_ACCOUNT_INDEX, &wallet_key, &account.id)?;
        }
        Ok(account)
    }

    fn create_if_absent(&self, index_key: &[u8], build: impl FnOnce() -> Account) -> Result<Account> {
        if let Some(id) = self.lock_row::<AccountId>(CF_ACCOUNT_INDEX, index_key)? {
            return account(self, &id);
        }

        let created = build();
        self.put_raw(CF_ACCOUNTS, created.id.as_bytes(), &created)?;
        self.put_raw(CF_ACCOUNT_INDEX, index_key, &created.id)?;

        tracing::debug!(account_id = %created.id, name = %created.name, "Account created");

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::Store, Config};
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Store::open(&config).unwrap(), temp_dir)
    }

    #[test]
    fn test_wallet_created_once() {
        let (store, _temp) = test_store();
        let user = UserId::new();

        let uow = store.begin(None).unwrap();
        let first = uow.ensure_default_wallet(user).unwrap();
        let second = uow.ensure_default_wallet(user).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.owner, AccountOwner::User(user));
        assert!(first.is_default && !first.is_house);
        uow.commit().unwrap();

        let uow = store.begin(None).unwrap();
        assert_eq!(uow.ensure_default_wallet(user).unwrap().id, first.id);
    }

    #[test]
    fn test_escrow_is_per_bet() {
        let (store, _temp) = test_store();
        let bet_a = BetId::new();
        let bet_b = BetId::new();

        let uow = store.begin(None).unwrap();
        let a = uow.ensure_escrow(bet_a).unwrap();
        let b = uow.ensure_escrow(bet_b).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.is_escrow());
        assert!(!a.is_default);
        assert_eq!(a.owner.bet_id(), Some(bet_a));
        assert_eq!(a.name, format!("escrow:{}", bet_a));
        uow.commit().unwrap();

        let view = store.read();
        assert_eq!(escrow(&view, &bet_a).unwrap().unwrap().id, a.id);
        assert!(escrow(&view, &BetId::new()).unwrap().is_none());
    }

    #[test]
    fn test_house_is_lazy_and_unique() {
        let (store, _temp) = test_store();
        assert!(house(&store.read()).unwrap().is_none());

        let uow = store.begin(None).unwrap();
        let house_account = uow.ensure_house().unwrap();
        assert!(house_account.is_house);
        assert_eq!(uow.ensure_default_wallet(UserId::HOUSE).unwrap().id, house_account.id);
        uow.commit().unwrap();

        let view = store.read();
        assert_eq!(house(&view).unwrap().unwrap().id, house_account.id);
        assert_eq!(
            default_wallet(&view, &UserId::HOUSE).unwrap().unwrap().id,
            house_account.id
        );
    }

    #[test]
    fn test_unknown_account() {
        let (store, _temp) = test_store();
        let err = account(&store.read(), &AccountId::new()).unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
    }
}
