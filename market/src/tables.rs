//! Market tables, registered next to the ledger's when the store is opened
//!
//! - `users` - Users (key: user_id)
//! - `usernames` - Lowercased username to user_id
//! - `bets` - Bets with their options (key: bet_id)
//! - `wagers` - Wagers (key: bet_id || wager_id)
//! - `wager_keys` - Idempotency index (key: user_id || idempotency key)
//! - `votes` - Live resolution votes (key: bet_id || moderator)

use crate::types::WagerId;
use wagerbook_ledger::{BetId, UserId};

pub(crate) const USERS: &str = "users";
pub(crate) const USERNAMES: &str = "usernames";
pub(crate) const BETS: &str = "bets";
pub(crate) const WAGERS: &str = "wagers";
pub(crate) const WAGER_KEYS: &str = "wager_keys";
pub(crate) const VOTES: &str = "votes";

/// Tables owned by the market
pub const MARKET_TABLES: &[&str] = &[USERS, USERNAMES, BETS, WAGERS, WAGER_KEYS, VOTES];

pub(crate) mod keys {
    use super::*;

    pub(crate) fn username(name: &str) -> Vec<u8> {
        name.trim().to_lowercase().into_bytes()
    }

    pub(crate) fn wager(bet: &BetId, wager: &WagerId) -> Vec<u8> {
        let mut key = bet.as_bytes().to_vec();
        key.extend_from_slice(wager.as_bytes());
        key
    }

    pub(crate) fn wager_key(user: &UserId, idempotency_key: &str) -> Vec<u8> {
        let mut key = user.as_bytes().to_vec();
        key.extend_from_slice(idempotency_key.as_bytes());
        key
    }

    pub(crate) fn vote(bet: &BetId, moderator: &UserId) -> Vec<u8> {
        let mut key = bet.as_bytes().to_vec();
        key.extend_from_slice(moderator.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usernames_fold_case() {
        assert_eq!(keys::username(" Alice "), keys::username("alice"));
    }

    #[test]
    fn test_composite_keys_share_bet_prefix() {
        let bet = BetId::new();
        let wager = keys::wager(&bet, &WagerId::new());
        let vote = keys::vote(&bet, &UserId::new());
        assert_eq!(&wager[..16], bet.as_bytes());
        assert_eq!(&vote[..16], bet.as_bytes());
        assert_eq!(wager.len(), 32);
    }
}
