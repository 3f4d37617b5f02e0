//! Hash chain over ledger transactions
//!
//! Each sealed transaction commits to its own content and to the hash of the
//! transaction before it in sequence order:
//!
//! ```text
//! payload = SHA-256(reason "|" bet_id "|" created_at "|" canonical_entries)
//! hash    = SHA-256(prev_hash || payload)     (SHA-256(payload) for the first)
//! ```

use crate::types::{AccountId, Amount, LedgerEntry, Transaction, TxHash};
use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

/// Render entries as `account_id:delta` pairs sorted by `(account_id, delta)`
pub fn canonical_entries<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a AccountId, Amount)>,
{
    let mut pairs: Vec<(&AccountId, Amount)> = entries.into_iter().collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(account, delta)| format!("{}:{}", account, delta))
        .collect::<Vec<_>>()
        .join(",")
}

/// Digest of a transaction's own content
pub fn payload_digest(tx: &Transaction, entries: &[LedgerEntry]) -> [u8; 32] {
    let bet_id = tx.bet_id.map(|b| b.to_string()).unwrap_or_default();
    let created_at = tx.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let canonical = canonical_entries(entries.iter().map(|e| (&e.account_id, e.delta)));

    let mut hasher = Sha256::new();
    hasher.update(tx.reason.code().as_bytes());
    hasher.update(b"|");
    hasher.update(bet_id.as_bytes());
    hasher.update(b"|");
    hasher.update(created_at.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    hasher.finalize().into()
}

/// Link a payload to its predecessor
pub fn chain_hash(prev: Option<&TxHash>, payload: &[u8; 32]) -> TxHash {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload);
    TxHash::from_bytes(hasher.finalize().into())
}

/// Hash a transaction would be sealed with after `prev`
pub fn seal_hash(prev: Option<&TxHash>, tx: &Transaction, entries: &[LedgerEntry]) -> TxHash {
    chain_hash(prev, &payload_digest(tx, entries))
}
