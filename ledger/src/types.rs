//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer smallest currency units)
//! - Invariants held by construction where the type system allows it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amount in the platform's smallest currency unit
pub type Amount = i64;

/// Define a `Copy` newtype over a UUID used as an entity identifier
#[macro_export]
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        pub struct $name($crate::uuid::Uuid);

        impl $name {
            /// Generate a new time-ordered identifier
            pub fn new() -> Self {
                Self($crate::uuid::Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: $crate::uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &$crate::uuid::Uuid {
                &self.0
            }

            /// Raw 16 bytes, used as key material
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::uuid::Error;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                $crate::uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Fund-holding account identifier
    AccountId
);
uuid_id!(
    /// User identifier (supplied by the identity collaborator)
    UserId
);
uuid_id!(
    /// Bet identifier
    BetId
);
uuid_id!(
    /// Ledger transaction identifier
    TransactionId
);

impl UserId {
    /// Well-known identity of the platform's own user
    pub const HOUSE: UserId = UserId(Uuid::from_u128(0x0000_0000_0000_7000_8000_0000_0000_0001));

    /// Whether this is the house user
    pub fn is_house(&self) -> bool {
        *self == Self::HOUSE
    }
}

/// Who holds the funds of an account.
///
/// An account belongs either to a user or to a bet's escrow, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountOwner {
    /// User wallet
    User(UserId),
    /// Escrow holding the stakes of one bet
    Escrow(BetId),
}

impl AccountOwner {
    /// Owning user, if this is a wallet
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            AccountOwner::User(user) => Some(*user),
            AccountOwner::Escrow(_) => None,
        }
    }

    /// Owning bet, if this is an escrow
    pub fn bet_id(&self) -> Option<BetId> {
        match self {
            AccountOwner::User(_) => None,
            AccountOwner::Escrow(bet) => Some(*bet),
        }
    }
}

/// Fund-holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,
    /// Wallet owner or escrowed bet
    pub owner: AccountOwner,
    /// Human readable name (`wallet:<user>`, `escrow:<bet>`)
    pub name: String,
    /// Default wallet of its user (escrows are always default for their bet)
    pub is_default: bool,
    /// The house account may go negative to front funds
    pub is_house: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether this is a bet escrow
    pub fn is_escrow(&self) -> bool {
        matches!(self.owner, AccountOwner::Escrow(_))
    }
}

/// Economic reason of a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    /// House gift to one user
    Gift,
    /// House gift to every user
    Airdrop,
    /// Stake, payout or house sweep of a bet
    Bet,
    /// Peer-to-peer transfer
    Transfer,
}

impl Reason {
    /// Canonical upper-case code, also used in the hash payload
    pub fn code(&self) -> &'static str {
        match self {
            Reason::Gift => "GIFT",
            Reason::Airdrop => "AIRDROP",
            Reason::Bet => "BET",
            Reason::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// SHA-256 digest of a sealed transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.to_hex())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Atomic economic event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: TransactionId,
    /// Position in the hash chain (authoritative order)
    pub seq: u64,
    /// Economic reason
    pub reason: Reason,
    /// Associated bet, if any
    pub bet_id: Option<BetId>,
    /// Free-form note
    pub note: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Hash of the preceding transaction in the chain
    pub prev_hash: Option<TxHash>,
    /// Hash of this transaction; `None` until sealed at commit
    pub hash: Option<TxHash>,
}

impl Transaction {
    /// Whether the hash has been sealed
    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }
}

/// One signed delta against one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Owning transaction
    pub tx_id: TransactionId,
    /// Chain position of the owning transaction
    pub seq: u64,
    /// Position within the transaction
    pub index: u32,
    /// Account moved
    pub account_id: AccountId,
    /// Signed movement
    pub delta: Amount,
}

/// Requested movement against one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Account moved
    pub account: AccountId,
    /// Signed movement
    pub delta: Amount,
}

impl Posting {
    /// Debit `amount` from `account`
    pub fn debit(account: AccountId, amount: Amount) -> Self {
        Self {
            account,
            delta: -amount,
        }
    }

    /// Credit `amount` to `account`
    pub fn credit(account: AccountId, amount: Amount) -> Self {
        Self {
            account,
            delta: amount,
        }
    }
}

/// Input of `record_transaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Economic reason
    pub reason: Reason,
    /// Associated bet
    pub bet_id: Option<BetId>,
    /// Free-form note
    pub note: Option<String>,
    /// Balanced movements
    pub postings: Vec<Posting>,
}

impl TransactionRequest {
    /// New request without bet or note
    pub fn new(reason: Reason, postings: Vec<Posting>) -> Self {
        Self {
            reason,
            bet_id: None,
            note: None,
            postings,
        }
    }

    /// Attach a bet
    pub fn with_bet(mut self, bet_id: BetId) -> Self {
        self.bet_id = Some(bet_id);
        self
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Shape check performed before any store access
    pub fn validate(&self) -> crate::Result<()> {
        if self.postings.len() < 2 {
            return Err(crate::Error::Validation(format!(
                "a transaction needs at least 2 entries, got {}",
                self.postings.len()
            )));
        }
        if self.postings.iter().any(|p| p.delta == 0) {
            return Err(crate::Error::Validation(
                "zero-delta entries are not allowed".to_string(),
            ));
        }
        let sum = self
            .postings
            .iter()
            .try_fold(0i64, |acc, p| acc.checked_add(p.delta))
            .ok_or_else(|| crate::Error::Validation("entry sum overflows".to_string()))?;
        if sum != 0 {
            return Err(crate::Error::Validation(format!(
                "entries must sum to zero, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// One line of an account statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Transaction that moved the account
    pub transaction: Transaction,
    /// Net movement of the account within that transaction
    pub delta: Amount,
}

/// Transaction with its entries, as shown in the public log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction header
    pub transaction: Transaction,
    /// All entries, in insertion order
    pub entries: Vec<LedgerEntry>,
}

/// Last sealed position of the hash chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the last sealed transaction (0 = empty chain)
    pub seq: u64,
    /// Hash of the last sealed transaction
    pub hash: Option<TxHash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_is_exclusive() {
        let user = UserId::new();
        let bet = BetId::new();
        let wallet = AccountOwner::User(user);
        let escrow = AccountOwner::Escrow(bet);

        assert_eq!(wallet.user_id(), Some(user));
        assert_eq!(wallet.bet_id(), None);
        assert_eq!(escrow.user_id(), None);
        assert_eq!(escrow.bet_id(), Some(bet));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(Reason::Gift.code(), "GIFT");
        assert_eq!(Reason::Airdrop.to_string(), "AIRDROP");
        assert_eq!(Reason::Bet.code(), "BET");
        assert_eq!(Reason::Transfer.code(), "TRANSFER");
    }

    #[test]
    fn test_request_validation() {
        let a = AccountId::new();
        let b = AccountId::new();

        let ok = TransactionRequest::new(Reason::Gift, vec![Posting::debit(a, 5), Posting::credit(b, 5)]);
        assert!(ok.validate().is_ok());

        let single = TransactionRequest::new(Reason::Gift, vec![Posting::credit(b, 5)]);
        assert!(single.validate().is_err());

        let unbalanced =
            TransactionRequest::new(Reason::Gift, vec![Posting::debit(a, 5), Posting::credit(b, 4)]);
        assert!(unbalanced.validate().unwrap_err().to_string().contains("sum to zero"));

        let zero = TransactionRequest::new(
            Reason::Gift,
            vec![Posting::debit(a, 5), Posting::credit(b, 5), Posting::credit(b, 0)],
        );
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_house_user_is_stable() {
        assert!(UserId::HOUSE.is_house());
        assert!(!UserId::new().is_house());
        assert_eq!(UserId::HOUSE.to_string(), "00000000-0000-7000-8000-000000000001");
    }

    #[test]
    fn test_hash_hex() {
        let hash = TxHash::from_bytes([0xab; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_string().starts_with("abab"));
    }
}
