//! Wagerbook Ledger
//!
//! Double-entry, hash-chained ledger for a virtual currency, stored in RocksDB.
//!
//! # Architecture
//!
//! - **Unit of work**: every operation is one pessimistic RocksDB transaction
//! - **Single writer**: mutating units lock the chain head first, so sequence
//!   assignment is race-free and lock order is fixed
//! - **Deferred seal**: zero-sum and balance checks plus the hash seal run
//!   once, just before commit, over the final entry set
//! - **Projection**: a background-refreshed balance cache for read-mostly views
//!
//! # Invariants
//!
//! - Zero-sum: the entries of every transaction sum to zero
//! - Conservation: all balances together sum to zero (the house fronts funds)
//! - Non-negative wallets: only the house account may go below zero
//! - Append-only: committed transactions and entries never change
//! - Chain: each transaction's hash commits to its predecessor's

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod audit;
pub mod chain;
pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod metrics;
pub mod projection;
pub mod storage;
pub mod types;

// Re-exports
pub use uuid;
pub use audit::{BalanceMismatch, ChainFault, ChainReport};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ledger::{Classify, Ledger};
pub use projection::{BalanceProjection, ProjectionHandle};
pub use storage::{CommitSummary, ReadTables, ReadView, Store, UnitOfWork, LEDGER_TABLES};
pub use types::{
    Account, AccountId, AccountOwner, Amount, BetId, ChainHead, HistoryItem, LedgerEntry, Posting,
    Reason, Transaction, TransactionId, TransactionRecord, TransactionRequest, TxHash, UserId,
};
