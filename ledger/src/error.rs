//! Error types for the ledger

use crate::types::{AccountId, Amount};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, shared by every crate built on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input, rejected before touching the store
    Validation,
    /// Unknown user, bet, option or account
    NotFound,
    /// Balance too low for the requested movement
    InsufficientFunds,
    /// State does not allow the operation (closed, frozen, contended)
    Conflict,
    /// Idempotent resubmission, resolved as already applied
    Duplicate,
    /// A ledger invariant would break; always a bug or corruption
    Integrity,
    /// Caller lacks the required role
    Forbidden,
    /// Caller-supplied deadline expired
    Timeout,
    /// Storage, serialization or runtime failure
    Internal,
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before any store access
    #[error("Validation error: {0}")]
    Validation(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Balance of a non-house account would go negative
    #[error("Insufficient funds on account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account being debited
        account: AccountId,
        /// Balance seen inside the unit of work
        balance: Amount,
        /// Amount that was requested
        requested: Amount,
    },

    /// Zero-sum, shape or append-only invariant would be broken
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Lock wait exceeded or writer contention
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unit of work ran past its deadline
    #[error("Unit of work exceeded its deadline")]
    Timeout,

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (blocking task panicked or was cancelled)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::AccountNotFound(_) | Error::TransactionNotFound(_) => ErrorKind::NotFound,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Error::IntegrityViolation(_) => ErrorKind::Integrity,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Timeout => ErrorKind::Timeout,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the message can be shown to the caller as-is
    pub fn is_user_facing(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Integrity | ErrorKind::Internal)
    }

    pub(crate) fn integrity(msg: impl Into<String>) -> Self {
        Error::IntegrityViolation(msg.into())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            rocksdb::ErrorKind::TimedOut | rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain => {
                Error::Conflict(format!("lock wait failed: {}", err))
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Concurrency(err.to_string())
    }
}
