//! Error types for the market

use crate::types::Wager;
use thiserror::Error;
use wagerbook_ledger::{Classify, ErrorKind};

/// Result type for market operations
pub type Result<T> = std::result::Result<T, Error>;

/// Market errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] wagerbook_ledger::Error),

    /// Malformed or missing input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown user, bet or option
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bet not open, past deadline, voting already started
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller lacks the required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Idempotency key already used; carries the wager recorded first
    #[error("Wager already submitted with key '{}'", .0.idempotency_key)]
    DuplicateSubmission(Box<Wager>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::DuplicateSubmission(_) => ErrorKind::Duplicate,
            Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the message can be shown to the caller as-is
    pub fn is_user_facing(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Integrity | ErrorKind::Internal)
    }

    /// Message safe to show the caller; integrity and internal failures stay opaque
    pub fn public_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            "internal error".to_string()
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        Error::kind(self)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
