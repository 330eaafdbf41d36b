use thiserror::Error;

use super::types::{PageId, TxnId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt encoding: {0}")]
    CorruptEncoding(String),

    #[error("Out of space: page limit {limit} reached")]
    OutOfSpace { limit: u64 },

    #[error("Transaction {0} is closed")]
    TransactionClosed(TxnId),

    #[error("Another write transaction is active")]
    WriteConflict,

    #[error("Key of {size} bytes exceeds the maximum of {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Entry of {size} bytes exceeds the maximum of {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl DbError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        DbError::CorruptEncoding(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        DbError::InvariantViolation(msg.into())
    }

    /// True for failures that leave on-disk state unusable by the issuing transaction.
    pub fn is_io(&self) -> bool {
        matches!(self, DbError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
