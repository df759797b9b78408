//! Error taxonomy for the order store, retry queue and remote service.
//!
//! Store-level errors propagate to the immediate caller. Remote errors never
//! escape the reconciler: they are folded into the order's `sync_error` and
//! the retry queue instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No order exists with the given frontend id.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// Unique frontend id generation ran out of attempts.
    #[error("could not generate a unique order id after {attempts} attempts")]
    IdentifierExhausted { attempts: u32 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    /// A persisted column held a value outside its enum domain.
    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot reach order service at {0}")]
    Network(String),

    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    #[error("invalid response from order service: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// HTTP status of the failure, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
