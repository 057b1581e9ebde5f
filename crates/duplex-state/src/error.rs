//! Errors raised by the deployment history log.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open history database at {path}: {message}")]
    Open { path: String, message: String },

    /// redb failed underneath a read or an append.
    #[error("history database error: {0}")]
    Database(String),

    #[error("history entry #{seq} is unreadable: {message}")]
    CorruptRecord { seq: u64, message: String },

    #[error("cannot encode history record for {tag}: {message}")]
    Encode { tag: String, message: String },
}

impl StateError {
    pub(crate) fn database(e: impl Into<redb::Error>) -> Self {
        StateError::Database(e.into().to_string())
    }
}
