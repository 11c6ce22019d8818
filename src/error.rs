//! Error taxonomy for the storage engine
//!
//! Empty ranges and empty statistics windows are not errors; they come back
//! as empty/zero-valued results.

use crate::types::ItemId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A lookup that must find a row found none
    #[error("no {what} found for item {item}")]
    NotFound { what: &'static str, item: ItemId },

    /// The backing store rejected or could not complete an operation
    #[error("storage failure during {op} ({key}): {source}")]
    Storage {
        op: &'static str,
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("snapshot feed error: {0}")]
    Feed(String),

    /// Blocking store work was cancelled or panicked
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn storage(op: &'static str, key: impl Into<String>, source: rusqlite::Error) -> Self {
        Error::Storage {
            op,
            key: key.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Attach operation/key context to rusqlite results
pub(crate) trait StorageContext<T> {
    fn storage_ctx(self, op: &'static str, key: impl FnOnce() -> String) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn storage_ctx(self, op: &'static str, key: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| Error::storage(op, key(), e))
    }
}
