use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),
    #[error("internal state error: {0}")]
    Internal(String),
}
