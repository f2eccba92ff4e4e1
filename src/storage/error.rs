use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}
