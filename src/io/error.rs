//! Errors raised while reading or writing binaries on disk.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("{found} bytes exceeds the {limit}-byte input limit")]
    FileTooLarge { limit: u64, found: u64 },

    #[error("Empty input: {0}")]
    Empty(String),

    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
