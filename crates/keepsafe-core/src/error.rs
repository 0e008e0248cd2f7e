use std::path::PathBuf;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::keys::KeyError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("no credential with id {0}")]
    NotFound(i64),

    #[error("store is not open")]
    NotOpen,

    #[error("storage at {} is unavailable: {reason}", location.display())]
    StorageUnavailable { location: PathBuf, reason: String },

    #[error("database error: {0}")]
    Storage(#[source] sqlx::Error),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("cannot decrypt secret of credential {id}: {source}")]
    Decryption {
        id: i64,
        #[source]
        source: CryptoError,
    },

    #[error("cannot encrypt secret: {0}")]
    Encryption(#[source] CryptoError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            // close() shut the pool under an in-flight read.
            sqlx::Error::PoolClosed => StoreError::NotOpen,
            e => StoreError::Storage(e),
        }
    }
}

/// Flat classification of [`StoreError`] for callers that branch on the
/// kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotOpen,
    StorageUnavailable,
    Storage,
    KeyAccess,
    KeyFormat,
    Decryption,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation { .. } => ErrorKind::Validation,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::NotOpen => ErrorKind::NotOpen,
            StoreError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            StoreError::Storage(_) => ErrorKind::Storage,
            StoreError::Key(KeyError::Access { .. }) => ErrorKind::KeyAccess,
            StoreError::Key(KeyError::Format { .. }) => ErrorKind::KeyFormat,
            StoreError::Decryption { .. } => ErrorKind::Decryption,
            // A failed encrypt means the key material itself is unusable.
            StoreError::Encryption(_) => ErrorKind::KeyFormat,
        }
    }
}
