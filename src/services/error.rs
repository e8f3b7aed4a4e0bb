//! Error taxonomy shared by the transfer pipeline, the backends, and the
//! coordinators.

use crate::{models::file::StorageBackendKind, services::cipher::CipherError};
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Which database constraint a rejected write tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Other,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Validation(String),
    #[error("file size is too large (limit {limit} bytes)")]
    SizeLimitExceeded { limit: u64 },
    #[error("file `{0}` does not exist")]
    EntityNotFound(Uuid),
    #[error("file storage medium mismatch: stored on `{stored}`, requested `{requested}`")]
    BackendMismatch {
        stored: StorageBackendKind,
        requested: StorageBackendKind,
    },
    #[error("storage backend `{0}` is not configured")]
    BackendUnavailable(StorageBackendKind),
    #[error("object `{0}` is missing from storage")]
    ObjectMissing(String),
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        message: String,
    },
    #[error("stream interrupted: {0}")]
    Streaming(#[source] io::Error),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    ObjectStore(#[from] opendal::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Wrap a transport error from the inbound or outbound byte stream.
    pub fn streaming<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StorageError::Streaming(io::Error::other(err))
    }

    pub fn is_size_limit(&self) -> bool {
        matches!(self, StorageError::SizeLimitExceeded { .. })
    }
}
