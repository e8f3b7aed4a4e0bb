//! Represents a file stored on one of the storage backends.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Metadata row describing one stored file.
///
/// The row never carries the payload itself. `path` is generated from `id`
/// and is never derived from the caller-supplied `name`.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Generated identifier, primary key.
    pub id: Uuid,

    /// Original filename as supplied by the uploader.
    pub name: String,

    /// Transfer encoding declared for the uploaded part.
    pub encoding: String,

    /// MIME type declared for the uploaded part.
    pub mime_type: String,

    /// Backend holding the bytes. Fixed at creation.
    #[sqlx(try_from = "String")]
    pub storage_backend: StorageBackendKind,

    /// Filesystem path (disk) or object key (object store).
    pub path: String,

    /// Whether the stored bytes are ciphertext.
    pub secured: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Storage medium a file lives on.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageBackendKind {
    #[serde(rename = "disk")]
    Disk,
    #[serde(rename = "s3")]
    ObjectStore,
}

impl StorageBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackendKind::Disk => "disk",
            StorageBackendKind::ObjectStore => "s3",
        }
    }
}

impl fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown storage backend `{0}`")]
pub struct UnknownBackend(pub String);

impl FromStr for StorageBackendKind {
    type Err = UnknownBackend;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "disk" => Ok(StorageBackendKind::Disk),
            "s3" => Ok(StorageBackendKind::ObjectStore),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

impl TryFrom<String> for StorageBackendKind {
    type Error = UnknownBackend;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Whether an upload should be encrypted before it reaches the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionMode {
    Encrypt,
    Plain,
}

impl EncryptionMode {
    pub fn is_secured(&self) -> bool {
        matches!(self, EncryptionMode::Encrypt)
    }
}

#[derive(Debug, Error)]
#[error("unknown encryption option `{0}`")]
pub struct UnknownEncryption(pub String);

impl FromStr for EncryptionMode {
    type Err = UnknownEncryption;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "encrypt" => Ok(EncryptionMode::Encrypt),
            "plain" => Ok(EncryptionMode::Plain),
            other => Err(UnknownEncryption(other.to_string())),
        }
    }
}
