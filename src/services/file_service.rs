//! src/services/file_service.rs
//!
//! FileService: drives uploads and downloads end to end. Object bytes go to
//! a [`StorageBackend`] through a [`TransferPipeline`]; the describing row
//! goes to SQLite through [`MetadataStore`].
//!
//! An upload writes the bytes and inserts the row concurrently, waits for
//! both to settle, then reconciles. Storage writes are never cancelled
//! mid-flight, so neither side short-circuits the other.

use crate::{
    models::file::{StorageBackendKind, StoredObject},
    services::{
        backend::{ByteStream, DiskBackend, ObjectStoreBackend, StorageBackend},
        cipher::CipherKeys,
        error::{StorageError, StorageResult},
        metadata::MetadataStore,
        pipeline::TransferPipeline,
        size_guard::{SizeGuard, schedule_delayed_removal},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::{pin::pin, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_024 * 1_024 * 2_000;
pub const DEFAULT_CHUNK_SIZE: usize = 1_024 * 1_024 * 5;
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(4_000);

/// Limits applied to every transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub cleanup_delay: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }
}

/// Caller-supplied description of an inbound file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub encoding: String,
    pub mime_type: String,
    pub backend: StorageBackendKind,
    pub secured: bool,
    /// Untrusted length hint, only used for the early pre-check.
    pub declared_length: Option<u64>,
}

/// A located file ready to be streamed out.
///
/// Headers derived from `object` must be sent before polling `body`.
pub struct Download {
    pub object: StoredObject,
    pub body: TransferPipeline<ByteStream>,
}

#[derive(Clone)]
pub struct FileService {
    metadata: MetadataStore,
    disk: StorageBackend,
    object_store: Option<StorageBackend>,
    keys: Arc<CipherKeys>,
    settings: TransferSettings,
}

impl FileService {
    pub fn new(
        metadata: MetadataStore,
        disk: DiskBackend,
        object_store: Option<ObjectStoreBackend>,
        keys: CipherKeys,
        settings: TransferSettings,
    ) -> Self {
        Self {
            metadata,
            disk: StorageBackend::Disk(disk),
            object_store: object_store.map(StorageBackend::ObjectStore),
            keys: Arc::new(keys),
            settings,
        }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Backend for `kind`, or `BackendUnavailable` if it is not configured.
    pub fn backend(&self, kind: StorageBackendKind) -> StorageResult<&StorageBackend> {
        match kind {
            StorageBackendKind::Disk => Ok(&self.disk),
            StorageBackendKind::ObjectStore => self
                .object_store
                .as_ref()
                .ok_or(StorageError::BackendUnavailable(kind)),
        }
    }

    /// Reject a declared length above the limit before any byte is read.
    pub fn precheck(&self, declared_length: Option<u64>) -> StorageResult<()> {
        SizeGuard::new(self.settings.max_file_size).check_declared(declared_length)
    }

    /// Store one file and its row. Returns the committed row.
    ///
    /// On failure no identifier is handed out. The first fault wins, with
    /// the byte write taking precedence over the insert.
    pub async fn upload<S>(&self, request: UploadRequest, source: S) -> StorageResult<StoredObject>
    where
        S: Stream<Item = StorageResult<Bytes>>,
    {
        self.precheck(request.declared_length)?;
        let backend = self.backend(request.backend)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let object = StoredObject {
            id,
            path: backend.locator(id, &request.mime_type),
            name: request.name,
            encoding: request.encoding,
            mime_type: request.mime_type,
            storage_backend: backend.kind(),
            secured: request.secured,
            created_at: now,
            updated_at: now,
        };

        let cipher = object.secured.then(|| self.keys.encryptor());
        let guard = SizeGuard::new(self.settings.max_file_size);
        let mut pipeline = pin!(TransferPipeline::upload(source, guard, cipher));

        let (written, inserted) = tokio::join!(
            backend.put(&object.path, pipeline.as_mut()),
            self.metadata.insert(&object),
        );

        match (written, inserted) {
            (Ok(bytes), Ok(())) => {
                info!(
                    id = %object.id,
                    backend = %object.storage_backend,
                    secured = object.secured,
                    bytes_in = pipeline.bytes_in(),
                    bytes_stored = bytes,
                    "upload committed"
                );
                Ok(object)
            }
            (Err(write_err), inserted) => {
                warn!(id = %object.id, path = %object.path, error = %write_err, "upload write failed");
                if write_err.is_size_limit() {
                    schedule_delayed_removal(
                        backend.clone(),
                        object.path.clone(),
                        self.settings.cleanup_delay,
                    );
                }
                match inserted {
                    Ok(()) => self.discard_row(object.id).await,
                    Err(insert_err) => {
                        debug!(id = %object.id, error = %insert_err, "insert also failed")
                    }
                }
                Err(write_err)
            }
            (Ok(_), Err(insert_err)) => {
                warn!(id = %object.id, error = %insert_err, "upload insert failed");
                self.discard_bytes(backend, &object.path).await;
                Err(insert_err)
            }
        }
    }

    /// Look up `id`, check it lives on `requested`, and open its byte stream.
    pub async fn download(
        &self,
        id: Uuid,
        requested: StorageBackendKind,
    ) -> StorageResult<Download> {
        let object = self
            .metadata
            .find_by_id(id)
            .await?
            .ok_or(StorageError::EntityNotFound(id))?;

        if object.storage_backend != requested {
            return Err(StorageError::BackendMismatch {
                stored: object.storage_backend,
                requested,
            });
        }

        let backend = self.backend(object.storage_backend)?;
        let source = backend.get(&object.path).await?;
        let cipher = object.secured.then(|| self.keys.decryptor());

        debug!(id = %object.id, path = %object.path, secured = object.secured, "streaming download");
        Ok(Download {
            body: TransferPipeline::download(source, cipher),
            object,
        })
    }

    async fn discard_row(&self, id: Uuid) {
        match self.metadata.delete_by_id(id).await {
            Ok(_) => debug!(%id, "removed row of failed upload"),
            Err(err) => error!(%id, error = %err, "could not remove row of failed upload"),
        }
    }

    async fn discard_bytes(&self, backend: &StorageBackend, locator: &str) {
        match backend.remove(locator).await {
            Ok(()) => debug!(path = %locator, "removed bytes of failed upload"),
            Err(err) => error!(path = %locator, error = %err, "could not remove bytes of failed upload"),
        }
    }
}
