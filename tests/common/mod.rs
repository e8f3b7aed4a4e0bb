#![allow(dead_code)]

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use opendal::Operator;
use sqlx::sqlite::SqlitePoolOptions;
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;
use storage_server::{
    models::file::{StorageBackendKind, StoredObject},
    services::{
        backend::{DiskBackend, ObjectStoreBackend},
        cipher::CipherKeys,
        error::StorageResult,
        file_service::{FileService, TransferSettings, UploadRequest},
        metadata::MetadataStore,
    },
};

pub const KEY_SEED: &str = "key-seed";
pub const IV_SEED: &str = "iv-seed";

pub fn settings(max_file_size: u64) -> TransferSettings {
    TransferSettings {
        max_file_size,
        chunk_size: 64,
        cleanup_delay: Duration::from_millis(20),
    }
}

/// Object store on the local filesystem. Unlike the in-memory service it
/// accepts multiple writes per object, so uploads take the chunked writer
/// path with staging and abort.
pub fn fs_store(dir: &Path) -> ObjectStoreBackend {
    let objects = dir.join("objects");
    let staging = dir.join("staging");
    std::fs::create_dir_all(&objects).expect("objects dir");
    std::fs::create_dir_all(&staging).expect("staging dir");
    let op = Operator::new(
        opendal::services::Fs::default()
            .root(&objects.to_string_lossy())
            .atomic_write_dir(&staging.to_string_lossy()),
    )
    .expect("fs operator")
    .finish();
    ObjectStoreBackend::new(op, 64)
}

pub async fn metadata(migrated: bool) -> MetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("sqlite pool");
    let store = MetadataStore::new(Arc::new(pool));
    if migrated {
        store.migrate().await.expect("migrate");
    }
    store
}

pub struct Harness {
    pub service: FileService,
    pub object_store: ObjectStoreBackend,
    pub store_dir: TempDir,
}

pub async fn harness(disk_root: &Path, max_file_size: u64) -> Harness {
    let store_dir = TempDir::new().expect("store dir");
    let object_store = fs_store(store_dir.path());
    let service = FileService::new(
        metadata(true).await,
        DiskBackend::new(disk_root, 64),
        Some(object_store.clone()),
        CipherKeys::derive(KEY_SEED, IV_SEED),
        settings(max_file_size),
    );
    Harness {
        service,
        object_store,
        store_dir,
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

pub fn chunked(data: &[u8], size: usize) -> impl Stream<Item = StorageResult<Bytes>> {
    let chunks: Vec<_> = data
        .chunks(size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

pub fn request(name: &str, backend: StorageBackendKind, secured: bool) -> UploadRequest {
    UploadRequest {
        name: name.to_string(),
        encoding: "7bit".into(),
        mime_type: "application/pdf".into(),
        backend,
        secured,
        declared_length: None,
    }
}

pub async fn upload(
    service: &FileService,
    name: &str,
    backend: StorageBackendKind,
    secured: bool,
    data: &[u8],
) -> StorageResult<StoredObject> {
    service
        .upload(request(name, backend, secured), chunked(data, 10))
        .await
}

pub async fn download(
    service: &FileService,
    id: uuid::Uuid,
    backend: StorageBackendKind,
) -> StorageResult<Vec<u8>> {
    let mut download = service.download(id, backend).await?;
    let mut out = Vec::new();
    while let Some(chunk) = download.body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

pub async fn row_count(store: &MetadataStore) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
        .fetch_one(store.pool())
        .await
        .expect("count rows")
}

/// Total size of all regular files below `dir`.
pub fn bytes_under(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| match entry.metadata() {
                    Ok(meta) if meta.is_dir() => bytes_under(&entry.path()),
                    Ok(meta) => meta.len(),
                    Err(_) => 0,
                })
                .sum()
        })
        .unwrap_or(0)
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}
