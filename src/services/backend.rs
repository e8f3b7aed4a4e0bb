//! Storage backends: local disk and an S3-compatible object store.
//!
//! Both variants accept an already-transformed byte stream (ciphertext when
//! the file is secured) and hand it back unchanged; neither knows about
//! encryption. Locators are generated from the file identifier plus an
//! extension guessed from the declared MIME type, never from the caller's
//! filename.

use crate::{
    config::S3Settings,
    models::file::StorageBackendKind,
    services::error::{StorageError, StorageResult},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, pin_mut, stream::BoxStream};
use opendal::Operator;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Boxed byte stream returned by [`StorageBackend::get`].
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

const FALLBACK_EXTENSION: &str = "bin";

/// Build the backend-neutral object key `<id>.<ext>`.
pub fn object_key(id: Uuid, mime_type: &str) -> String {
    format!("{}.{}", id, extension_for(mime_type))
}

/// Canonical extensions for types where `mime_guess` lists a rarer one first.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("application/javascript", "js"),
    ("application/msword", "doc"),
    ("application/octet-stream", "bin"),
    ("application/xml", "xml"),
    ("audio/mpeg", "mpga"),
    ("image/jpeg", "jpeg"),
    ("image/tiff", "tif"),
    ("text/csv", "csv"),
    ("text/html", "html"),
    ("text/javascript", "js"),
    ("text/plain", "txt"),
    ("text/xml", "xml"),
    ("video/mp4", "mp4"),
    ("video/mpeg", "mpeg"),
    ("video/quicktime", "mov"),
];

/// Extension for `mime_type`, ignoring parameters.
fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if let Some(&(_, ext)) = PREFERRED_EXTENSIONS.iter().find(|(mime, _)| *mime == essence) {
        return ext;
    }
    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
}

#[derive(Clone, Debug)]
pub enum StorageBackend {
    Disk(DiskBackend),
    ObjectStore(ObjectStoreBackend),
}

impl StorageBackend {
    pub fn kind(&self) -> StorageBackendKind {
        match self {
            StorageBackend::Disk(_) => StorageBackendKind::Disk,
            StorageBackend::ObjectStore(_) => StorageBackendKind::ObjectStore,
        }
    }

    /// Locator recorded as `path` for a new file.
    pub fn locator(&self, id: Uuid, mime_type: &str) -> String {
        let key = object_key(id, mime_type);
        match self {
            StorageBackend::Disk(disk) => disk.locate(&key),
            StorageBackend::ObjectStore(_) => key,
        }
    }

    /// Write `stream` under `locator`. Returns the number of bytes stored.
    ///
    /// A fault from the stream stops the write and is returned as-is; any
    /// partial artifact is left for the caller to deal with.
    pub async fn put<S>(&self, locator: &str, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>>,
    {
        match self {
            StorageBackend::Disk(disk) => disk.put(locator, stream).await,
            StorageBackend::ObjectStore(store) => store.put(locator, stream).await,
        }
    }

    /// Open the bytes stored under `locator`.
    ///
    /// Fails with [`StorageError::ObjectMissing`] when nothing is stored there.
    pub async fn get(&self, locator: &str) -> StorageResult<ByteStream> {
        match self {
            StorageBackend::Disk(disk) => disk.get(locator).await,
            StorageBackend::ObjectStore(store) => store.get(locator).await,
        }
    }

    /// Delete whatever is stored under `locator`. Absent is not an error.
    pub async fn remove(&self, locator: &str) -> StorageResult<()> {
        match self {
            StorageBackend::Disk(disk) => disk.remove(locator).await,
            StorageBackend::ObjectStore(store) => store.remove(locator).await,
        }
    }

    /// Readiness probe: a disk round trip, or an object-store listing.
    pub async fn check(&self) -> StorageResult<()> {
        match self {
            StorageBackend::Disk(disk) => disk.check().await,
            StorageBackend::ObjectStore(store) => {
                store.op.list("/").await?;
                Ok(())
            }
        }
    }
}

/// Files under a root directory, one file per stored object.
#[derive(Clone, Debug)]
pub struct DiskBackend {
    root: PathBuf,
    chunk_size: usize,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    fn locate(&self, key: &str) -> String {
        self.root.join(key).to_string_lossy().into_owned()
    }

    async fn put<S>(&self, path: &str, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>>,
    {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let mut written: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        debug!(path = %path.display(), bytes = written, "disk write complete");
        Ok(written)
    }

    async fn get(&self, path: &str) -> StorageResult<ByteStream> {
        let file = File::open(path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectMissing(path.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok(ReaderStream::with_capacity(file, self.chunk_size)
            .map_err(StorageError::Io)
            .boxed())
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path);
                Ok(())
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn check(&self) -> StorageResult<()> {
        const PROBE: &[u8] = b"readyz";
        let probe = self.root.join(format!(".readyz-{}", Uuid::new_v4()));

        fs::write(&probe, PROBE).await?;
        let read = fs::read(&probe).await;
        if let Err(err) = fs::remove_file(&probe).await {
            debug!(path = %probe.display(), error = %err, "could not remove probe file");
        }
        if read? != PROBE {
            return Err(StorageError::Validation("probe file content mismatch".into()));
        }
        Ok(())
    }
}

/// Objects in a bucket of an S3-compatible store, addressed by key.
#[derive(Clone, Debug)]
pub struct ObjectStoreBackend {
    op: Operator,
    chunk_size: usize,
}

impl ObjectStoreBackend {
    pub fn new(op: Operator, chunk_size: usize) -> Self {
        Self {
            op,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Build an operator for an S3-compatible endpoint.
    ///
    /// Path-style addressing (opendal's default) so MinIO and SeaweedFS work.
    pub fn s3(settings: &S3Settings, chunk_size: usize) -> StorageResult<Self> {
        let mut builder = opendal::services::S3::default()
            .region(&settings.region)
            .bucket(&settings.bucket);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let (Some(key_id), Some(secret)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            builder = builder.access_key_id(key_id).secret_access_key(secret);
        }

        let op = Operator::new(builder)?
            .layer(opendal::layers::LoggingLayer::default())
            .layer(
                opendal::layers::RetryLayer::new()
                    .with_max_times(3)
                    .with_jitter(),
            )
            .finish();

        Ok(Self::new(op, chunk_size))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    async fn put<S>(&self, key: &str, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>>,
    {
        pin_mut!(stream);
        if !self.op.info().full_capability().write_can_multi {
            return self.put_once(key, stream).await;
        }

        let mut writer = self.op.writer_with(key).chunk(self.chunk_size).await?;

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let result = match chunk {
                Ok(chunk) => {
                    written += chunk.len() as u64;
                    writer.write(chunk).await.map_err(StorageError::from)
                }
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                // Nothing is committed until close; discard what was staged.
                if let Err(abort_err) = writer.abort().await {
                    debug!(key, error = %abort_err, "aborting object write failed");
                }
                return Err(err);
            }
        }
        writer.close().await?;

        debug!(key, bytes = written, "object write complete");
        Ok(written)
    }

    /// Services without multi-write support take the object in one call.
    async fn put_once<S>(&self, key: &str, mut stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>> + Unpin,
    {
        let mut chunks = Vec::new();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            chunks.push(chunk);
        }
        self.op.write(key, opendal::Buffer::from(chunks)).await?;

        debug!(key, bytes = written, "object write complete (single shot)");
        Ok(written)
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        self.op.stat(key).await.map_err(|err| {
            if err.kind() == opendal::ErrorKind::NotFound {
                StorageError::ObjectMissing(key.to_string())
            } else {
                StorageError::ObjectStore(err)
            }
        })?;

        let reader = self.op.reader_with(key).chunk(self.chunk_size).await?;
        let stream = reader.into_bytes_stream(..).await?;
        Ok(stream.map_err(StorageError::Streaming).boxed())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.op.delete(key).await?;
        Ok(())
    }
}
