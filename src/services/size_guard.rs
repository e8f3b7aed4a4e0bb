//! Chunk-by-chunk size enforcement for inbound streams.
//!
//! The guard never trusts a declared length. It only counts what actually
//! arrives, and refuses the first chunk that would push the running total
//! past the ceiling.

use crate::services::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SizeGuard {
    limit: u64,
    seen: u64,
    tripped: bool,
}

impl SizeGuard {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            seen: 0,
            tripped: false,
        }
    }

    /// Bytes accepted so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Account for the next chunk.
    ///
    /// On overflow the chunk is not counted and must not be forwarded.
    pub fn observe(&mut self, chunk_len: usize) -> StorageResult<()> {
        if self.tripped {
            return Err(StorageError::SizeLimitExceeded { limit: self.limit });
        }
        let next = self.seen.saturating_add(chunk_len as u64);
        if next > self.limit {
            self.tripped = true;
            return Err(StorageError::SizeLimitExceeded { limit: self.limit });
        }
        self.seen = next;
        Ok(())
    }

    /// Fast pre-check against an untrusted declared length.
    pub fn check_declared(&self, declared: Option<u64>) -> StorageResult<()> {
        match declared {
            Some(len) if len > self.limit => Err(StorageError::Validation(
                "File size is too large".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Remove a partially written artifact after `delay`.
///
/// Detached and non-retrying: failures are logged at debug level and
/// dropped. The delay lets any writer still holding the location release it.
pub fn schedule_delayed_removal(
    backend: StorageBackend,
    locator: String,
    delay: Duration,
) -> JoinHandle<()> {
    info!(path = %locator, delay_ms = delay.as_millis() as u64, "scheduling removal of oversize upload");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match backend.remove(&locator).await {
            Ok(()) => debug!(path = %locator, "removed oversize upload"),
            Err(err) => debug!(path = %locator, error = %err, "oversize upload cleanup failed"),
        }
    })
}
