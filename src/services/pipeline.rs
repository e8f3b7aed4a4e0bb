//! Forward-only byte pipe: `source -> [SizeGuard] -> [CipherStage] -> sink`.
//!
//! The pipeline is a `Stream` adaptor, so back-pressure comes for free: a
//! chunk is pulled from the source only when the sink polls for the next one,
//! and each chunk is transformed and handed on before the next is read.
//! After the first fault the source is never polled again.

use crate::services::{
    cipher::CipherStage,
    error::{StorageError, StorageResult},
    size_guard::SizeGuard,
};
use bytes::Bytes;
use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Streaming,
    Finished,
    Faulted,
}

pin_project! {
    pub struct TransferPipeline<S> {
        #[pin]
        source: S,
        guard: Option<SizeGuard>,
        cipher: Option<CipherStage>,
        bytes_in: u64,
        bytes_out: u64,
        state: PipelineState,
    }
}

impl<S> TransferPipeline<S>
where
    S: Stream<Item = StorageResult<Bytes>>,
{
    /// Inbound direction: network source, size-guarded, optionally encrypted.
    pub fn upload(source: S, guard: SizeGuard, cipher: Option<CipherStage>) -> Self {
        Self::new(source, Some(guard), cipher)
    }

    /// Outbound direction: backend source, optionally decrypted.
    pub fn download(source: S, cipher: Option<CipherStage>) -> Self {
        Self::new(source, None, cipher)
    }

    fn new(source: S, guard: Option<SizeGuard>, cipher: Option<CipherStage>) -> Self {
        Self {
            source,
            guard,
            cipher,
            bytes_in: 0,
            bytes_out: 0,
            state: PipelineState::Streaming,
        }
    }

    /// Bytes accepted from the source.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Bytes handed to the sink.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    pub fn is_faulted(&self) -> bool {
        self.state == PipelineState::Faulted
    }
}

impl<S> Stream for TransferPipeline<S>
where
    S: Stream<Item = StorageResult<Bytes>>,
{
    type Item = StorageResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.state != PipelineState::Streaming {
                return Poll::Ready(None);
            }

            match ready!(this.source.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    if let Some(guard) = this.guard.as_mut() {
                        if let Err(err) = guard.observe(chunk.len()) {
                            *this.state = PipelineState::Faulted;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                    *this.bytes_in += chunk.len() as u64;

                    let out = match this.cipher.as_mut() {
                        Some(cipher) => match cipher.update(&chunk) {
                            Ok(out) => out,
                            Err(err) => {
                                *this.state = PipelineState::Faulted;
                                return Poll::Ready(Some(Err(err.into())));
                            }
                        },
                        None => chunk,
                    };
                    // Sub-block input leaves nothing to forward yet.
                    if out.is_empty() {
                        continue;
                    }
                    *this.bytes_out += out.len() as u64;
                    return Poll::Ready(Some(Ok(out)));
                }
                Some(Err(err)) => {
                    *this.state = PipelineState::Faulted;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    *this.state = PipelineState::Finished;
                    let Some(cipher) = this.cipher.as_mut() else {
                        return Poll::Ready(None);
                    };
                    return match cipher.finalize() {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => {
                            *this.bytes_out += tail.len() as u64;
                            Poll::Ready(Some(Ok(tail)))
                        }
                        Err(err) => {
                            *this.state = PipelineState::Faulted;
                            Poll::Ready(Some(Err(StorageError::from(err))))
                        }
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cipher::{BLOCK_SIZE, CipherKeys};
    use futures::{StreamExt, stream};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn chunks(data: &[u8], size: usize) -> Vec<StorageResult<Bytes>> {
        data.chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn drain<S>(mut pipeline: Pin<&mut TransferPipeline<S>>) -> (Vec<u8>, Option<StorageError>)
    where
        S: Stream<Item = StorageResult<Bytes>>,
    {
        let mut out = Vec::new();
        while let Some(item) = pipeline.next().await {
            match item {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(err) => return (out, Some(err)),
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn exact_limit_passes_through() {
        let data = vec![7u8; 100];
        let pipeline = TransferPipeline::upload(
            stream::iter(chunks(&data, 10)),
            SizeGuard::new(100),
            None,
        );
        let mut pipeline = std::pin::pin!(pipeline);
        let (out, err) = drain(pipeline.as_mut()).await;
        assert!(err.is_none());
        assert_eq!(out, data);
        assert_eq!(pipeline.bytes_in(), 100);
        assert_eq!(pipeline.bytes_out(), 100);
    }

    #[tokio::test]
    async fn one_byte_over_faults_without_forwarding() {
        let data = vec![7u8; 101];
        let pipeline = TransferPipeline::upload(
            stream::iter(chunks(&data, 10)),
            SizeGuard::new(100),
            None,
        );
        let mut pipeline = std::pin::pin!(pipeline);
        let (out, err) = drain(pipeline.as_mut()).await;
        assert!(err.unwrap().is_size_limit());
        assert_eq!(out.len(), 100);
        assert!(pipeline.is_faulted());
        assert!(pipeline.next().await.is_none());
    }

    #[tokio::test]
    async fn stops_pulling_after_fault() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::iter(chunks(&[1u8; 64], 8)).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pipeline = TransferPipeline::upload(source, SizeGuard::new(20), None);
        let mut pipeline = std::pin::pin!(pipeline);

        let (out, err) = drain(pipeline.as_mut()).await;
        assert!(err.unwrap().is_size_limit());
        assert_eq!(out.len(), 16);
        assert!(pipeline.next().await.is_none());
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn source_error_propagates() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(StorageError::streaming("connection reset")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let pipeline = TransferPipeline::upload(source, SizeGuard::new(1024), None);
        let mut pipeline = std::pin::pin!(pipeline);
        let (out, err) = drain(pipeline.as_mut()).await;
        assert_eq!(out, b"abc");
        assert!(matches!(err, Some(StorageError::Streaming(_))));
        assert!(pipeline.next().await.is_none());
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_through_pipelines() {
        let keys = CipherKeys::derive("k", "iv");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();

        let up = TransferPipeline::upload(
            stream::iter(chunks(&data, 3)),
            SizeGuard::new(data.len() as u64),
            Some(keys.encryptor()),
        );
        let mut up = std::pin::pin!(up);
        let (cipher, err) = drain(up.as_mut()).await;
        assert!(err.is_none());
        assert_eq!(cipher.len() % BLOCK_SIZE, 0);
        assert_eq!(up.bytes_in(), data.len() as u64);
        assert_eq!(up.bytes_out(), cipher.len() as u64);

        let down = TransferPipeline::download(
            stream::iter(chunks(&cipher, 7)),
            Some(keys.decryptor()),
        );
        let mut down = std::pin::pin!(down);
        let (plain, err) = drain(down.as_mut()).await;
        assert!(err.is_none());
        assert_eq!(plain, data);
    }

    #[tokio::test]
    async fn empty_secured_stream_emits_single_final_block() {
        let keys = CipherKeys::derive("k", "iv");
        let pipeline = TransferPipeline::upload(
            stream::iter(Vec::<StorageResult<Bytes>>::new()),
            SizeGuard::new(0),
            Some(keys.encryptor()),
        );
        let items: Vec<_> = pipeline.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().len(), BLOCK_SIZE);
    }

    #[tokio::test]
    async fn output_chunks_stay_bounded_by_input_chunks() {
        let keys = CipherKeys::derive("k", "iv");
        let chunk = 32;
        let source = stream::iter((0..10_000).map(move |_| Ok(Bytes::from(vec![9u8; chunk]))));
        let mut pipeline = TransferPipeline::upload(
            source,
            SizeGuard::new(u64::MAX),
            Some(keys.encryptor()),
        );

        let mut total = 0usize;
        while let Some(item) = pipeline.next().await {
            let out = item.unwrap();
            assert!(out.len() <= chunk + BLOCK_SIZE);
            total += out.len();
        }
        assert_eq!(total, 10_000 * chunk + BLOCK_SIZE);
    }

    #[tokio::test]
    async fn truncated_ciphertext_faults_at_end_of_stream() {
        let keys = CipherKeys::derive("k", "iv");
        let source = stream::iter(vec![Ok(Bytes::from(vec![0u8; 20]))]);
        let pipeline = TransferPipeline::download(source, Some(keys.decryptor()));
        let mut pipeline = std::pin::pin!(pipeline);
        let (_, err) = drain(pipeline.as_mut()).await;
        assert!(matches!(err, Some(StorageError::Cipher(_))));
    }
}
