//! Serialized access to the shared zstd codec.
//!
//! One [`CodecQueue`] is constructed per process and handed to every
//! compressor and extractor as an `Arc`. It owns a single reusable zstd
//! compression/decompression context behind a fair (FIFO) async mutex, so
//! requests from independent archive handles run strictly one after
//! another in arrival order. The context is created lazily; concurrent
//! first callers share one in-flight initialization.
//!
//! The codec is one-shot: callers hand over the whole buffer. The work
//! itself runs on tokio's blocking pool while the queue stays held, so a
//! large frame does not stall the runtime thread.

use std::io::Read;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::zip::CompressionMethod;
use crate::{Error, Result};

/// zstd level the context is created with; every request sets its own.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Largest output buffer reserved up front from a caller's size hint.
/// Bigger frames are decoded incrementally and grow with the real output.
const MAX_BULK_CAPACITY: usize = 64 * 1024 * 1024;

struct ZstdContext {
    compressor: zstd::bulk::Compressor<'static>,
    decompressor: zstd::bulk::Decompressor<'static>,
}

impl ZstdContext {
    fn new() -> Result<Self> {
        log::debug!("initializing zstd codec context");
        Ok(Self {
            compressor: zstd::bulk::Compressor::new(DEFAULT_ZSTD_LEVEL).map_err(zstd_error)?,
            decompressor: zstd::bulk::Decompressor::new().map_err(zstd_error)?,
        })
    }

    fn decompress(&mut self, data: &[u8], capacity: usize) -> Result<Vec<u8>> {
        if capacity <= MAX_BULK_CAPACITY {
            return self
                .decompressor
                .decompress(data, capacity)
                .map_err(zstd_error);
        }

        let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(MAX_BULK_CAPACITY));
        zstd::stream::read::Decoder::new(data)
            .map_err(zstd_error)?
            .take((capacity as u64).saturating_add(1))
            .read_to_end(&mut out)
            .map_err(zstd_error)?;
        if out.len() > capacity {
            return Err(Error::codec(
                CompressionMethod::Zstd,
                format!("frame is larger than the {capacity} bytes expected"),
            ));
        }
        Ok(out)
    }
}

fn zstd_error(err: impl std::fmt::Display) -> Error {
    Error::codec(CompressionMethod::Zstd, err)
}

/// Process-wide serialization point for zstd calls.
#[derive(Default)]
pub struct CodecQueue {
    /// `None` while a request has the context out on the blocking pool, or
    /// after such a request was dropped or panicked.
    context: OnceCell<Mutex<Option<ZstdContext>>>,
}

impl std::fmt::Debug for CodecQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecQueue")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl CodecQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common `Arc<CodecQueue>` handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.initialized()
    }

    /// Run `job` against the context, one request at a time.
    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ZstdContext) -> Result<T> + Send + 'static,
    {
        let slot = self
            .context
            .get_or_try_init(|| async { ZstdContext::new().map(|ctx| Mutex::new(Some(ctx))) })
            .await?;
        let mut guard = slot.lock().await;
        let mut context = match guard.take() {
            Some(context) => context,
            None => ZstdContext::new()?,
        };

        let (context, result) = tokio::task::spawn_blocking(move || {
            let result = job(&mut context);
            (context, result)
        })
        .await
        .map_err(zstd_error)?;

        *guard = Some(context);
        result
    }

    /// Compress `data` as a single zstd frame.
    pub async fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let data = data.to_vec();
        self.run(move |ctx| {
            ctx.compressor
                .set_compression_level(level)
                .map_err(zstd_error)?;
            ctx.compressor.compress(&data).map_err(zstd_error)
        })
        .await
    }

    /// Decompress a single zstd frame of at most `capacity` bytes.
    ///
    /// `capacity` usually comes from an archive directory; it bounds the
    /// output but is only reserved up front when it is modest.
    pub async fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>> {
        let data = data.to_vec();
        self.run(move |ctx| ctx.decompress(&data, capacity)).await
    }
}
