mod http;
mod local;
mod memory;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;

use crate::Result;

/// Trait for random access reading from a data source.
///
/// The archive code only ever talks to this trait, so buffered
/// ([`MemoryReader`]) and streaming ([`LocalFileReader`],
/// [`HttpRangeReader`]) archives go through the same parsing path.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Release the underlying handle. Reads after `close` may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "wanted {} bytes at offset {:#x}, source ended after {}",
                        buf.len(),
                        offset,
                        filled
                    ),
                )
                .into());
            }
            filled += n;
        }
        Ok(())
    }
}
