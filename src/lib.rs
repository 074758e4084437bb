//! # sealzip
//!
//! A ZIP-compatible archive engine with per-entry SHA-256 digests and an
//! archive-level Merkle root.
//!
//! Archives are read through the [`ReadAt`] trait, so the same code path
//! serves in-memory buffers, local files and remote archives fetched with
//! HTTP Range requests. Only the end records and the central directory are
//! read to list an archive.
//!
//! ## Features
//!
//! - Store, Deflate and Zstandard (method 93) entries
//! - CRC-32 and SHA-256 computed in the same pass as compression
//! - Legacy PKZIP stream encryption
//! - ZIP64 end records and extra fields
//! - Symlinks, hardlinks, Unix modes, owners and mtimes
//! - Raw entry copying between archives without recompression
//! - Bounded-memory streaming on both the write and the read side
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sealzip::{CodecQueue, ExtractOptions, MemoryReader, WriteOptions, ZipExtractor, ZipWriter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut writer = ZipWriter::new(Vec::new(), CodecQueue::shared(), WriteOptions::new())?;
//!     writer.add_bytes("hello.txt", b"hello world").await?;
//!     let (bytes, summary) = writer.finish().await?;
//!     println!("{} entries, {} bytes", summary.entries, summary.bytes_written);
//!
//!     let reader = Arc::new(MemoryReader::new(bytes));
//!     let extractor = ZipExtractor::new(reader, CodecQueue::shared(), ExtractOptions::new()).await?;
//!     for entry in extractor.list_files()? {
//!         let data = extractor.extract_to_memory(entry).await?;
//!         println!("{}: {} bytes", entry.file_name, data.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cipher;
pub mod cli;
pub mod codec;
pub mod error;
pub mod hash;
pub mod io;
pub mod options;
pub mod zip;

pub use cli::Cli;
pub use codec::CodecQueue;
pub use error::{Error, IntegrityKind, Result};
pub use hash::{Hash, MerkleOptions, MerkleTree, OddLeaf};
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use options::{DigestCheck, ExtractOptions, Password, WriteOptions};
pub use zip::{
    CompressionMethod, EntryKind, RESERVED_METADATA_NAMES, WriteSummary, ZipArchive, ZipEntry,
    ZipExtractor, ZipWriter,
};
