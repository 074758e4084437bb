//! ZIP archive reading, writing and raw copying.
//!
//! ## Architecture
//!
//! - [`structures`]: signatures, flags and the fixed end records
//! - [`extra`]: typed extra fields (Unix time, owner, SHA-256, links, ZIP64)
//! - [`entry`]: [`ZipEntry`] and its local/central record encoding
//! - [`parser`]: EOCD location and chunked central-directory reads
//! - [`archive`]: the loaded container and its Merkle root
//! - [`compress`] / [`decompress`]: method selection, hashing, cipher
//! - [`extractor`]: extraction to memory, writers, files and directories
//! - [`writer`]: building new archives
//! - [`copy`]: moving entries between archives without recompression
//!
//! Reading starts from the end of the source: the EOCD gives the central
//! directory location, and only that region is read to list entries. This
//! keeps listing cheap for remote sources read through HTTP Range requests.
//!
//! ## Supported features
//!
//! - ZIP64 end records and extra fields
//! - Store, Deflate and Zstandard (method 93)
//! - Legacy PKZIP stream encryption
//! - Per-entry SHA-256 and an archive-level Merkle root
//!
//! Multi-disk archives and other compression methods are not supported.

pub mod archive;
pub mod compress;
pub mod copy;
pub mod decompress;
pub mod entry;
pub mod extra;
mod extractor;
mod parser;
pub mod structures;
mod writer;

pub use archive::{RESERVED_METADATA_NAMES, ZipArchive, content_leaves};
pub use copy::{CopiedEntries, EntrySpan, copy_entries, entry_span, finalize};
pub use entry::{DosDateTime, EntryKind, HardlinkInfo, Owner, ZipEntry};
pub use extractor::{ZipExtractor, ensure_no_symlink_parents, safe_join};
pub use parser::{CentralDirectory, ZipParser};
pub use structures::*;
pub use writer::{WriteSummary, ZipWriter};
