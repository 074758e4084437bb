//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory in bounded chunks and decode each record
//! 4. For extraction, read each file's Local File Header and data
//!
//! The same code runs for in-memory and file-backed sources; only the
//! [`ReadAt`] implementation differs.

use std::sync::Arc;

use crate::io::ReadAt;
use crate::options::DEFAULT_BUFFER_SIZE;
use crate::{Error, Result};

use super::entry::{ZipEntry, central_record_len};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives, as declared by the end records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectory {
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
    /// Offset of the 22-byte EOCD record.
    pub eocd_offset: u64,
    pub zip64: bool,
    pub comment: String,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type so local files, in-memory buffers and
/// HTTP sources share one parsing path.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files().await?;
/// for entry in entries {
///     let offset = parser.data_offset(&entry).await?;
///     // Read file data from offset...
/// }
/// ```
#[derive(Debug)]
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
    /// Chunk size for central directory reads
    buffer_size: usize,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Use `buffer_size`-byte reads for the central directory.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(CDFH_MIN_SIZE);
        self
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with
    /// comments by searching the last `min(65557, size)` bytes backwards
    /// for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if no EOCD can be found.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::InvalidFormat(format!(
                "{} bytes is too small for an end of central directory record",
                self.size
            )));
        }

        // Common case: no archive comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // Prefer a record whose comment runs exactly to the end of the file;
        // otherwise take the last one whose comment fits.
        let mut loose = None;
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            let remaining = buf.len() - i - EndOfCentralDirectory::SIZE;
            if comment_len == remaining {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
            if comment_len < remaining && loose.is_none() {
                loose = Some(i);
            }
        }

        if let Some(i) = loose {
            log::warn!(
                "end of central directory at {:#x} is followed by trailing bytes",
                search_start + i as u64
            );
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
            return Ok((eocd, search_start + i as u64));
        }

        Err(Error::InvalidFormat(
            "end of central directory record not found".into(),
        ))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD carries sentinel values. The locator
    /// sits immediately before the regular EOCD and points at the 56-byte
    /// ZIP64 end record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| {
                Error::InvalidFormat("no room for a ZIP64 locator before the end record".into())
            })?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)
            .map_err(|e| with_offset(e, locator_offset))?;

        if locator.eocd64_offset + Zip64EOCD::MIN_SIZE as u64 > locator_offset {
            return Err(Error::InvalidFormat(format!(
                "ZIP64 end record offset {:#x} is out of range",
                locator.eocd64_offset
            )));
        }

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        Zip64EOCD::from_bytes(&eocd64_buf).map_err(|e| with_offset(e, locator.eocd64_offset))
    }

    /// Locate the central directory through the EOCD (and ZIP64 records).
    pub async fn central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let comment = if eocd.comment_len > 0 {
            let mut buf = vec![0u8; eocd.comment_len as usize];
            let start = eocd_offset + EndOfCentralDirectory::SIZE as u64;
            let available = self.size.saturating_sub(start) as usize;
            buf.truncate(available);
            self.reader.read_exact_at(start, &mut buf).await?;
            String::from_utf8_lossy(&buf).into_owned()
        } else {
            String::new()
        };

        let (offset, size, total_entries, zip64) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            log::debug!(
                "ZIP64 end record: {} entries, directory at {:#x}",
                eocd64.total_entries,
                eocd64.cd_offset
            );
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries, true)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                false,
            )
        };

        if offset.checked_add(size).is_none_or(|end| end > eocd_offset) {
            return Err(Error::InvalidFormat(format!(
                "central directory ({size} bytes at {offset:#x}) overlaps the end record at {eocd_offset:#x}"
            )));
        }

        log::debug!("central directory: {total_entries} entries, {size} bytes at {offset:#x}");

        Ok(CentralDirectory {
            offset,
            size,
            total_entries,
            eocd_offset,
            zip64,
            comment,
        })
    }

    /// List all entries in central directory order.
    pub async fn list_files(&self) -> Result<Vec<ZipEntry>> {
        let directory = self.central_directory().await?;
        self.read_central_directory(&directory).await
    }

    /// Decode every record of `directory`, reading at most `buffer_size`
    /// bytes at a time until the declared size has been consumed.
    pub async fn read_central_directory(
        &self,
        directory: &CentralDirectory,
    ) -> Result<Vec<ZipEntry>> {
        let capacity = directory.total_entries.min(u16::MAX as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);

        let mut pending: Vec<u8> = Vec::new();
        // absolute offset of pending[0]
        let mut pending_offset = directory.offset;
        let mut read = 0u64;

        while read < directory.size {
            let chunk_len = (directory.size - read).min(self.buffer_size as u64) as usize;
            let start = pending.len();
            pending.resize(start + chunk_len, 0);
            self.reader
                .read_exact_at(directory.offset + read, &mut pending[start..])
                .await?;
            read += chunk_len as u64;

            let mut consumed = 0;
            while let Some(len) = central_record_len(&pending[consumed..]) {
                if consumed + len > pending.len() {
                    break;
                }
                let (entry, _) = ZipEntry::decode_central_record(&pending[consumed..consumed + len])
                    .map_err(|e| with_offset(e, pending_offset + consumed as u64))?;
                entries.push(entry);
                consumed += len;
            }
            pending.drain(..consumed);
            pending_offset += consumed as u64;
        }

        if !pending.is_empty() {
            return Err(Error::malformed(
                "central directory record",
                pending_offset,
                format!("{} trailing bytes do not form a record", pending.len()),
            ));
        }

        if entries.len() as u64 != directory.total_entries {
            log::warn!(
                "end record declares {} entries, central directory holds {}",
                directory.total_entries,
                entries.len()
            );
        }

        Ok(entries)
    }

    /// Length of the entry's real local header (fixed region + name + extra).
    ///
    /// Read from the local header itself; it may differ from the central
    /// directory's copy of the name and extra lengths.
    pub async fn local_header_len(&self, entry: &ZipEntry) -> Result<u64> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .await?;
        local_header_len(&lfh_buf, entry.lfh_offset)
    }

    /// Offset where the entry's (possibly encrypted) compressed data begins.
    pub async fn data_offset(&self, entry: &ZipEntry) -> Result<u64> {
        Ok(entry.lfh_offset + self.local_header_len(entry).await?)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    fn archive_with(entries: &[ZipEntry], comment: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        for entry in entries {
            let mut entry = entry.clone();
            entry.lfh_offset = out.len() as u64;
            out.extend_from_slice(&entry.encode_local_header().unwrap());
            central.extend_from_slice(&entry.encode_central_record().unwrap());
        }
        let cd_offset = out.len() as u64;
        out.extend_from_slice(&central);
        EndOfCentralDirectory::new(
            entries.len() as u64,
            central.len() as u64,
            cd_offset,
            comment.len() as u16,
        )
        .write_to(&mut out)
        .unwrap();
        out.extend_from_slice(comment.as_bytes());
        out
    }

    fn parser(bytes: Vec<u8>) -> ZipParser<MemoryReader> {
        ZipParser::new(Arc::new(MemoryReader::new(bytes)))
    }

    #[tokio::test]
    async fn lists_entries_in_directory_order() {
        let entries = vec![
            ZipEntry::new("b.txt"),
            ZipEntry::directory("dir"),
            ZipEntry::new("a.txt"),
        ];
        let names: Vec<_> = parser(archive_with(&entries, ""))
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, ["b.txt", "dir/", "a.txt"]);
    }

    #[tokio::test]
    async fn finds_eocd_behind_comment() {
        let bytes = archive_with(&[ZipEntry::new("x")], "archive comment");
        let parser = parser(bytes);
        let directory = parser.central_directory().await.unwrap();
        assert_eq!(directory.comment, "archive comment");
        assert_eq!(directory.total_entries, 1);
        assert!(!directory.zip64);
    }

    #[tokio::test]
    async fn small_chunks_decode_the_same_entries() {
        let entries: Vec<_> = (0..40)
            .map(|i| ZipEntry::new(&format!("file-{i:03}.txt")).with_comment("c"))
            .collect();
        let bytes = archive_with(&entries, "");
        let whole = parser(bytes.clone()).list_files().await.unwrap();
        let chunked = parser(bytes)
            .with_buffer_size(50)
            .list_files()
            .await
            .unwrap();
        assert_eq!(whole.len(), 40);
        assert_eq!(whole, chunked);
    }

    #[tokio::test]
    async fn missing_eocd_is_invalid_format() {
        let err = parser(vec![0u8; 100]).list_files().await.unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        let err = parser(vec![0u8; 5]).list_files().await.unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn corrupt_record_reports_absolute_offset() {
        let mut bytes = archive_with(&[ZipEntry::new("a"), ZipEntry::new("b")], "");
        let directory = parser(bytes.clone()).central_directory().await.unwrap();
        let second = directory.offset as usize + CDFH_MIN_SIZE + 1 + 9;
        // the first record carries a 9-byte Unix time field
        assert_eq!(&bytes[second..second + 4], CDFH_SIGNATURE);
        bytes[second] = b'X';
        let err = parser(bytes).list_files().await.unwrap_err();
        match err {
            Error::MalformedRecord { offset, .. } => assert_eq!(offset, second as u64),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zip64_end_records_are_followed() {
        let entry = ZipEntry::new("big.bin");
        let mut out = entry.encode_local_header().unwrap();
        let central = entry.encode_central_record().unwrap();
        let cd_offset = out.len() as u64;
        out.extend_from_slice(&central);
        let eocd64_offset = out.len() as u64;
        Zip64EOCD::new(1, central.len() as u64, cd_offset)
            .write_to(&mut out)
            .unwrap();
        Zip64EOCDLocator::new(eocd64_offset)
            .write_to(&mut out)
            .unwrap();
        EndOfCentralDirectory::new(u64::MAX, u64::MAX, u64::MAX, 0)
            .write_to(&mut out)
            .unwrap();

        let parser = parser(out);
        let directory = parser.central_directory().await.unwrap();
        assert!(directory.zip64);
        assert_eq!(directory.offset, cd_offset);
        let entries = parser.read_central_directory(&directory).await.unwrap();
        assert_eq!(entries[0].file_name, "big.bin");
        assert_eq!(parser.data_offset(&entries[0]).await.unwrap(), 37);
    }
}
