//! Archive writer.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecQueue;
use crate::hash::{Hash, MerkleOptions};
use crate::io::ReadAt;
use crate::options::WriteOptions;
use crate::{Error, Result};

use super::archive::{RESERVED_METADATA_NAMES, ZipArchive, content_leaves};
use super::compress::{compress, compress_stream};
use super::copy::{entry_span, select_entries};
use super::entry::ZipEntry;
use super::structures::*;

/// What [`ZipWriter::finish`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub entries: usize,
    /// Total archive size in bytes.
    pub bytes_written: u64,
    /// Whether ZIP64 end records were needed.
    pub zip64: bool,
    /// Merkle root over file entries; `None` if any lacks a SHA-256 or
    /// there are no file entries.
    pub merkle_root: Option<Hash>,
}

/// Builds an archive on any async sink.
///
/// Entries are written as they are added; the central directory and end
/// records are written by [`finish`](Self::finish).
pub struct ZipWriter<W: AsyncWrite + Unpin> {
    sink: W,
    codec: Arc<CodecQueue>,
    options: WriteOptions,
    entries: Vec<ZipEntry>,
    names: HashSet<String>,
    offset: u64,
    /// (device, inode) of multiply-linked files already added, by name.
    inodes: HashMap<(u64, u64), String>,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(sink: W, codec: Arc<CodecQueue>, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            sink,
            codec,
            options,
            entries: Vec::new(),
            names: HashSet::new(),
            offset: 0,
            inodes: HashMap::new(),
        })
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    /// Entries written so far, in order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn push(&mut self, entry: ZipEntry) -> &ZipEntry {
        if !self.names.insert(entry.file_name.clone()) {
            log::warn!("duplicate entry name '{}'", entry.file_name);
        }
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Compress `data` into a new entry described by `entry`.
    pub async fn add_entry(&mut self, mut entry: ZipEntry, data: &[u8]) -> Result<&ZipEntry> {
        let payload = compress(&self.codec, &mut entry, data, &self.options).await?;
        entry.lfh_offset = self.offset;
        let header = entry.encode_local_header()?;
        self.write_raw(&header).await?;
        self.write_raw(&payload).await?;
        Ok(self.push(entry))
    }

    /// Add a regular file from memory.
    pub async fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<&ZipEntry> {
        self.add_entry(ZipEntry::new(name), data).await
    }

    /// Add a regular file from a reader with bounded memory.
    ///
    /// The entry gets a trailing data descriptor. With zstd the codec needs
    /// the whole input, so it is read into memory and added like
    /// [`add_entry`](Self::add_entry).
    pub async fn add_stream<Rd>(&mut self, mut entry: ZipEntry, reader: &mut Rd) -> Result<&ZipEntry>
    where
        Rd: AsyncRead + Unpin + ?Sized,
    {
        if self.options.level > 0 && self.options.zstd {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).await?;
            return self.add_entry(entry, &data).await;
        }

        entry.compression_method = if self.options.level == 0 {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        };
        if entry.compression_method == CompressionMethod::Deflate {
            entry.flags.set_deflate_level(self.options.level);
        }
        entry
            .flags
            .set(GeneralPurposeFlags::DATA_DESCRIPTOR, true);
        entry
            .flags
            .set(GeneralPurposeFlags::ENCRYPTED, self.options.password.is_some());
        entry.lfh_offset = self.offset;

        let header = entry.encode_local_header()?;
        self.write_raw(&header).await?;
        let written =
            compress_stream(&self.codec, &mut entry, reader, &mut self.sink, &self.options).await?;
        self.offset += written;

        let mut descriptor = Vec::with_capacity(DataDescriptor::SIZE);
        DataDescriptor {
            crc32: entry.crc32.unwrap_or(0),
            compressed_size: entry.compressed_size as u32,
            uncompressed_size: entry.uncompressed_size as u32,
        }
        .write_to(&mut descriptor)?;
        self.write_raw(&descriptor).await?;
        Ok(self.push(entry))
    }

    /// Entry with no payload (directories, hardlinks).
    async fn add_empty(&mut self, mut entry: ZipEntry) -> Result<&ZipEntry> {
        entry.compression_method = CompressionMethod::Stored;
        entry.crc32 = Some(0);
        entry.compressed_size = 0;
        entry.uncompressed_size = 0;
        entry.lfh_offset = self.offset;
        let header = entry.encode_local_header()?;
        self.write_raw(&header).await?;
        Ok(self.push(entry))
    }

    pub async fn add_directory(&mut self, name: &str) -> Result<&ZipEntry> {
        self.add_empty(ZipEntry::directory(name)).await
    }

    /// Add a symbolic link; the target path is also the entry's content.
    pub async fn add_symlink(&mut self, name: &str, target: &str) -> Result<&ZipEntry> {
        self.add_entry(ZipEntry::symlink(name, target), target.as_bytes())
            .await
    }

    /// Add a hardlink to an entry that is already in the archive.
    pub async fn add_hardlink(&mut self, name: &str, source: &str, inode: u64) -> Result<&ZipEntry> {
        if !self.names.contains(source) {
            return Err(Error::EntryNotFound(source.to_string()));
        }
        self.add_empty(ZipEntry::hardlink(name, source, inode)).await
    }

    /// Add a file, directory or symlink from the filesystem under `name`.
    ///
    /// Mode, mtime and owner are taken from the file's metadata. A file
    /// with several links whose inode was already added becomes a hardlink
    /// entry pointing at the first name.
    pub async fn add_path(&mut self, path: &Path, name: &str) -> Result<&ZipEntry> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        let file_type = metadata.file_type();

        let mut entry = if file_type.is_dir() {
            ZipEntry::directory(name)
        } else if file_type.is_symlink() {
            let target = tokio::fs::read_link(path).await?;
            ZipEntry::symlink(name, &target.to_string_lossy())
        } else {
            ZipEntry::new(name)
        };
        if let Ok(modified) = metadata.modified() {
            entry = entry.with_modified(modified);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            entry = entry
                .with_mode(metadata.mode())
                .with_owner(metadata.uid(), metadata.gid());

            if file_type.is_file() && metadata.nlink() > 1 {
                let key = (metadata.dev(), metadata.ino());
                if let Some(source) = self.inodes.get(&key).cloned() {
                    let mut link = ZipEntry::hardlink(name, &source, metadata.ino());
                    link.modified = entry.modified;
                    link.unix_mtime = entry.unix_mtime;
                    link.owner = entry.owner;
                    return self.add_empty(link).await;
                }
                self.inodes.insert(key, entry.file_name.clone());
            }
        }

        if file_type.is_dir() {
            self.add_empty(entry).await
        } else if file_type.is_symlink() {
            let target = entry.symlink_target.clone().unwrap_or_default();
            self.add_entry(entry, target.as_bytes()).await
        } else {
            let mut file = tokio::fs::File::open(path).await?;
            self.add_stream(entry, &mut file).await
        }
    }

    /// Copy entries from another archive without recompressing them.
    ///
    /// Returns the number of entries copied.
    pub async fn copy_from<R: ReadAt>(
        &mut self,
        source: &ZipArchive<R>,
        filter: Option<&dyn Fn(&ZipEntry) -> bool>,
        sort: bool,
    ) -> Result<usize> {
        let parser = source.parser()?;
        let mut buf = vec![0u8; self.options.buffer_size];
        let mut count = 0;

        for entry in select_entries(source.entries()?, filter, sort) {
            let span = entry_span(parser, entry).await?;
            let mut clone = entry.clone();
            clone.lfh_offset = self.offset;

            let mut copied = 0u64;
            while copied < span.len {
                let len = (span.len - copied).min(buf.len() as u64) as usize;
                parser
                    .reader()
                    .read_exact_at(span.offset + copied, &mut buf[..len])
                    .await?;
                self.sink.write_all(&buf[..len]).await?;
                copied += len as u64;
            }
            self.offset += span.len;
            self.push(clone);
            count += 1;
        }

        log::debug!("copied {count} entries without recompression");
        Ok(count)
    }

    /// Write the central directory and end records and flush the sink.
    pub async fn finish(mut self) -> Result<(W, WriteSummary)> {
        let cd_offset = self.offset;
        let mut central = Vec::new();
        for entry in &self.entries {
            central.extend_from_slice(&entry.encode_central_record()?);
        }
        let cd_size = central.len() as u64;
        self.write_raw(&central).await?;

        let total = self.entries.len() as u64;
        let zip64 = total >= ZIP64_SENTINEL_U16 as u64
            || cd_offset >= ZIP64_SENTINEL_U32 as u64
            || cd_size >= ZIP64_SENTINEL_U32 as u64;

        let mut tail = Vec::new();
        if zip64 {
            let eocd64_offset = self.offset;
            Zip64EOCD::new(total, cd_size, cd_offset).write_to(&mut tail)?;
            Zip64EOCDLocator::new(eocd64_offset).write_to(&mut tail)?;
            log::debug!("writing ZIP64 end records at {eocd64_offset:#x}");
        }
        EndOfCentralDirectory::new(total, cd_size, cd_offset, self.options.comment.len() as u16)
            .write_to(&mut tail)?;
        tail.extend_from_slice(self.options.comment.as_bytes());
        self.write_raw(&tail).await?;
        self.sink.flush().await?;

        let merkle_root = content_leaves(&self.entries, RESERVED_METADATA_NAMES)
            .ok()
            .and_then(|leaves| leaves.tree(MerkleOptions::default()).root());

        let summary = WriteSummary {
            entries: self.entries.len(),
            bytes_written: self.offset,
            zip64,
            merkle_root,
        };
        log::debug!(
            "archive finished: {} entries, {} bytes",
            summary.entries,
            summary.bytes_written
        );
        Ok((self.sink, summary))
    }
}
