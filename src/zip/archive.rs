//! Loaded archive: the authoritative entry list and central directory facts.

use std::path::Path;
use std::sync::Arc;

use crate::hash::{Hash, HashAccumulator, MerkleOptions, MerkleTree};
use crate::io::{LocalFileReader, MemoryReader, ReadAt};
use crate::options::DEFAULT_BUFFER_SIZE;
use crate::{Error, Result};

use super::entry::{EntryKind, ZipEntry};
use super::parser::{CentralDirectory, ZipParser};

/// Member names left out of the Merkle root so that storing a proof in
/// the archive does not change the root it proves.
pub const RESERVED_METADATA_NAMES: &[&str] = &["META-INF/TIMESTAMP.tsr", "META-INF/TOKEN.json"];

/// SHA-256 leaves of every file entry not named in `excluded`.
///
/// Directories, symlinks and hardlinks carry no content of their own and
/// contribute no leaf. A file entry without a digest is `MissingDigest`.
pub fn content_leaves(entries: &[ZipEntry], excluded: &[&str]) -> Result<HashAccumulator> {
    let mut leaves = HashAccumulator::new();
    for entry in entries {
        if entry.kind() != EntryKind::File || excluded.contains(&entry.file_name.as_str()) {
            continue;
        }
        let digest = entry.sha256_digest().ok_or_else(|| Error::MissingDigest {
            name: entry.file_name.clone(),
        })?;
        leaves.push(digest);
    }
    Ok(leaves)
}

#[derive(Debug)]
struct Loaded<R: ReadAt> {
    parser: ZipParser<R>,
    directory: CentralDirectory,
    entries: Vec<ZipEntry>,
}

#[derive(Debug)]
enum State<R: ReadAt> {
    Empty,
    Loaded(Loaded<R>),
}

/// An archive container over a [`ReadAt`] source.
///
/// Starts empty; [`load`](Self::load) parses the central directory and
/// [`reset`](Self::reset) returns to the empty state. Loading again
/// discards whatever was loaded before. Entries are kept in central
/// directory order.
#[derive(Debug)]
pub struct ZipArchive<R: ReadAt> {
    state: State<R>,
    buffer_size: usize,
}

impl<R: ReadAt> Default for ZipArchive<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ReadAt> ZipArchive<R> {
    pub fn new() -> Self {
        Self {
            state: State::Empty,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Chunk size for central directory reads on the next `load`.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Parse the source's central directory and return its entries.
    ///
    /// A previously loaded source is closed first, unless it is `reader`.
    pub async fn load(&mut self, reader: Arc<R>) -> Result<&[ZipEntry]> {
        if let State::Loaded(old) = std::mem::replace(&mut self.state, State::Empty) {
            if !Arc::ptr_eq(old.parser.reader(), &reader) {
                old.parser.reader().close().await?;
            }
        }

        let parser = ZipParser::new(reader).with_buffer_size(self.buffer_size);
        let directory = parser.central_directory().await?;
        let entries = parser.read_central_directory(&directory).await?;
        log::debug!("loaded {} entries", entries.len());

        self.state = State::Loaded(Loaded {
            parser,
            directory,
            entries,
        });
        self.entries()
    }

    /// Drop the loaded state and close the source.
    pub async fn reset(&mut self) -> Result<()> {
        if let State::Loaded(loaded) = std::mem::replace(&mut self.state, State::Empty) {
            loaded.parser.reader().close().await?;
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, State::Loaded(_))
    }

    fn loaded(&self) -> Result<&Loaded<R>> {
        match &self.state {
            State::Loaded(loaded) => Ok(loaded),
            State::Empty => Err(Error::NotLoaded),
        }
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> Result<&[ZipEntry]> {
        Ok(&self.loaded()?.entries)
    }

    pub fn len(&self) -> usize {
        self.entries().map(<[_]>::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an entry by its (Unicode) name.
    pub fn find(&self, name: &str) -> Result<&ZipEntry> {
        self.entries()?
            .iter()
            .find(|e| e.file_name == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    pub fn central_directory(&self) -> Result<&CentralDirectory> {
        Ok(&self.loaded()?.directory)
    }

    /// Archive comment from the end record.
    pub fn comment(&self) -> Result<&str> {
        Ok(&self.loaded()?.directory.comment)
    }

    pub fn parser(&self) -> Result<&ZipParser<R>> {
        Ok(&self.loaded()?.parser)
    }

    pub fn reader(&self) -> Result<&Arc<R>> {
        Ok(self.loaded()?.parser.reader())
    }

    /// SHA-256 leaves of the loaded file entries; see [`content_leaves`].
    pub fn content_leaves(&self, excluded: &[&str]) -> Result<HashAccumulator> {
        content_leaves(self.entries()?, excluded)
    }

    /// Merkle tree over the content leaves, canonical options.
    pub fn merkle_tree(&self, excluded: &[&str]) -> Result<MerkleTree> {
        Ok(self
            .content_leaves(excluded)?
            .tree(MerkleOptions::default()))
    }

    /// Merkle root of the loaded directory; `None` when no file entry
    /// contributes a leaf.
    pub fn merkle_root(&self, excluded: &[&str]) -> Result<Option<Hash>> {
        Ok(self.merkle_tree(excluded)?.root())
    }

    /// Order-independent XOR of the content leaves.
    pub fn xor_fingerprint(&self, excluded: &[&str]) -> Result<Hash> {
        Ok(self.content_leaves(excluded)?.xor_fold())
    }
}

impl ZipArchive<MemoryReader> {
    /// Load an archive held entirely in memory.
    pub async fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let mut archive = Self::new();
        archive.load(Arc::new(MemoryReader::new(data))).await?;
        Ok(archive)
    }
}

impl ZipArchive<LocalFileReader> {
    /// Open and load an archive from disk, reading it in chunks.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_buffer_size(path, DEFAULT_BUFFER_SIZE).await
    }

    pub async fn open_with_buffer_size(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        let reader = Arc::new(LocalFileReader::new(path.as_ref())?);
        let mut archive = Self::new().with_buffer_size(buffer_size);
        if let Err(e) = archive.load(Arc::clone(&reader)).await {
            reader.close().await?;
            return Err(e);
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::merkle::hash_pair;
    use crate::hash::sha256_hex;
    use crate::zip::structures::EndOfCentralDirectory;

    fn build(entries: &[ZipEntry]) -> Vec<u8> {
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
        EndOfCentralDirectory::new(entries.len() as u64, central.len() as u64, cd_offset, 0)
            .write_to(&mut out)
            .unwrap();
        out
    }

    fn file(name: &str, content: &[u8]) -> ZipEntry {
        let mut entry = ZipEntry::new(name);
        entry.sha256 = Some(sha256_hex(content));
        entry
    }

    #[tokio::test]
    async fn state_machine() {
        let mut archive: ZipArchive<MemoryReader> = ZipArchive::new();
        assert!(!archive.is_loaded());
        assert!(matches!(archive.entries(), Err(Error::NotLoaded)));

        let bytes = build(&[file("a", b"a")]);
        let entries = archive
            .load(Arc::new(MemoryReader::new(bytes)))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(archive.is_loaded());

        // loading again replaces the previous state
        let bytes = build(&[file("x", b"x"), file("y", b"y")]);
        archive
            .load(Arc::new(MemoryReader::new(bytes)))
            .await
            .unwrap();
        assert_eq!(archive.len(), 2);
        assert!(matches!(archive.find("a"), Err(Error::EntryNotFound(_))));
        assert_eq!(archive.find("y").unwrap().file_name, "y");

        archive.reset().await.unwrap();
        assert!(!archive.is_loaded());
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn reloading_closes_the_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let first_path = dir.path().join("first.zip");
        let second_path = dir.path().join("second.zip");
        std::fs::write(&first_path, build(&[file("a", b"a")])).unwrap();
        std::fs::write(&second_path, build(&[file("b", b"b")])).unwrap();

        let first = Arc::new(LocalFileReader::new(&first_path).unwrap());
        let mut archive = ZipArchive::new();
        archive.load(Arc::clone(&first)).await.unwrap();

        // same handle again: still open
        archive.load(Arc::clone(&first)).await.unwrap();
        assert!(!first.is_closed());

        let second = Arc::new(LocalFileReader::new(&second_path).unwrap());
        archive.load(Arc::clone(&second)).await.unwrap();
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(archive.find("b").unwrap().file_name, "b");

        archive.reset().await.unwrap();
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn failed_load_leaves_archive_empty() {
        let mut archive = ZipArchive::from_bytes(build(&[file("a", b"a")]))
            .await
            .unwrap();
        let err = archive
            .load(Arc::new(MemoryReader::new(vec![1, 2, 3])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        assert!(!archive.is_loaded());
    }

    #[tokio::test]
    async fn merkle_root_skips_reserved_and_non_file_entries() {
        let plain = build(&[file("a", b"a"), file("b", b"b"), ZipEntry::directory("d")]);
        let with_meta = build(&[
            file("b", b"b"),
            file(RESERVED_METADATA_NAMES[0], b"proof"),
            ZipEntry::symlink("l", "a"),
            file("a", b"a"),
        ]);

        let plain = ZipArchive::from_bytes(plain).await.unwrap();
        let with_meta = ZipArchive::from_bytes(with_meta).await.unwrap();
        let root = plain.merkle_root(RESERVED_METADATA_NAMES).unwrap().unwrap();
        assert_eq!(
            root,
            with_meta.merkle_root(RESERVED_METADATA_NAMES).unwrap().unwrap()
        );
        assert_ne!(Some(root), with_meta.merkle_root(&[]).unwrap());

        let a = plain.find("a").unwrap().sha256_digest().unwrap();
        let b = plain.find("b").unwrap().sha256_digest().unwrap();
        assert_eq!(root, hash_pair(&a, &b));
        assert_eq!(
            plain.xor_fingerprint(&[]).unwrap(),
            with_meta.xor_fingerprint(RESERVED_METADATA_NAMES).unwrap()
        );
    }

    #[tokio::test]
    async fn merkle_root_needs_digests() {
        let archive = ZipArchive::from_bytes(build(&[ZipEntry::new("nodigest")]))
            .await
            .unwrap();
        assert!(matches!(
            archive.merkle_root(&[]),
            Err(Error::MissingDigest { .. })
        ));
        let empty = ZipArchive::from_bytes(build(&[])).await.unwrap();
        assert_eq!(empty.merkle_root(&[]).unwrap(), None);
    }
}
