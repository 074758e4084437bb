use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::codec::CodecQueue;
use crate::io::ReadAt;
use crate::options::ExtractOptions;
use crate::{Error, Result};

use super::archive::ZipArchive;
use super::decompress::{decompress, decompress_stream};
use super::entry::{EntryKind, ZipEntry};

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    archive: ZipArchive<R>,
    codec: Arc<CodecQueue>,
    options: ExtractOptions,
}

impl<R: ReadAt> ZipExtractor<R> {
    /// Load the archive behind `reader` and prepare to extract from it.
    pub async fn new(reader: Arc<R>, codec: Arc<CodecQueue>, options: ExtractOptions) -> Result<Self> {
        let mut archive = ZipArchive::new().with_buffer_size(options.buffer_size);
        archive.load(reader).await?;
        Ok(Self::from_archive(archive, codec, options))
    }

    pub fn from_archive(archive: ZipArchive<R>, codec: Arc<CodecQueue>, options: ExtractOptions) -> Self {
        Self {
            archive,
            codec,
            options,
        }
    }

    pub fn archive(&self) -> &ZipArchive<R> {
        &self.archive
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// List all entries in the archive
    pub fn list_files(&self) -> Result<&[ZipEntry]> {
        self.archive.entries()
    }

    pub fn find(&self, name: &str) -> Result<&ZipEntry> {
        self.archive.find(name)
    }

    /// Offset of the payload, after checking it lies inside the source.
    async fn data_offset(&self, entry: &ZipEntry) -> Result<u64> {
        let parser = self.archive.parser()?;
        let offset = parser.data_offset(entry).await?;
        let available = parser.size().saturating_sub(offset);
        if entry.compressed_size > available {
            return Err(Error::TruncatedSource {
                name: entry.file_name.clone(),
                offset,
                needed: entry.compressed_size,
                available,
            });
        }
        Ok(offset)
    }

    /// Hardlinks carry no payload; their content is the source entry's.
    fn content_entry<'a>(&'a self, entry: &'a ZipEntry) -> Result<&'a ZipEntry> {
        match &entry.hardlink {
            Some(link) => {
                let source = self.archive.find(&link.source)?;
                if source.hardlink.is_some() {
                    return Err(Error::Unsupported(format!(
                        "hardlink '{}' points at another hardlink '{}'",
                        entry.file_name, link.source
                    )));
                }
                Ok(source)
            }
            None => Ok(entry),
        }
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let entry = self.content_entry(entry)?;
        if entry.is_directory() {
            return Ok(Vec::new());
        }
        let offset = self.data_offset(entry).await?;
        let mut payload = vec![0u8; entry.compressed_size as usize];
        self.archive
            .reader()?
            .read_exact_at(offset, &mut payload)
            .await?;
        decompress(&self.codec, entry, &payload, &self.options).await
    }

    /// Stream the entry's content into `sink` with bounded memory.
    ///
    /// Returns the number of bytes written.
    pub async fn extract_to_writer<W: AsyncWrite + Unpin>(
        &self,
        entry: &ZipEntry,
        sink: &mut W,
    ) -> Result<u64> {
        let entry = self.content_entry(entry)?;
        if entry.is_directory() {
            return Ok(0);
        }
        let offset = self.data_offset(entry).await?;
        let reader = self.archive.reader()?;
        decompress_stream(
            &self.codec,
            reader.as_ref(),
            offset,
            entry,
            sink,
            &self.options,
        )
        .await
    }

    /// Decompress and verify without keeping the output.
    pub async fn test_entry(&self, entry: &ZipEntry) -> Result<u64> {
        self.extract_to_writer(entry, &mut tokio::io::sink()).await
    }

    /// Extract file to stdout
    pub async fn extract_to_stdout(&self, entry: &ZipEntry) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        self.extract_to_writer(entry, &mut stdout).await?;
        stdout.flush().await?;
        Ok(())
    }

    /// Extract one entry to `output_path`.
    ///
    /// Regular files go to a temporary file next to the destination and
    /// are renamed over it only after verification succeeds. Symlinks are
    /// recreated; hardlinks are written as a copy of their source entry.
    pub async fn extract_to_file(&self, entry: &ZipEntry, output_path: &Path) -> Result<()> {
        if entry.is_directory() {
            fs::create_dir_all(output_path).await?;
            return Ok(());
        }

        let parent = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await?;

        if entry.kind() == EntryKind::Symlink {
            return self.create_symlink(entry, output_path).await;
        }

        let content = self.content_entry(entry)?;
        let temp = tempfile::Builder::new()
            .prefix(".sealzip-")
            .tempfile_in(&parent)?;
        let file = fs::File::from_std(temp.as_file().try_clone()?);
        let mut writer = BufWriter::with_capacity(self.options.buffer_size, file);
        self.extract_to_writer(content, &mut writer).await?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        restore_metadata(content, temp.as_file());
        temp.persist(output_path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    async fn create_symlink(&self, entry: &ZipEntry, output_path: &Path) -> Result<()> {
        let target = match &entry.symlink_target {
            Some(target) => target.clone(),
            None => String::from_utf8_lossy(&self.extract_to_memory(entry).await?).into_owned(),
        };

        if fs::symlink_metadata(output_path).await.is_ok() {
            fs::remove_file(output_path).await?;
        }

        #[cfg(unix)]
        {
            fs::symlink(&target, output_path).await?;
        }

        #[cfg(not(unix))]
        {
            log::warn!(
                "symlinks unsupported here, writing '{}' as a plain file",
                entry.file_name
            );
            fs::write(output_path, target.as_bytes()).await?;
        }

        Ok(())
    }

    /// Extract every entry under `dest`, in directory order.
    ///
    /// Symlinks and hardlinks are created after all regular files;
    /// hardlinks become real links where the filesystem allows and copies
    /// otherwise. No entry is written through a symlink below `dest`.
    /// Returns the number of entries written.
    pub async fn extract_all(&self, dest: &Path) -> Result<usize> {
        fs::create_dir_all(dest).await?;
        let mut written: HashMap<&str, PathBuf> = HashMap::new();
        let mut symlinks = Vec::new();
        let mut links = Vec::new();
        let mut count = 0;

        for entry in self.archive.entries()? {
            let path = safe_join(dest, &entry.file_name)?;
            if entry.hardlink.is_some() {
                links.push((entry, path));
                continue;
            }
            if entry.kind() == EntryKind::Symlink {
                symlinks.push((entry, path));
                continue;
            }
            ensure_no_symlink_parents(dest, &path).await?;
            self.extract_to_file(entry, &path).await?;
            written.insert(&entry.file_name, path);
            count += 1;
        }

        for (entry, path) in links {
            ensure_no_symlink_parents(dest, &path).await?;
            let source = entry
                .hardlink
                .as_ref()
                .and_then(|link| written.get(link.source.as_str()));
            let linked = match source {
                Some(source) => {
                    if fs::symlink_metadata(&path).await.is_ok() {
                        fs::remove_file(&path).await?;
                    }
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    match fs::hard_link(source, &path).await {
                        Ok(()) => true,
                        Err(e) => {
                            log::debug!("hard link '{}' failed ({e}), copying", entry.file_name);
                            false
                        }
                    }
                }
                None => false,
            };
            if !linked {
                self.extract_to_file(entry, &path).await?;
            }
            count += 1;
        }

        for (entry, path) in symlinks {
            ensure_no_symlink_parents(dest, &path).await?;
            self.extract_to_file(entry, &path).await?;
            count += 1;
        }

        log::debug!("extracted {count} entries to {}", dest.display());
        Ok(count)
    }
}

/// Fail if any directory between `dest` and `path` is a symlink, so that
/// nothing is written outside `dest` through a link made by an earlier
/// entry or already present on disk.
pub async fn ensure_no_symlink_parents(dest: &Path, path: &Path) -> Result<()> {
    let Ok(relative) = path.strip_prefix(dest) else {
        return Ok(());
    };
    let Some(parent) = relative.parent() else {
        return Ok(());
    };

    let mut current = dest.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::Unsupported(format!(
                    "'{}' would be written through symlink '{}'",
                    path.display(),
                    current.display()
                )));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

/// Join an entry name onto `dest`, refusing absolute paths and `..`.
pub fn safe_join(dest: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let mut out = dest.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Unsupported(format!(
                    "entry path '{name}' escapes the destination"
                )));
            }
        }
    }
    Ok(out)
}

fn restore_metadata(entry: &ZipEntry, file: &std::fs::File) {
    if let Some(time) = entry.modified_time() {
        if let Err(e) = file.set_modified(time) {
            log::warn!("cannot set mtime of '{}': {e}", entry.file_name);
        }
    }

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode() {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
        if let Err(e) = file.set_permissions(permissions) {
            log::warn!("cannot restore mode of '{}': {e}", entry.file_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_escapes() {
        let dest = Path::new("/tmp/out");
        assert_eq!(
            safe_join(dest, "a/./b.txt").unwrap(),
            PathBuf::from("/tmp/out/a/b.txt")
        );
        assert!(safe_join(dest, "../evil").is_err());
        assert!(safe_join(dest, "/etc/passwd").is_err());
        assert!(safe_join(dest, "a/../../b").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_parent_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dest");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(dest.join("plain")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("link")).unwrap();

        ensure_no_symlink_parents(&dest, &dest.join("plain/a.txt"))
            .await
            .unwrap();
        ensure_no_symlink_parents(&dest, &dest.join("missing/deeper/a.txt"))
            .await
            .unwrap();
        // the final component may itself be a link; it is replaced, not followed
        ensure_no_symlink_parents(&dest, &dest.join("link"))
            .await
            .unwrap();
        assert!(
            ensure_no_symlink_parents(&dest, &dest.join("link/a.txt"))
                .await
                .is_err()
        );
    }
}
