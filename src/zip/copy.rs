//! Raw entry copy engine.
//!
//! Moves entries between archives as opaque byte ranges (local header,
//! compressed payload, optional data descriptor) without decompressing.
//! Copying and finalizing are separate steps so more entries can be
//! appended in between.

use byteorder::{ByteOrder, LittleEndian};

use crate::io::ReadAt;
use crate::{Error, Result};

use super::archive::ZipArchive;
use super::entry::ZipEntry;
use super::parser::ZipParser;
use super::structures::*;

/// Location of one entry's complete local record in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySpan {
    pub offset: u64,
    /// Local header, name and extra, as actually stored.
    pub header_len: u64,
    /// Header + payload + data descriptor.
    pub len: u64,
}

/// Output of [`copy_entries`].
#[derive(Debug, Clone, Default)]
pub struct CopiedEntries {
    /// Concatenated local records, ready to be written at `base_offset`.
    pub payload: Vec<u8>,
    /// Source entries with `lfh_offset` rebased; nothing else changes.
    pub entries: Vec<ZipEntry>,
}

/// Measure an entry's local record, re-reading the real header lengths.
///
/// Fails with `TruncatedSource` if the record reaches past the end of the
/// source and with `BadDataDescriptorSignature` if the trailing 16 bytes
/// are not a signed data descriptor.
pub async fn entry_span<R: ReadAt>(parser: &ZipParser<R>, entry: &ZipEntry) -> Result<EntrySpan> {
    let size = parser.size();
    let truncated = |needed: u64| Error::TruncatedSource {
        name: entry.file_name.clone(),
        offset: entry.lfh_offset,
        needed,
        available: size.saturating_sub(entry.lfh_offset),
    };

    let header_end = entry.lfh_offset.checked_add(LFH_SIZE as u64);
    if header_end.is_none_or(|end| end > size) {
        return Err(truncated(LFH_SIZE as u64));
    }
    let header_len = parser.local_header_len(entry).await?;
    let descriptor_len = if entry.has_data_descriptor() {
        DataDescriptor::SIZE as u64
    } else {
        0
    };
    // sizes come from the directory and may be anything a ZIP64 extra holds
    let payload_end = header_len.checked_add(entry.compressed_size);
    let len = payload_end
        .and_then(|end| end.checked_add(descriptor_len))
        .ok_or_else(|| truncated(u64::MAX))?;
    let record_end = entry.lfh_offset.checked_add(len);
    if record_end.is_none_or(|end| end > size) {
        return Err(truncated(len));
    }

    if descriptor_len > 0 {
        let at = entry.lfh_offset + header_len + entry.compressed_size;
        let mut signature = [0u8; 4];
        parser.reader().read_exact_at(at, &mut signature).await?;
        if signature != DataDescriptor::SIGNATURE {
            return Err(Error::BadDataDescriptorSignature {
                name: entry.file_name.clone(),
                offset: at,
                actual: LittleEndian::read_u32(&signature),
            });
        }
    }

    Ok(EntrySpan {
        offset: entry.lfh_offset,
        header_len,
        len,
    })
}

/// Entries chosen by `filter`, optionally sorted by name.
pub fn select_entries<'a>(
    entries: &'a [ZipEntry],
    filter: Option<&dyn Fn(&ZipEntry) -> bool>,
    sort: bool,
) -> Vec<&'a ZipEntry> {
    let mut selected: Vec<_> = entries
        .iter()
        .filter(|e| filter.is_none_or(|f| f(e)))
        .collect();
    if sort {
        selected.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    }
    selected
}

/// Copy the selected entries of `source` into one contiguous buffer.
///
/// `base_offset` is where the buffer will start in the destination; each
/// cloned entry's `lfh_offset` is set to its position from there.
pub async fn copy_entries<R: ReadAt>(
    source: &ZipArchive<R>,
    base_offset: u64,
    filter: Option<&dyn Fn(&ZipEntry) -> bool>,
    sort: bool,
) -> Result<CopiedEntries> {
    let parser = source.parser()?;
    let mut copied = CopiedEntries::default();

    for entry in select_entries(source.entries()?, filter, sort) {
        let span = entry_span(parser, entry).await?;
        let start = copied.payload.len();
        copied.payload.resize(start + span.len as usize, 0);
        parser
            .reader()
            .read_exact_at(span.offset, &mut copied.payload[start..])
            .await?;

        let mut clone = entry.clone();
        clone.lfh_offset = base_offset + start as u64;
        copied.entries.push(clone);
    }

    log::debug!(
        "copied {} entries ({} bytes)",
        copied.entries.len(),
        copied.payload.len()
    );
    Ok(copied)
}

/// Central directory and 32-bit end record for `entries`, to be written
/// at `cd_offset`.
pub fn finalize(entries: &[ZipEntry], cd_offset: u64, comment: &str) -> Result<Vec<u8>> {
    let comment_len = u16::try_from(comment.len()).map_err(|_| {
        Error::InvalidOption(format!(
            "archive comment of {} bytes exceeds 65535",
            comment.len()
        ))
    })?;

    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(&entry.encode_central_record()?);
    }
    let cd_size = out.len() as u64;

    if entries.len() >= ZIP64_SENTINEL_U16 as usize
        || cd_offset >= ZIP64_SENTINEL_U32 as u64
        || cd_size >= ZIP64_SENTINEL_U32 as u64
    {
        return Err(Error::Unsupported(
            "copied archive needs ZIP64 end records".into(),
        ));
    }

    EndOfCentralDirectory::new(entries.len() as u64, cd_size, cd_offset, comment_len)
        .write_to(&mut out)?;
    out.extend_from_slice(comment.as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecQueue;
    use crate::options::WriteOptions;
    use crate::zip::ZipWriter;

    async fn source(options: WriteOptions) -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new(), CodecQueue::shared(), options).unwrap();
        writer.add_bytes("b.txt", b"bravo bravo bravo").await.unwrap();
        writer.add_bytes("a.txt", b"alpha").await.unwrap();
        writer
            .add_stream(ZipEntry::new("c.txt"), &mut &b"charlie streamed"[..])
            .await
            .unwrap();
        writer.finish().await.unwrap().0
    }

    #[tokio::test]
    async fn copies_spans_and_rebases_offsets() {
        let bytes = source(WriteOptions::new()).await;
        let archive = ZipArchive::from_bytes(bytes).await.unwrap();

        let copied = copy_entries(&archive, 0, None, true).await.unwrap();
        let names: Vec<_> = copied.entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
        assert_eq!(copied.entries[0].lfh_offset, 0);

        let mut dest = copied.payload.clone();
        let cd_offset = dest.len() as u64;
        dest.extend_from_slice(&finalize(&copied.entries, cd_offset, "").unwrap());

        let rebuilt = ZipArchive::from_bytes(dest).await.unwrap();
        for entry in rebuilt.entries().unwrap() {
            let original = archive.find(&entry.file_name).unwrap();
            let mut expected = original.clone();
            expected.lfh_offset = entry.lfh_offset;
            assert_eq!(entry, &expected);
        }
    }

    #[tokio::test]
    async fn filter_and_two_phase_append() {
        let bytes = source(WriteOptions::new()).await;
        let archive = ZipArchive::from_bytes(bytes).await.unwrap();

        let only_b = |e: &ZipEntry| e.file_name.starts_with('b');
        let prefix = b"PREFIX".to_vec();
        let copied = copy_entries(&archive, prefix.len() as u64, Some(&only_b), false)
            .await
            .unwrap();
        assert_eq!(copied.entries.len(), 1);
        assert_eq!(copied.entries[0].lfh_offset, 6);

        // append a freshly compressed entry before finalizing
        let mut out = prefix;
        out.extend_from_slice(&copied.payload);
        let mut entries = copied.entries;
        let codec = CodecQueue::new();
        let mut extra = ZipEntry::new("new.txt");
        let payload =
            crate::zip::compress::compress(&codec, &mut extra, b"fresh", &WriteOptions::new())
                .await
                .unwrap();
        extra.lfh_offset = out.len() as u64;
        out.extend_from_slice(&extra.encode_local_header().unwrap());
        out.extend_from_slice(&payload);
        entries.push(extra);

        let cd_offset = out.len() as u64;
        out.extend_from_slice(&finalize(&entries, cd_offset, "two phase").unwrap());

        let rebuilt = ZipArchive::from_bytes(out).await.unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.comment().unwrap(), "two phase");
    }

    #[tokio::test]
    async fn truncated_source_is_reported() {
        let bytes = source(WriteOptions::new()).await;
        let archive = ZipArchive::from_bytes(bytes).await.unwrap();
        let mut entry = archive.find("a.txt").unwrap().clone();
        entry.compressed_size = 1 << 40;
        let err = entry_span(archive.parser().unwrap(), &entry)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TruncatedSource { .. }));
    }

    #[tokio::test]
    async fn bad_descriptor_signature_is_reported() {
        let mut bytes = source(WriteOptions::new()).await;
        let archive = ZipArchive::from_bytes(bytes.clone()).await.unwrap();
        let streamed = archive.find("c.txt").unwrap().clone();
        assert!(streamed.has_data_descriptor());

        let span = entry_span(archive.parser().unwrap(), &streamed).await.unwrap();
        let at = (span.offset + span.len) as usize - DataDescriptor::SIZE;
        bytes[at] = b'X';

        let archive = ZipArchive::from_bytes(bytes).await.unwrap();
        let err = copy_entries(&archive, 0, None, false).await.unwrap_err();
        match err {
            Error::BadDataDescriptorSignature { name, offset, .. } => {
                assert_eq!(name, "c.txt");
                assert_eq!(offset, at as u64);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
