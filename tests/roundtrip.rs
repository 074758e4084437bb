mod common;

use std::sync::Arc;

use sealzip::hash::{crc32, sha256_hex};
use sealzip::{
    CodecQueue, CompressionMethod, EntryKind, ExtractOptions, LocalFileReader, RESERVED_METADATA_NAMES,
    ReadAt, WriteOptions, ZipArchive, ZipEntry, ZipExtractor, ZipWriter,
};

use common::{TEXT_FILES, open, text_archive};

#[tokio::test]
async fn four_text_files_with_deflate_level_6() {
    let bytes = text_archive(WriteOptions::new().level(6).unwrap()).await;
    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    let entries = extractor.list_files().unwrap();

    assert_eq!(entries.len(), 4);
    let mut compressed = 0;
    let mut uncompressed = 0;
    for (entry, (name, text)) in entries.iter().zip(TEXT_FILES) {
        assert_eq!(entry.file_name, name);
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert_eq!(entry.crc32, Some(crc32(text.as_bytes())));
        assert_eq!(entry.uncompressed_size, text.len() as u64);
        compressed += entry.compressed_size;
        uncompressed += entry.uncompressed_size;

        let data = extractor.extract_to_memory(entry).await.unwrap();
        assert_eq!(data, text.as_bytes());
        assert_eq!(Some(crc32(&data)), entry.crc32);
    }
    assert!(compressed < uncompressed);
}

#[tokio::test]
async fn every_method_round_trips() {
    let big: Vec<u8> = (0..50_000u32).map(|i| (i % 7) as u8 + b'a').collect();
    for (options, method) in [
        (WriteOptions::new().level(0).unwrap(), CompressionMethod::Stored),
        (WriteOptions::new().level(9).unwrap(), CompressionMethod::Deflate),
        (WriteOptions::new().zstd(true), CompressionMethod::Zstd),
    ] {
        let bytes = common::build_archive(&[("big.bin", big.as_slice()), ("empty", &b""[..])], options).await;
        let extractor = open(bytes, ExtractOptions::new()).await.unwrap();

        let entry = extractor.find("big.bin").unwrap();
        assert_eq!(entry.compression_method, method);
        assert_eq!(entry.sha256.as_deref(), Some(sha256_hex(&big).as_str()));
        assert_eq!(extractor.extract_to_memory(entry).await.unwrap(), big);

        let mut sink = Vec::new();
        let n = extractor.extract_to_writer(entry, &mut sink).await.unwrap();
        assert_eq!(n, big.len() as u64);
        assert_eq!(sink, big);

        let empty = extractor.find("empty").unwrap();
        assert!(extractor.extract_to_memory(empty).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn streaming_write_and_read_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("streamed.zip");
    let data: Vec<u8> = (0..2_000_000u32).map(|i| (i * 31 % 253) as u8).collect();

    let file = tokio::fs::File::create(&path).await.unwrap();
    let options = WriteOptions::new().buffer_size(64 * 1024).comment("streamed");
    let mut writer = ZipWriter::new(file, CodecQueue::shared(), options).unwrap();
    writer
        .add_stream(ZipEntry::new("payload.bin"), &mut &data[..])
        .await
        .unwrap();
    writer.add_bytes("small.txt", b"small").await.unwrap();
    let (_, summary) = writer.finish().await.unwrap();
    assert_eq!(summary.entries, 2);

    let reader = Arc::new(LocalFileReader::new(&path).unwrap());
    assert_eq!(reader.size(), summary.bytes_written);
    let extractor = ZipExtractor::new(
        reader.clone(),
        CodecQueue::shared(),
        ExtractOptions::new().buffer_size(10_000),
    )
    .await
    .unwrap();
    assert_eq!(extractor.archive().comment().unwrap(), "streamed");

    let entry = extractor.find("payload.bin").unwrap();
    assert!(entry.has_data_descriptor());
    let out = dir.path().join("out.bin");
    extractor.extract_to_file(entry, &out).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
    assert_eq!(extractor.test_entry(entry).await.unwrap(), data.len() as u64);

    reader.close().await.unwrap();
}

#[tokio::test]
async fn buffered_and_streaming_loads_agree() {
    let bytes = text_archive(WriteOptions::new().zstd(true)).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    std::fs::write(&path, &bytes).unwrap();

    let buffered = ZipArchive::from_bytes(bytes).await.unwrap();
    let streamed = ZipArchive::open_with_buffer_size(&path, 64).await.unwrap();
    assert_eq!(buffered.entries().unwrap(), streamed.entries().unwrap());
    assert_eq!(
        buffered.merkle_root(RESERVED_METADATA_NAMES).unwrap(),
        streamed.merkle_root(RESERVED_METADATA_NAMES).unwrap()
    );
}

#[tokio::test]
async fn merkle_root_ignores_order_and_reserved_members() {
    let forward = text_archive(WriteOptions::new()).await;

    let mut reversed: Vec<(&str, &[u8])> = TEXT_FILES
        .iter()
        .rev()
        .map(|(name, text)| (*name, text.as_bytes()))
        .collect();
    reversed.push(("META-INF/TOKEN.json", &b"{\"token\":1}"[..]));
    let reversed = common::build_archive(&reversed, WriteOptions::new().level(0).unwrap()).await;

    let a = ZipArchive::from_bytes(forward).await.unwrap();
    let b = ZipArchive::from_bytes(reversed).await.unwrap();
    let root = a.merkle_root(RESERVED_METADATA_NAMES).unwrap();
    assert!(root.is_some());
    assert_eq!(root, b.merkle_root(RESERVED_METADATA_NAMES).unwrap());
    assert_ne!(root, b.merkle_root(&[]).unwrap());
    assert_eq!(
        a.xor_fingerprint(RESERVED_METADATA_NAMES).unwrap(),
        b.xor_fingerprint(RESERVED_METADATA_NAMES).unwrap()
    );
}

#[tokio::test]
async fn entry_metadata_survives() {
    let mut writer =
        ZipWriter::new(Vec::new(), CodecQueue::shared(), WriteOptions::new()).unwrap();
    let entry = ZipEntry::new("bin/run.sh")
        .with_mode(0o755)
        .with_owner(1000, 100)
        .with_comment("entry comment");
    writer.add_entry(entry, b"#!/bin/sh\necho hi\n").await.unwrap();
    writer.add_bytes("caf\u{e9} \"menu\".txt", b"unicode name").await.unwrap();
    let (bytes, _) = writer.finish().await.unwrap();

    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    let run = extractor.find("bin/run.sh").unwrap();
    assert_eq!(run.unix_mode().map(|m| m & 0o7777), Some(0o755));
    assert_eq!(run.owner.map(|o| (o.uid, o.gid)), Some((1000, 100)));
    assert_eq!(run.comment, "entry comment");
    assert!(run.unix_mtime.is_some());
    assert_eq!(run.kind(), EntryKind::File);

    let cafe = extractor.find("caf\u{e9} \"menu\".txt").unwrap();
    assert!(cafe.raw_name.is_ascii());
    assert_eq!(extractor.extract_to_memory(cafe).await.unwrap(), b"unicode name");
}

#[cfg(unix)]
#[tokio::test]
async fn extract_all_recreates_links_and_modes() {
    let mut writer =
        ZipWriter::new(Vec::new(), CodecQueue::shared(), WriteOptions::new()).unwrap();
    writer.add_directory("tree").await.unwrap();
    writer
        .add_entry(ZipEntry::new("tree/tool").with_mode(0o750), b"binary")
        .await
        .unwrap();
    writer.add_symlink("tree/tool-link", "tool").await.unwrap();
    writer.add_hardlink("tree/tool-hard", "tree/tool", 7).await.unwrap();
    let (bytes, _) = writer.finish().await.unwrap();

    let dest = tempfile::tempdir().unwrap();
    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    assert_eq!(extractor.extract_all(dest.path()).await.unwrap(), 4);

    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    let tool = dest.path().join("tree/tool");
    assert_eq!(std::fs::read(&tool).unwrap(), b"binary");
    let meta = std::fs::metadata(&tool).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o750);
    assert_eq!(meta.nlink(), 2);

    let link = std::fs::read_link(dest.path().join("tree/tool-link")).unwrap();
    assert_eq!(link, std::path::Path::new("tool"));
    assert_eq!(
        std::fs::read(dest.path().join("tree/tool-hard")).unwrap(),
        b"binary"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn extraction_never_writes_through_symlinks() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tmp.path().join("outside");
    std::fs::create_dir_all(&outside).unwrap();

    let mut writer =
        ZipWriter::new(Vec::new(), CodecQueue::shared(), WriteOptions::new()).unwrap();
    writer
        .add_symlink("evil", outside.to_str().unwrap())
        .await
        .unwrap();
    writer.add_bytes("evil/pwned.txt", b"escaped").await.unwrap();
    let (bytes, _) = writer.finish().await.unwrap();

    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    let dest = tmp.path().join("dest");
    assert!(extractor.extract_all(&dest).await.is_err());
    assert!(!outside.join("pwned.txt").exists());

    // a link already sitting in the destination is not followed either
    let bytes = common::build_archive(&[("evil/pwned.txt", &b"escaped"[..])], WriteOptions::new()).await;
    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    let dest = tmp.path().join("prepared");
    std::fs::create_dir_all(&dest).unwrap();
    std::os::unix::fs::symlink(&outside, dest.join("evil")).unwrap();
    assert!(extractor.extract_all(&dest).await.is_err());
    assert!(!outside.join("pwned.txt").exists());
}

#[tokio::test]
async fn failed_extraction_keeps_existing_file() {
    let bytes = common::build_archive(
        &[("victim.txt", &b"new content that will not verify"[..])],
        WriteOptions::new().level(0).unwrap(),
    )
    .await;
    let extractor = open(bytes, ExtractOptions::new()).await.unwrap();
    let mut entry = extractor.find("victim.txt").unwrap().clone();
    entry.crc32 = entry.crc32.map(|c| c ^ 1);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("victim.txt");
    std::fs::write(&target, b"precious").unwrap();

    let err = extractor.extract_to_file(&entry, &target).await.unwrap_err();
    assert!(err.is_integrity());
    assert_eq!(std::fs::read(&target).unwrap(), b"precious");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
