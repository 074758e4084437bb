#![allow(dead_code)]

use std::sync::Arc;

use sealzip::{CodecQueue, ExtractOptions, MemoryReader, WriteOptions, ZipExtractor, ZipWriter};

pub const TEXT_FILES: [(&str, &str); 4] = [
    (
        "notes/readme.txt",
        "sealzip keeps a SHA-256 digest for every entry it writes.\n",
    ),
    (
        "notes/lorem.txt",
        "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Lorem ipsum dolor sit amet, \
         consectetur adipiscing elit. Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n",
    ),
    (
        "data/numbers.csv",
        "id,value\n1,100\n2,200\n3,300\n4,400\n5,500\n6,600\n7,700\n8,800\n9,900\n10,1000\n",
    ),
    (
        "changelog.md",
        "# Changes\n\n- added zstd\n- added zstd streaming\n- added merkle roots\n- added merkle proofs\n",
    ),
];

/// Write `files` into a fresh in-memory archive.
pub async fn build_archive(files: &[(&str, &[u8])], options: WriteOptions) -> Vec<u8> {
    let mut writer = ZipWriter::new(Vec::new(), CodecQueue::shared(), options).unwrap();
    for (name, data) in files {
        writer.add_bytes(name, data).await.unwrap();
    }
    writer.finish().await.unwrap().0
}

pub async fn text_archive(options: WriteOptions) -> Vec<u8> {
    let files: Vec<(&str, &[u8])> = TEXT_FILES
        .iter()
        .map(|(name, text)| (*name, text.as_bytes()))
        .collect();
    build_archive(&files, options).await
}

pub async fn open(bytes: Vec<u8>, options: ExtractOptions) -> sealzip::Result<ZipExtractor<MemoryReader>> {
    ZipExtractor::new(Arc::new(MemoryReader::new(bytes)), CodecQueue::shared(), options).await
}
