//! Decompression engine.
//!
//! Mirrors [`compress`](super::compress): decrypt, decompress per method,
//! then verify. CRC-32 and the decompressed size are always checked;
//! SHA-256 follows [`DigestCheck`].
//!
//! As on the compression side, inflate runs inline on the calling task and
//! zstd is handed to the [`CodecQueue`].

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateDecoder as DeflateSink;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::cipher::{self, StreamDecryptor};
use crate::codec::CodecQueue;
use crate::hash::EntryHasher;
use crate::io::ReadAt;
use crate::options::{DigestCheck, ExtractOptions};
use crate::{Error, Result};

use super::entry::ZipEntry;
use super::structures::CompressionMethod;

/// Upper bound on the up-front allocation for a decompressed buffer.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Checks plaintext against the values stored on an entry.
pub struct Verifier {
    name: String,
    hasher: EntryHasher,
    expected_crc: u32,
    expected_sha: Option<String>,
    expected_size: u64,
}

impl Verifier {
    /// Fails with `MissingDigest` when `check` is `Require` and the entry
    /// has no SHA-256.
    pub fn new(entry: &ZipEntry, check: DigestCheck) -> Result<Self> {
        let expected_sha = match check {
            DigestCheck::Skip => None,
            DigestCheck::IfPresent => entry.sha256.clone(),
            DigestCheck::Require => Some(entry.sha256.clone().ok_or_else(|| {
                Error::MissingDigest {
                    name: entry.file_name.clone(),
                }
            })?),
        };
        Ok(Self {
            name: entry.file_name.clone(),
            hasher: EntryHasher::new(expected_sha.is_some()),
            expected_crc: entry.crc32.unwrap_or(0),
            expected_sha,
            expected_size: entry.uncompressed_size,
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Compare and return the number of plaintext bytes seen.
    pub fn finish(self) -> Result<u64> {
        let digest = self.hasher.finish();
        if digest.crc32 != self.expected_crc {
            return Err(Error::crc_mismatch(
                &self.name,
                self.expected_crc,
                digest.crc32,
            ));
        }
        if let (Some(expected), Some(actual)) = (&self.expected_sha, &digest.sha256) {
            if !expected.eq_ignore_ascii_case(actual) {
                return Err(Error::sha256_mismatch(&self.name, expected, actual));
            }
        }
        if digest.size != self.expected_size {
            return Err(Error::size_mismatch(
                &self.name,
                self.expected_size,
                digest.size,
            ));
        }
        Ok(digest.size)
    }
}

fn password_for<'a>(entry: &ZipEntry, options: &'a ExtractOptions) -> Result<&'a [u8]> {
    options
        .password
        .as_ref()
        .map(|p| p.as_bytes())
        .ok_or_else(|| Error::PasswordIncorrect {
            name: entry.file_name.clone(),
        })
}

fn capacity(entry: &ZipEntry) -> usize {
    entry.uncompressed_size.min(MAX_PREALLOC) as usize
}

/// Output bound handed to the zstd codec; it reserves little up front.
fn zstd_limit(entry: &ZipEntry) -> usize {
    usize::try_from(entry.uncompressed_size).unwrap_or(usize::MAX)
}

/// Decompress a complete payload (the bytes after the local header).
pub async fn decompress(
    codec: &CodecQueue,
    entry: &ZipEntry,
    payload: &[u8],
    options: &ExtractOptions,
) -> Result<Vec<u8>> {
    let mut verifier = Verifier::new(entry, options.digest_check)?;

    let decrypted;
    let compressed = if entry.is_encrypted() {
        let password = password_for(entry, options)?;
        decrypted = cipher::decrypt(password, entry.check_byte(), payload, &entry.file_name)?;
        &decrypted[..]
    } else {
        payload
    };

    let method = entry.compression_method;
    let data = match method {
        CompressionMethod::Stored => compressed.to_vec(),
        CompressionMethod::Deflate => {
            let mut out = Vec::with_capacity(capacity(entry));
            // one byte past the declared size is enough to fail the size check
            DeflateDecoder::new(compressed)
                .take(entry.uncompressed_size.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| Error::codec(method, e))?;
            out
        }
        CompressionMethod::Zstd => {
            codec
                .decompress(compressed, zstd_limit(entry))
                .await?
        }
        CompressionMethod::Unknown(code) => return Err(Error::UnsupportedMethod(code)),
    };

    verifier.update(&data);
    verifier.finish()?;
    Ok(data)
}

/// Decompress the entry whose payload starts at `data_offset` in `reader`
/// into `sink`, reading `buffer_size` bytes at a time.
///
/// Bytes reach the sink before the final CRC-32 comparison; callers that
/// must not expose unverified output write to a temporary destination.
/// Returns the number of plaintext bytes written.
pub async fn decompress_stream<R, W>(
    codec: &CodecQueue,
    reader: &R,
    data_offset: u64,
    entry: &ZipEntry,
    sink: &mut W,
    options: &ExtractOptions,
) -> Result<u64>
where
    R: ReadAt + ?Sized,
    W: AsyncWrite + Unpin,
{
    let method = entry.compression_method;
    if let CompressionMethod::Unknown(code) = method {
        return Err(Error::UnsupportedMethod(code));
    }

    let mut verifier = Verifier::new(entry, options.digest_check)?;
    let mut decryptor = if entry.is_encrypted() {
        let password = password_for(entry, options)?;
        Some(StreamDecryptor::new(
            password,
            entry.check_byte(),
            &entry.file_name,
        ))
    } else {
        None
    };

    let mut inflater = DeflateSink::new(Vec::new());
    let mut collected = Vec::new();
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut remaining = entry.compressed_size;
    let mut offset = data_offset;

    while remaining > 0 {
        let len = remaining.min(buf.len() as u64) as usize;
        let chunk = &mut buf[..len];
        reader.read_exact_at(offset, chunk).await?;
        offset += len as u64;
        remaining -= len as u64;

        let plain: &[u8] = match decryptor.as_mut() {
            Some(decryptor) => decryptor.decrypt_chunk(chunk)?,
            None => chunk,
        };

        match method {
            CompressionMethod::Stored => {
                verifier.update(plain);
                sink.write_all(plain).await?;
            }
            CompressionMethod::Deflate => {
                inflater
                    .write_all(plain)
                    .map_err(|e| Error::codec(method, e))?;
                let out = std::mem::take(inflater.get_mut());
                verifier.update(&out);
                sink.write_all(&out).await?;
            }
            _ => collected.extend_from_slice(plain),
        }
    }

    if let Some(decryptor) = decryptor {
        decryptor.finish()?;
    }

    match method {
        CompressionMethod::Deflate => {
            let tail = inflater.finish().map_err(|e| Error::codec(method, e))?;
            verifier.update(&tail);
            sink.write_all(&tail).await?;
        }
        CompressionMethod::Zstd => {
            let data = codec
                .decompress(&collected, zstd_limit(entry))
                .await?;
            verifier.update(&data);
            sink.write_all(&data).await?;
        }
        _ => {}
    }

    sink.flush().await?;
    verifier.finish()
}
