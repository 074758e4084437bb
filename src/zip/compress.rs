//! Compression engine.
//!
//! Picks the method for an entry, hashes the plaintext while it is being
//! compressed and, when a password is set, wraps the compressed bytes with
//! the legacy stream cipher. Results (method, sizes, CRC-32, SHA-256, flags)
//! are recorded on the `ZipEntry` passed in.
//!
//! Deflate and the cipher run inline on the calling task: a whole buffer
//! in [`compress`], one `buffer_size` chunk per step in
//! [`compress_stream`]. zstd goes through the [`CodecQueue`] and its
//! blocking pool.

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cipher::{self, StreamEncryptor};
use crate::codec::CodecQueue;
use crate::hash::EntryHasher;
use crate::options::{Password, WriteOptions};
use crate::{Error, Result};

use super::entry::ZipEntry;
use super::structures::{CompressionMethod, GeneralPurposeFlags, ZIP64_SENTINEL_U32};

/// Payloads shorter than this are stored even when zstd is requested.
pub const MIN_ZSTD_SIZE: u64 = 100;

/// Method for a payload of `len` bytes under `options`.
pub fn select_method(options: &WriteOptions, len: u64) -> CompressionMethod {
    if options.level == 0 {
        CompressionMethod::Stored
    } else if options.zstd {
        if len < MIN_ZSTD_SIZE {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Zstd
        }
    } else {
        CompressionMethod::Deflate
    }
}

/// CRC-32 only if the entry has none yet; SHA-256 only if requested and absent.
fn entry_hasher(entry: &ZipEntry, options: &WriteOptions) -> Option<EntryHasher> {
    let want_sha = options.sha256 && entry.sha256.is_none();
    (entry.crc32.is_none() || want_sha).then(|| EntryHasher::new(want_sha))
}

fn record_digest(entry: &mut ZipEntry, hasher: Option<EntryHasher>) {
    let Some(digest) = hasher.map(EntryHasher::finish) else {
        return;
    };
    if entry.crc32.is_none() {
        entry.crc32 = Some(digest.crc32);
    }
    if digest.sha256.is_some() {
        entry.sha256 = digest.sha256;
    }
}

fn record_method(entry: &mut ZipEntry, method: CompressionMethod, level: u32) {
    entry.compression_method = method;
    entry.version_needed = entry.version_needed.max(method.version_needed());
    if method == CompressionMethod::Deflate {
        entry.flags.set_deflate_level(level);
    } else {
        entry
            .flags
            .set(GeneralPurposeFlags::COMPRESSION_OPTIONS, false);
    }
}

fn update(hasher: &mut Option<EntryHasher>, data: &[u8]) {
    if let Some(hasher) = hasher.as_mut() {
        hasher.update(data);
    }
}

/// Compress a whole buffer for `entry`.
///
/// Returns the bytes to write after the local header. With a password the
/// 12-byte cipher header is included and counted in `compressed_size`.
pub async fn compress(
    codec: &CodecQueue,
    entry: &mut ZipEntry,
    data: &[u8],
    options: &WriteOptions,
) -> Result<Vec<u8>> {
    options.validate()?;
    let method = select_method(options, data.len() as u64);
    let mut hasher = entry_hasher(entry, options);

    let compressed = match method {
        CompressionMethod::Stored => {
            update(&mut hasher, data);
            data.to_vec()
        }
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(
                Vec::with_capacity(data.len() / 2),
                Compression::new(options.level),
            );
            for piece in data.chunks(options.buffer_size) {
                update(&mut hasher, piece);
                encoder
                    .write_all(piece)
                    .map_err(|e| Error::codec(method, e))?;
            }
            encoder.finish().map_err(|e| Error::codec(method, e))?
        }
        CompressionMethod::Zstd => {
            update(&mut hasher, data);
            codec.compress(data, options.level as i32).await?
        }
        CompressionMethod::Unknown(code) => return Err(Error::UnsupportedMethod(code)),
    };

    record_digest(entry, hasher);
    record_method(entry, method, options.level);
    entry.uncompressed_size = data.len() as u64;

    let payload = match &options.password {
        Some(password) => {
            entry.flags.set(GeneralPurposeFlags::ENCRYPTED, true);
            cipher::encrypt(password.as_bytes(), entry.check_byte(), &compressed)
        }
        None => compressed,
    };
    entry.compressed_size = payload.len() as u64;

    log::debug!(
        "compressed '{}' with {method}: {} -> {} bytes",
        entry.file_name,
        entry.uncompressed_size,
        entry.compressed_size
    );
    Ok(payload)
}

/// Writes compressed chunks to the sink, encrypting them on the way.
struct PayloadSink<'a, W> {
    sink: &'a mut W,
    encryptor: Option<StreamEncryptor>,
    written: u64,
}

impl<'a, W: AsyncWrite + Unpin> PayloadSink<'a, W> {
    async fn start(sink: &'a mut W, password: Option<&Password>, check_byte: u8) -> Result<Self> {
        let mut written = 0;
        let encryptor = match password {
            Some(password) => {
                let (encryptor, header) = StreamEncryptor::new(password.as_bytes(), check_byte);
                sink.write_all(&header).await?;
                written = header.len() as u64;
                Some(encryptor)
            }
            None => None,
        };
        Ok(Self {
            sink,
            encryptor,
            written,
        })
    }

    async fn emit(&mut self, bytes: &mut [u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if let Some(encryptor) = self.encryptor.as_mut() {
            encryptor.encrypt_chunk(bytes);
        }
        self.sink.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

fn check_stream_size(name: &str, size: u64) -> Result<()> {
    if size >= ZIP64_SENTINEL_U32 as u64 {
        return Err(Error::Unsupported(format!(
            "streamed entry '{name}' exceeds 4 GiB"
        )));
    }
    Ok(())
}

/// Compress everything `reader` yields into `sink`, `buffer_size` bytes at
/// a time.
///
/// The entry is switched to a trailing data descriptor; CRC-32 and sizes
/// are only known once the input ends. Deflate keeps one encoder across
/// all chunks and flushes its output after each. Zstd is one-shot, so its
/// input is collected first. Returns the number of bytes written.
pub async fn compress_stream<Rd, W>(
    codec: &CodecQueue,
    entry: &mut ZipEntry,
    reader: &mut Rd,
    sink: &mut W,
    options: &WriteOptions,
) -> Result<u64>
where
    Rd: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    options.validate()?;
    entry
        .flags
        .set(GeneralPurposeFlags::DATA_DESCRIPTOR, true);
    entry
        .flags
        .set(GeneralPurposeFlags::ENCRYPTED, options.password.is_some());

    let mut hasher = entry_hasher(entry, options);
    let mut buf = vec![0u8; options.buffer_size];
    let mut total = 0u64;
    let mut out = PayloadSink::start(sink, options.password.as_ref(), entry.check_byte()).await?;

    let method = if options.level == 0 {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            check_stream_size(&entry.file_name, total)?;
            update(&mut hasher, &buf[..n]);
            out.emit(&mut buf[..n]).await?;
        }
        CompressionMethod::Stored
    } else if options.zstd {
        let mut whole = Vec::new();
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            check_stream_size(&entry.file_name, total)?;
            update(&mut hasher, &buf[..n]);
            whole.extend_from_slice(&buf[..n]);
        }
        let method = select_method(options, total);
        let mut payload = if method == CompressionMethod::Zstd {
            codec.compress(&whole, options.level as i32).await?
        } else {
            whole
        };
        out.emit(&mut payload).await?;
        method
    } else {
        let method = CompressionMethod::Deflate;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(options.level));
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            check_stream_size(&entry.file_name, total)?;
            update(&mut hasher, &buf[..n]);
            encoder
                .write_all(&buf[..n])
                .map_err(|e| Error::codec(method, e))?;
            let mut pending = std::mem::take(encoder.get_mut());
            out.emit(&mut pending).await?;
        }
        let mut tail = encoder.finish().map_err(|e| Error::codec(method, e))?;
        out.emit(&mut tail).await?;
        method
    };

    check_stream_size(&entry.file_name, out.written)?;
    let written = out.written;

    record_digest(entry, hasher);
    record_method(entry, method, options.level);
    entry.uncompressed_size = total;
    entry.compressed_size = written;

    log::debug!(
        "streamed '{}' with {method}: {total} -> {written} bytes",
        entry.file_name
    );
    Ok(written)
}
