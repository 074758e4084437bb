//! Extra field records.
//!
//! Each record is `id: u16, len: u16, payload[len]`. Known IDs decode into
//! [`ExtraField`]; unknown IDs are skipped. A field whose payload does not
//! fit its declared shape is logged and ignored rather than failing the
//! whole entry.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::hash::{digest_from_hex, to_hex};
use crate::{Error, Result};

pub const ZIP64: u16 = 0x0001;
pub const SHA256: u16 = 0x014E;
pub const UNIX_TIME: u16 = 0x5455;
pub const OWNER: u16 = 0x7875;
pub const UNICODE_PATH: u16 = 0x7075;
pub const SYMLINK: u16 = 0x7855;
pub const HARDLINK: u16 = 0x7865;

/// A decoded extra field other than ZIP64 (see [`Zip64Extra`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// Lowercase hex SHA-256 of the uncompressed content.
    Sha256(String),
    /// Extended timestamp; only the modification time is written.
    UnixTime {
        mtime: Option<u32>,
        atime: Option<u32>,
        ctime: Option<u32>,
    },
    Owner { uid: u32, gid: u32 },
    /// UTF-8 name plus the CRC-32 of the raw header name it replaces.
    UnicodePath { name_crc32: u32, name: String },
    Symlink(String),
    Hardlink { inode: u64, source: String },
}

impl ExtraField {
    pub fn id(&self) -> u16 {
        match self {
            ExtraField::Sha256(_) => SHA256,
            ExtraField::UnixTime { .. } => UNIX_TIME,
            ExtraField::Owner { .. } => OWNER,
            ExtraField::UnicodePath { .. } => UNICODE_PATH,
            ExtraField::Symlink(_) => SYMLINK,
            ExtraField::Hardlink { .. } => HARDLINK,
        }
    }

    /// Decode a known field. Unknown IDs and invalid payloads yield `None`.
    pub fn decode(id: u16, payload: &[u8]) -> Option<Self> {
        let field = match id {
            SHA256 => decode_sha256(payload),
            UNIX_TIME => decode_unix_time(payload),
            OWNER => decode_owner(payload),
            UNICODE_PATH => decode_unicode_path(payload),
            SYMLINK => String::from_utf8(payload.to_vec())
                .ok()
                .map(ExtraField::Symlink),
            HARDLINK => decode_hardlink(payload),
            _ => return None,
        };
        if field.is_none() {
            log::warn!(
                "ignoring invalid extra field {:#06x} ({} bytes)",
                id,
                payload.len()
            );
        }
        field
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            ExtraField::Sha256(hex) => {
                let digest = digest_from_hex(hex).ok_or_else(|| {
                    Error::InvalidOption(format!("not a SHA-256 hex digest: {hex}"))
                })?;
                out.extend_from_slice(to_hex(&digest).as_bytes());
            }
            ExtraField::UnixTime { mtime, .. } => match mtime {
                Some(mtime) => {
                    out.write_u8(0x01)?;
                    out.write_u32::<LittleEndian>(*mtime)?;
                }
                None => out.write_u8(0)?,
            },
            ExtraField::Owner { uid, gid } => {
                out.write_u8(1)?;
                out.write_u8(4)?;
                out.write_u32::<LittleEndian>(*uid)?;
                out.write_u8(4)?;
                out.write_u32::<LittleEndian>(*gid)?;
            }
            ExtraField::UnicodePath { name_crc32, name } => {
                out.write_u8(1)?;
                out.write_u32::<LittleEndian>(*name_crc32)?;
                out.extend_from_slice(name.as_bytes());
            }
            ExtraField::Symlink(target) => out.extend_from_slice(target.as_bytes()),
            ExtraField::Hardlink { inode, source } => {
                out.write_u64::<LittleEndian>(*inode)?;
                out.extend_from_slice(source.as_bytes());
            }
        }
        Ok(out)
    }

    /// Append `id, len, payload` to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        write_raw(out, self.id(), &self.payload()?)
    }
}

pub(crate) fn write_raw(out: &mut Vec<u8>, id: u16, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::InvalidOption(format!(
            "extra field {id:#06x} payload of {} bytes exceeds 65535",
            payload.len()
        ))
    })?;
    out.write_u16::<LittleEndian>(id)?;
    out.write_u16::<LittleEndian>(len)?;
    out.extend_from_slice(payload);
    Ok(())
}

fn decode_sha256(payload: &[u8]) -> Option<ExtraField> {
    match payload.len() {
        64 => {
            let hex = std::str::from_utf8(payload).ok()?;
            digest_from_hex(hex).map(|d| ExtraField::Sha256(to_hex(&d)))
        }
        32 => Some(ExtraField::Sha256(to_hex(payload))),
        _ => None,
    }
}

fn decode_unix_time(payload: &[u8]) -> Option<ExtraField> {
    let mut cursor = Cursor::new(payload);
    let flags = cursor.read_u8().ok()?;
    let mut next = |bit: u8| {
        if flags & bit != 0 {
            cursor.read_u32::<LittleEndian>().ok()
        } else {
            None
        }
    };
    let mtime = next(0x01);
    let atime = next(0x02);
    let ctime = next(0x04);
    if flags & 0x01 != 0 && mtime.is_none() {
        return None;
    }
    Some(ExtraField::UnixTime {
        mtime,
        atime,
        ctime,
    })
}

fn read_var_uint(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let size = cursor.read_u8().ok()? as usize;
    if size == 0 || size > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    std::io::Read::read_exact(cursor, &mut buf[..size]).ok()?;
    u32::try_from(u64::from_le_bytes(buf)).ok()
}

fn decode_owner(payload: &[u8]) -> Option<ExtraField> {
    let mut cursor = Cursor::new(payload);
    if cursor.read_u8().ok()? != 1 {
        return None;
    }
    let uid = read_var_uint(&mut cursor)?;
    let gid = read_var_uint(&mut cursor)?;
    Some(ExtraField::Owner { uid, gid })
}

fn decode_unicode_path(payload: &[u8]) -> Option<ExtraField> {
    let mut cursor = Cursor::new(payload);
    if cursor.read_u8().ok()? != 1 {
        return None;
    }
    let name_crc32 = cursor.read_u32::<LittleEndian>().ok()?;
    let name = String::from_utf8(payload[5..].to_vec()).ok()?;
    Some(ExtraField::UnicodePath { name_crc32, name })
}

fn decode_hardlink(payload: &[u8]) -> Option<ExtraField> {
    let (inode, source) = payload.split_first_chunk::<8>()?;
    Some(ExtraField::Hardlink {
        inode: u64::from_le_bytes(*inode),
        source: String::from_utf8(source.to_vec()).ok()?,
    })
}

/// Split an extra region into `(id, payload)` records.
///
/// Stops at the first record whose declared length runs past the region;
/// the returned flag is `false` in that case.
pub fn split_records(data: &[u8]) -> (Vec<(u16, &[u8])>, bool) {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 4 {
            return (records, false);
        }
        let id = u16::from_le_bytes([data[pos], data[pos + 1]]);
        let len = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if data.len() - pos < len {
            return (records, false);
        }
        records.push((id, &data[pos..pos + len]));
        pos += len;
    }
    (records, true)
}

/// Whether `data` is a sequence of complete extra records.
pub fn is_well_formed(data: &[u8]) -> bool {
    split_records(data).1
}

/// ZIP64 extended information. Each value is present only when the matching
/// header field holds the `0xFFFFFFFF` sentinel, in this fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
}

impl Zip64Extra {
    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
    }

    pub fn decode(
        payload: &[u8],
        want_uncompressed: bool,
        want_compressed: bool,
        want_offset: bool,
    ) -> Self {
        let mut cursor = Cursor::new(payload);
        let mut read = |wanted: bool| {
            if wanted {
                cursor.read_u64::<LittleEndian>().ok()
            } else {
                None
            }
        };
        Self {
            uncompressed_size: read(want_uncompressed),
            compressed_size: read(want_compressed),
            local_header_offset: read(want_offset),
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut payload = Vec::with_capacity(24);
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        {
            payload.write_u64::<LittleEndian>(value)?;
        }
        write_raw(out, ZIP64, &payload)
    }
}
