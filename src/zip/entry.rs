//! Archive member model and its header records.
//!
//! A [`ZipEntry`] is either built up while compressing a new member or
//! decoded from a central directory record. Encoding and decoding here are
//! byte-exact with the layouts in [`structures`](super::structures).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::extra::{self, ExtraField, Zip64Extra};
use super::structures::*;
use crate::hash::{Hash, crc32, digest_from_hex};
use crate::{Error, Result};

/// "Version made by": Unix host, specification 6.3.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;
const DOS_DIRECTORY: u32 = 0x10;

/// Packed MS-DOS date and time, 2-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const MIN: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
    };
    /// 2107-12-31 23:59:58
    pub const MAX: Self = Self {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Pack a local date-time, clamping to the representable range.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        match dt.year() {
            y if y < 1980 => Self::MIN,
            y if y > 2107 => Self::MAX,
            y => Self {
                date: (((y - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
                time: ((dt.hour() as u16) << 11)
                    | ((dt.minute() as u16) << 5)
                    | (dt.second() as u16 / 2),
            },
        }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_naive(&DateTime::<Local>::from(time).naive_local())
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Unpack; `None` if the fields do not form a valid date.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.date_parts();
        let (hour, minute, second) = self.time_parts();
        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
            hour as u32,
            minute as u32,
            second as u32,
        )
    }

    /// (year, month, day)
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// (hour, minute, second)
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// What kind of filesystem object an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Hardlink,
}

/// Hardlink metadata: the member it links to and the source inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardlinkInfo {
    pub source: String,
    pub inode: u64,
}

/// Owning user and group ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// Display name (UTF-8; taken from the Unicode path field when valid).
    pub file_name: String,
    /// Name bytes exactly as stored in the headers.
    pub raw_name: Vec<u8>,
    pub comment: String,
    pub compression_method: CompressionMethod,
    pub flags: GeneralPurposeFlags,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub modified: DosDateTime,
    /// Seconds since the Unix epoch, from the extended timestamp field.
    pub unix_mtime: Option<u32>,
    /// `None` until the content has been hashed.
    pub crc32: Option<u32>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    /// Lowercase hex SHA-256 of the uncompressed content.
    pub sha256: Option<String>,
    pub symlink_target: Option<String>,
    pub hardlink: Option<HardlinkInfo>,
    pub owner: Option<Owner>,
}

/// Replace every non-ASCII character with `?`.
pub fn ascii_name(name: &str) -> Vec<u8> {
    name.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

fn u16_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| Error::InvalidOption(format!("{what} of {len} bytes exceeds 65535")))
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(ZIP64_SENTINEL_U32)
}

impl ZipEntry {
    /// A new regular file entry, timestamped now, mode `0644`.
    pub fn new(name: &str) -> Self {
        let now = SystemTime::now();
        Self {
            file_name: name.to_string(),
            raw_name: ascii_name(name),
            comment: String::new(),
            compression_method: CompressionMethod::Stored,
            flags: GeneralPurposeFlags::default(),
            version_made_by: VERSION_MADE_BY,
            version_needed: 20,
            modified: DosDateTime::from_system_time(now),
            unix_mtime: unix_seconds(now),
            crc32: None,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: (S_IFREG | 0o644) << 16,
            sha256: None,
            symlink_target: None,
            hardlink: None,
            owner: None,
        }
    }

    /// A directory entry; a trailing `/` is added if missing.
    pub fn directory(name: &str) -> Self {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };
        let mut entry = Self::new(&name);
        entry.external_attributes = ((S_IFDIR | 0o755) << 16) | DOS_DIRECTORY;
        entry
    }

    /// A symbolic link entry. The payload written for it is the target path.
    pub fn symlink(name: &str, target: &str) -> Self {
        let mut entry = Self::new(name);
        entry.external_attributes = (S_IFLNK | 0o777) << 16;
        entry.symlink_target = Some(target.to_string());
        entry
    }

    /// A hardlink entry pointing at another member; it has no payload.
    pub fn hardlink(name: &str, source: &str, inode: u64) -> Self {
        let mut entry = Self::new(name);
        entry.hardlink = Some(HardlinkInfo {
            source: source.to_string(),
            inode,
        });
        entry
    }

    /// Set the Unix permission bits, keeping the file type bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        let file_type = (self.external_attributes >> 16) & S_IFMT;
        let file_type = if file_type == 0 { S_IFREG } else { file_type };
        self.external_attributes =
            ((file_type | (mode & 0o7777)) << 16) | (self.external_attributes & 0xFFFF);
        self
    }

    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.modified = DosDateTime::from_system_time(time);
        self.unix_mtime = unix_seconds(time);
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some(Owner { uid, gid });
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.is_encrypted()
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags.has_data_descriptor()
    }

    /// Unix mode (type + permission bits), if the entry was made on Unix.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (self.version_made_by >> 8 == 3 && mode != 0).then_some(mode)
    }

    pub fn kind(&self) -> EntryKind {
        let file_type = self.unix_mode().map(|m| m & S_IFMT);
        if self.hardlink.is_some() {
            EntryKind::Hardlink
        } else if self.symlink_target.is_some() || file_type == Some(S_IFLNK) {
            EntryKind::Symlink
        } else if self.file_name.ends_with('/')
            || file_type == Some(S_IFDIR)
            || self.external_attributes & DOS_DIRECTORY != 0
        {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        self.modified.date_parts()
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        self.modified.time_parts()
    }

    /// Best available modification time: the Unix field, else the DOS fields.
    pub fn modified_time(&self) -> Option<SystemTime> {
        if let Some(secs) = self.unix_mtime {
            return Some(UNIX_EPOCH + Duration::from_secs(secs as u64));
        }
        let naive = self.modified.to_naive()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(SystemTime::from)
    }

    /// Decoded SHA-256 digest, if stored.
    pub fn sha256_digest(&self) -> Option<Hash> {
        self.sha256.as_deref().and_then(digest_from_hex)
    }

    /// Byte the cipher header must end with for this entry.
    pub fn check_byte(&self) -> u8 {
        if self.has_data_descriptor() {
            (self.modified.time >> 8) as u8
        } else {
            (self.crc32.unwrap_or(0) >> 24) as u8
        }
    }

    fn needs_unicode_field(&self) -> bool {
        let fancy = !self.file_name.is_ascii() || self.file_name.contains('"');
        fancy && self.raw_name.is_ascii() && !self.flags.contains(GeneralPurposeFlags::UTF8_NAME)
    }

    fn unicode_field(&self) -> ExtraField {
        ExtraField::UnicodePath {
            name_crc32: crc32(&self.raw_name),
            name: self.file_name.clone(),
        }
    }

    fn needs_zip64(&self) -> bool {
        self.compressed_size >= ZIP64_SENTINEL_U32 as u64
            || self.uncompressed_size >= ZIP64_SENTINEL_U32 as u64
            || self.lfh_offset >= ZIP64_SENTINEL_U32 as u64
    }

    fn effective_version_needed(&self) -> u16 {
        let mut version = self
            .version_needed
            .max(self.compression_method.version_needed());
        if self.needs_zip64() {
            version = version.max(45);
        }
        version
    }

    /// Encode the 30-byte local header plus name and extra fields.
    pub fn encode_local_header(&self) -> Result<Vec<u8>> {
        let mut extra_region = Vec::new();
        if self.needs_unicode_field() {
            self.unicode_field().write_to(&mut extra_region)?;
        }

        let descriptor = self.has_data_descriptor();
        let (crc, compressed, uncompressed) = if descriptor {
            (0, 0, 0)
        } else {
            // a local ZIP64 field carries both sizes, never just one
            let sizes_overflow = self.uncompressed_size >= ZIP64_SENTINEL_U32 as u64
                || self.compressed_size >= ZIP64_SENTINEL_U32 as u64;
            if sizes_overflow {
                Zip64Extra {
                    uncompressed_size: Some(self.uncompressed_size),
                    compressed_size: Some(self.compressed_size),
                    local_header_offset: None,
                }
                .write_to(&mut extra_region)?;
                (self.crc32.unwrap_or(0), ZIP64_SENTINEL_U32, ZIP64_SENTINEL_U32)
            } else {
                (
                    self.crc32.unwrap_or(0),
                    self.compressed_size as u32,
                    self.uncompressed_size as u32,
                )
            }
        };

        let mut out = Vec::with_capacity(LFH_SIZE + self.raw_name.len() + extra_region.len());
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(self.effective_version_needed())?;
        out.write_u16::<LittleEndian>(self.flags.0)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(crc)?;
        out.write_u32::<LittleEndian>(compressed)?;
        out.write_u32::<LittleEndian>(uncompressed)?;
        out.write_u16::<LittleEndian>(u16_len(self.raw_name.len(), "file name")?)?;
        out.write_u16::<LittleEndian>(u16_len(extra_region.len(), "local extra field")?)?;
        out.extend_from_slice(&self.raw_name);
        out.extend_from_slice(&extra_region);
        Ok(out)
    }

    /// Encode the central directory record.
    ///
    /// The variable region is written as name, comment, extra.
    pub fn encode_central_record(&self) -> Result<Vec<u8>> {
        let mut extra_region = Vec::new();
        if self.needs_unicode_field() {
            self.unicode_field().write_to(&mut extra_region)?;
        }
        let zip64 = Zip64Extra {
            uncompressed_size: (self.uncompressed_size >= ZIP64_SENTINEL_U32 as u64)
                .then_some(self.uncompressed_size),
            compressed_size: (self.compressed_size >= ZIP64_SENTINEL_U32 as u64)
                .then_some(self.compressed_size),
            local_header_offset: (self.lfh_offset >= ZIP64_SENTINEL_U32 as u64)
                .then_some(self.lfh_offset),
        };
        if !zip64.is_empty() {
            zip64.write_to(&mut extra_region)?;
        }
        if self.unix_mtime.is_some() {
            ExtraField::UnixTime {
                mtime: self.unix_mtime,
                atime: None,
                ctime: None,
            }
            .write_to(&mut extra_region)?;
        }
        if let Some(sha) = &self.sha256 {
            ExtraField::Sha256(sha.clone()).write_to(&mut extra_region)?;
        }
        if let Some(owner) = self.owner {
            ExtraField::Owner {
                uid: owner.uid,
                gid: owner.gid,
            }
            .write_to(&mut extra_region)?;
        }
        if let Some(target) = &self.symlink_target {
            ExtraField::Symlink(target.clone()).write_to(&mut extra_region)?;
        }
        if let Some(link) = &self.hardlink {
            ExtraField::Hardlink {
                inode: link.inode,
                source: link.source.clone(),
            }
            .write_to(&mut extra_region)?;
        }

        let comment = self.comment.as_bytes();
        let mut out = Vec::with_capacity(
            CDFH_MIN_SIZE + self.raw_name.len() + comment.len() + extra_region.len(),
        );
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.effective_version_needed())?;
        out.write_u16::<LittleEndian>(self.flags.0)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32.unwrap_or(0))?;
        out.write_u32::<LittleEndian>(clamp_u32(self.compressed_size))?;
        out.write_u32::<LittleEndian>(clamp_u32(self.uncompressed_size))?;
        out.write_u16::<LittleEndian>(u16_len(self.raw_name.len(), "file name")?)?;
        out.write_u16::<LittleEndian>(u16_len(extra_region.len(), "central extra field")?)?;
        out.write_u16::<LittleEndian>(u16_len(comment.len(), "file comment")?)?;
        out.write_u16::<LittleEndian>(self.disk_number_start)?;
        out.write_u16::<LittleEndian>(self.internal_attributes)?;
        out.write_u32::<LittleEndian>(self.external_attributes)?;
        out.write_u32::<LittleEndian>(clamp_u32(self.lfh_offset))?;
        out.extend_from_slice(&self.raw_name);
        out.extend_from_slice(comment);
        out.extend_from_slice(&extra_region);
        Ok(out)
    }

    /// Decode one central directory record from the front of `bytes`.
    ///
    /// Returns the entry and the bytes that follow the record.
    pub fn decode_central_record(bytes: &[u8]) -> Result<(ZipEntry, &[u8])> {
        if bytes.len() < CDFH_MIN_SIZE {
            return Err(Error::malformed(
                "central directory record",
                0,
                format!("need {CDFH_MIN_SIZE} bytes, have {}", bytes.len()),
            ));
        }
        if &bytes[0..4] != CDFH_SIGNATURE {
            return Err(Error::malformed(
                "central directory record",
                0,
                format!("bad signature {:02x?}", &bytes[0..4]),
            ));
        }

        let mut cursor = Cursor::new(&bytes[4..CDFH_MIN_SIZE]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = GeneralPurposeFlags(cursor.read_u16::<LittleEndian>()?);
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()?;
        let date = cursor.read_u16::<LittleEndian>()?;
        let crc = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attributes = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()?;

        let total = CDFH_MIN_SIZE + file_name_length + extra_field_length + file_comment_length;
        if bytes.len() < total {
            return Err(Error::malformed(
                "central directory record",
                0,
                format!("variable region needs {total} bytes, have {}", bytes.len()),
            ));
        }

        let raw_name = bytes[CDFH_MIN_SIZE..CDFH_MIN_SIZE + file_name_length].to_vec();
        let rest = &bytes[CDFH_MIN_SIZE + file_name_length..total];
        let (extra_region, comment) =
            split_extra_and_comment(rest, extra_field_length, file_comment_length);

        let file_name = if flags.contains(GeneralPurposeFlags::UTF8_NAME) {
            String::from_utf8(raw_name.clone())
                .unwrap_or_else(|_| String::from_utf8_lossy(&raw_name).into_owned())
        } else {
            String::from_utf8_lossy(&raw_name).into_owned()
        };

        let mut entry = ZipEntry {
            file_name,
            raw_name,
            comment: String::from_utf8_lossy(comment).into_owned(),
            compression_method: CompressionMethod::from_u16(compression_method),
            flags,
            version_made_by,
            version_needed,
            modified: DosDateTime { date, time },
            unix_mtime: None,
            crc32: Some(crc),
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            lfh_offset: lfh_offset as u64,
            disk_number_start,
            internal_attributes,
            external_attributes,
            sha256: None,
            symlink_target: None,
            hardlink: None,
            owner: None,
        };
        entry.apply_extra_fields(extra_region);

        Ok((entry, &bytes[total..]))
    }

    /// Two passes: the Unicode path first (it only applies if its CRC matches
    /// the raw name), then every other known field.
    fn apply_extra_fields(&mut self, region: &[u8]) {
        let (records, complete) = extra::split_records(region);
        if !complete {
            log::warn!(
                "extra field region of '{}' is truncated ({} bytes)",
                self.file_name,
                region.len()
            );
        }

        for (id, payload) in &records {
            if *id != extra::UNICODE_PATH {
                continue;
            }
            if let Some(ExtraField::UnicodePath { name_crc32, name }) =
                ExtraField::decode(*id, payload)
            {
                if name_crc32 == crc32(&self.raw_name) {
                    self.file_name = name;
                } else {
                    log::debug!("stale unicode path field on '{}'", self.file_name);
                }
            }
        }

        for (id, payload) in records {
            match id {
                extra::UNICODE_PATH => {}
                extra::ZIP64 => {
                    let zip64 = Zip64Extra::decode(
                        payload,
                        self.uncompressed_size == ZIP64_SENTINEL_U32 as u64,
                        self.compressed_size == ZIP64_SENTINEL_U32 as u64,
                        self.lfh_offset == ZIP64_SENTINEL_U32 as u64,
                    );
                    if let Some(v) = zip64.uncompressed_size {
                        self.uncompressed_size = v;
                    }
                    if let Some(v) = zip64.compressed_size {
                        self.compressed_size = v;
                    }
                    if let Some(v) = zip64.local_header_offset {
                        self.lfh_offset = v;
                    }
                }
                _ => match ExtraField::decode(id, payload) {
                    Some(ExtraField::Sha256(hex)) => self.sha256 = Some(hex),
                    Some(ExtraField::UnixTime { mtime, .. }) => self.unix_mtime = mtime,
                    Some(ExtraField::Owner { uid, gid }) => self.owner = Some(Owner { uid, gid }),
                    Some(ExtraField::Symlink(target)) => self.symlink_target = Some(target),
                    Some(ExtraField::Hardlink { inode, source }) => {
                        self.hardlink = Some(HardlinkInfo { source, inode })
                    }
                    Some(ExtraField::UnicodePath { .. }) | None => {}
                },
            }
        }
    }
}

/// Split the bytes after the name into (extra, comment).
///
/// Accepts both the standard extra-then-comment layout and the
/// comment-then-extra layout this crate writes.
fn split_extra_and_comment(rest: &[u8], extra_len: usize, comment_len: usize) -> (&[u8], &[u8]) {
    let standard = (&rest[..extra_len], &rest[extra_len..]);
    if extra_len == 0 || comment_len == 0 {
        return standard;
    }
    let alternate = (&rest[comment_len..], &rest[..comment_len]);
    if extra::is_well_formed(standard.0) || !extra::is_well_formed(alternate.0) {
        standard
    } else {
        alternate
    }
}

/// Length of the central record at the front of `bytes`, if its fixed
/// region is available.
pub fn central_record_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < CDFH_MIN_SIZE {
        return None;
    }
    let field = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
    Some(CDFH_MIN_SIZE + field(28) + field(30) + field(32))
}

fn unix_seconds(time: SystemTime) -> Option<u32> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
}
