//! Write and extract configuration.

use std::fmt;

use crate::{Error, Result};

/// Chunk size for streaming reads and writes (512 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;

/// Deflate level used when none is given.
pub const DEFAULT_LEVEL: u32 = 6;

/// Password for the legacy stream cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    inner: Vec<u8>,
}

impl Password {
    pub fn new(password: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: password.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Options applied to every entry a [`ZipWriter`](crate::zip::ZipWriter) adds.
#[derive(Clone)]
pub struct WriteOptions {
    /// Compression level (0-9). 0 stores entries uncompressed.
    pub level: u32,
    /// Compress with zstd instead of deflate.
    pub zstd: bool,
    /// Record a SHA-256 digest for each file entry.
    pub sha256: bool,
    /// Encrypt entries with the legacy stream cipher.
    pub password: Option<Password>,
    /// Chunk size for streaming compression.
    pub buffer_size: usize,
    /// Archive comment written into the end record.
    pub comment: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            zstd: false,
            sha256: true,
            password: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            comment: String::new(),
        }
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("level", &self.level)
            .field("zstd", &self.zstd)
            .field("sha256", &self.sha256)
            .field("has_password", &self.password.is_some())
            .field("buffer_size", &self.buffer_size)
            .field("comment", &self.comment)
            .finish()
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if `level` is greater than 9.
    pub fn level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidOption(format!(
                "compression level {level} is out of range 0-9"
            )));
        }
        self.level = level;
        Ok(self)
    }

    pub fn zstd(mut self, enabled: bool) -> Self {
        self.zstd = enabled;
        self
    }

    pub fn sha256(mut self, enabled: bool) -> Self {
        self.sha256 = enabled;
        self
    }

    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the streaming chunk size; zero falls back to the default.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = if size == 0 { DEFAULT_BUFFER_SIZE } else { size };
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Check values that may have been set directly on the fields.
    pub fn validate(&self) -> Result<()> {
        if self.level > 9 {
            return Err(Error::InvalidOption(format!(
                "compression level {} is out of range 0-9",
                self.level
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidOption("buffer size must be non-zero".into()));
        }
        if self.comment.len() > u16::MAX as usize {
            return Err(Error::InvalidOption(format!(
                "archive comment of {} bytes exceeds 65535",
                self.comment.len()
            )));
        }
        Ok(())
    }
}

/// How the stored SHA-256 digest is treated on extraction.
///
/// CRC-32 is always verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestCheck {
    /// Verify when the entry carries a digest.
    #[default]
    IfPresent,
    /// Verify, and fail with `MissingDigest` when there is none.
    Require,
    /// Do not compute or compare SHA-256.
    Skip,
}

#[derive(Clone)]
pub struct ExtractOptions {
    pub password: Option<Password>,
    pub digest_check: DigestCheck,
    pub buffer_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            password: None,
            digest_check: DigestCheck::IfPresent,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("has_password", &self.password.is_some())
            .field("digest_check", &self.digest_check)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn digest_check(mut self, check: DigestCheck) -> Self {
        self.digest_check = check;
        self
    }

    /// Sets the streaming chunk size; zero falls back to the default.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = if size == 0 { DEFAULT_BUFFER_SIZE } else { size };
        self
    }
}
