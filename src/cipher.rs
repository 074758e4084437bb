//! Traditional PKWARE stream cipher ("ZipCrypto").
//!
//! Three 32-bit key words are seeded from the password and then advanced
//! with every *plaintext* byte, strictly in order. A 12-byte header (11
//! random bytes and one check byte) precedes the encrypted payload; the
//! check byte lets a reader reject a wrong password before trusting any
//! payload bytes.

use rand::RngCore;

use crate::hash::crc32_update_byte;
use crate::{Error, Result};

/// Length of the encryption header that precedes every encrypted payload.
pub const ENCRYPTION_HEADER_LEN: usize = 12;

const KEY0_INIT: u32 = 0x1234_5678;
const KEY1_INIT: u32 = 0x2345_6789;
const KEY2_INIT: u32 = 0x3456_7890;

/// Key state for one payload.
#[derive(Clone, PartialEq, Eq)]
pub struct ZipCryptoKeys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl std::fmt::Debug for ZipCryptoKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipCryptoKeys").finish_non_exhaustive()
    }
}

impl ZipCryptoKeys {
    /// Derive keys by folding every password byte through [`update`](Self::update).
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            k0: KEY0_INIT,
            k1: KEY1_INIT,
            k2: KEY2_INIT,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    pub fn update(&mut self, byte: u8) {
        self.k0 = crc32_update_byte(self.k0, byte);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xFF)
            .wrapping_mul(0x0808_8405)
            .wrapping_add(1);
        self.k2 = crc32_update_byte(self.k2, (self.k1 >> 24) as u8);
    }

    #[inline]
    fn keystream_byte(&self) -> u8 {
        let t = self.k2 | 2;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.keystream_byte();
        self.update(plain);
        cipher
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.keystream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b = self.encrypt_byte(*b);
        }
    }

    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b = self.decrypt_byte(*b);
        }
    }

    /// Produce an encrypted header ending in `check_byte`.
    pub fn encrypt_header(&mut self, check_byte: u8) -> [u8; ENCRYPTION_HEADER_LEN] {
        let mut header = [0u8; ENCRYPTION_HEADER_LEN];
        rand::thread_rng().fill_bytes(&mut header[..ENCRYPTION_HEADER_LEN - 1]);
        header[ENCRYPTION_HEADER_LEN - 1] = check_byte;
        self.encrypt_in_place(&mut header);
        header
    }

    /// Decrypt a header and report whether its last byte equals `check_byte`.
    pub fn check_header(&mut self, header: &[u8; ENCRYPTION_HEADER_LEN], check_byte: u8) -> bool {
        let mut plain = *header;
        self.decrypt_in_place(&mut plain);
        plain[ENCRYPTION_HEADER_LEN - 1] == check_byte
    }
}

/// Encrypt a finished payload: header followed by the encrypted bytes.
pub fn encrypt(password: &[u8], check_byte: u8, data: &[u8]) -> Vec<u8> {
    let mut keys = ZipCryptoKeys::new(password);
    let mut out = Vec::with_capacity(ENCRYPTION_HEADER_LEN + data.len());
    out.extend_from_slice(&keys.encrypt_header(check_byte));
    let start = out.len();
    out.extend_from_slice(data);
    keys.encrypt_in_place(&mut out[start..]);
    out
}

/// Decrypt a payload produced by [`encrypt`].
///
/// `name` is only used for error context.
pub fn decrypt(password: &[u8], check_byte: u8, data: &[u8], name: &str) -> Result<Vec<u8>> {
    let Some((header, body)) = data.split_first_chunk::<ENCRYPTION_HEADER_LEN>() else {
        return Err(Error::PasswordIncorrect {
            name: name.to_string(),
        });
    };
    let mut keys = ZipCryptoKeys::new(password);
    if !keys.check_header(header, check_byte) {
        return Err(Error::PasswordIncorrect {
            name: name.to_string(),
        });
    }
    let mut out = body.to_vec();
    keys.decrypt_in_place(&mut out);
    Ok(out)
}

/// Incremental decryptor for payloads read in chunks.
///
/// Holds back at most the 12 header bytes; once the check byte passes,
/// every later chunk is decrypted in place.
pub struct StreamDecryptor {
    keys: ZipCryptoKeys,
    header: [u8; ENCRYPTION_HEADER_LEN],
    filled: usize,
    check_byte: u8,
    name: String,
}

impl StreamDecryptor {
    pub fn new(password: &[u8], check_byte: u8, name: &str) -> Self {
        Self {
            keys: ZipCryptoKeys::new(password),
            header: [0u8; ENCRYPTION_HEADER_LEN],
            filled: 0,
            check_byte,
            name: name.to_string(),
        }
    }

    /// Whether the header has been consumed and validated.
    pub fn is_verified(&self) -> bool {
        self.filled == ENCRYPTION_HEADER_LEN
    }

    /// Decrypt `chunk` in place and return the plaintext part of it.
    ///
    /// Bytes that belong to the header are consumed and not returned.
    pub fn decrypt_chunk<'a>(&mut self, chunk: &'a mut [u8]) -> Result<&'a [u8]> {
        let mut start = 0;
        if self.filled < ENCRYPTION_HEADER_LEN {
            let take = (ENCRYPTION_HEADER_LEN - self.filled).min(chunk.len());
            self.header[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
            self.filled += take;
            start = take;
            if self.filled < ENCRYPTION_HEADER_LEN {
                return Ok(&[]);
            }
            if !self.keys.check_header(&self.header, self.check_byte) {
                return Err(Error::PasswordIncorrect {
                    name: std::mem::take(&mut self.name),
                });
            }
        }
        let body = &mut chunk[start..];
        self.keys.decrypt_in_place(body);
        Ok(body)
    }

    /// Fails if the stream ended before a full header arrived.
    pub fn finish(self) -> Result<()> {
        if self.is_verified() {
            Ok(())
        } else {
            Err(Error::PasswordIncorrect { name: self.name })
        }
    }
}

/// Incremental encryptor; the header is produced up front.
pub struct StreamEncryptor {
    keys: ZipCryptoKeys,
}

impl StreamEncryptor {
    pub fn new(password: &[u8], check_byte: u8) -> (Self, [u8; ENCRYPTION_HEADER_LEN]) {
        let mut keys = ZipCryptoKeys::new(password);
        let header = keys.encrypt_header(check_byte);
        (Self { keys }, header)
    }

    pub fn encrypt_chunk(&mut self, chunk: &mut [u8]) {
        self.keys.encrypt_in_place(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_keys() {
        let keys = ZipCryptoKeys::new(b"");
        assert_eq!((keys.k0, keys.k1, keys.k2), (KEY0_INIT, KEY1_INIT, KEY2_INIT));
    }

    #[test]
    fn different_passwords_different_keys() {
        assert_ne!(ZipCryptoKeys::new(b"abc"), ZipCryptoKeys::new(b"xyz"));
        assert_eq!(ZipCryptoKeys::new(b"abc"), ZipCryptoKeys::new(b"abc"));
    }

    #[test]
    fn round_trip() {
        let data = b"hello world, this is a secret payload";
        let sealed = encrypt(b"secret", 0xAB, data);
        assert_eq!(sealed.len(), data.len() + ENCRYPTION_HEADER_LEN);
        assert_ne!(&sealed[ENCRYPTION_HEADER_LEN..], data);
        let opened = decrypt(b"secret", 0xAB, &sealed, "x").unwrap();
        assert_eq!(opened, data);
    }

    #[test]
    fn wrong_check_byte_is_rejected() {
        let sealed = encrypt(b"secret", 0x10, b"payload");
        let err = decrypt(b"secret", 0x11, &sealed, "x").unwrap_err();
        assert!(matches!(err, Error::PasswordIncorrect { .. }));
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = decrypt(b"pw", 0, &[0u8; 5], "short").unwrap_err();
        assert!(matches!(err, Error::PasswordIncorrect { name } if name == "short"));
    }

    #[test]
    fn stream_decryptor_matches_one_shot_across_chunk_sizes() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let sealed = encrypt(b"pw", 0x42, &data);
        for chunk_size in [1, 5, 12, 13, 64, 4096] {
            let mut decryptor = StreamDecryptor::new(b"pw", 0x42, "x");
            let mut out = Vec::new();
            for chunk in sealed.chunks(chunk_size) {
                let mut buf = chunk.to_vec();
                out.extend_from_slice(decryptor.decrypt_chunk(&mut buf).unwrap());
            }
            decryptor.finish().unwrap();
            assert_eq!(out, data, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn stream_decryptor_releases_nothing_before_header() {
        let sealed = encrypt(b"pw", 0x42, b"abc");
        let mut decryptor = StreamDecryptor::new(b"pw", 0x42, "x");
        let mut first = sealed[..11].to_vec();
        assert!(decryptor.decrypt_chunk(&mut first).unwrap().is_empty());
        assert!(!decryptor.is_verified());
        let truncated = StreamDecryptor::new(b"pw", 0x42, "x");
        assert!(truncated.finish().is_err());
    }

    #[test]
    fn stream_encryptor_matches_decrypt() {
        let (mut enc, header) = StreamEncryptor::new(b"pw", 7);
        let mut sealed = header.to_vec();
        for part in [&b"first "[..], b"second ", b"third"] {
            let mut buf = part.to_vec();
            enc.encrypt_chunk(&mut buf);
            sealed.extend_from_slice(&buf);
        }
        assert_eq!(decrypt(b"pw", 7, &sealed, "x").unwrap(), b"first second third");
    }
}
