//! Integrity values: CRC-32, SHA-256, the XOR fingerprint and Merkle trees.
//!
//! [`EntryHasher`] fuses CRC-32 and the optional SHA-256 into one pass so
//! the compression and decompression engines touch each input byte once.

mod crc;
pub mod merkle;

pub use crc::{Crc32, crc32};
pub(crate) use crc::crc32_update_byte;
pub use merkle::{Hash, MerkleOptions, MerkleTree, OddLeaf};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Decode a 64-character hex digest. Case-insensitive.
pub fn digest_from_hex(hex: &str) -> Option<Hash> {
    let bytes = hex.as_bytes();
    if bytes.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, pair) in bytes.chunks(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out[i] = (hi * 16 + lo) as u8;
    }
    Some(out)
}

/// Values produced by [`EntryHasher::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDigest {
    pub crc32: u32,
    pub sha256: Option<String>,
    pub size: u64,
}

/// Single-pass CRC-32 + optional SHA-256 over an entry's plaintext.
#[derive(Clone, Default)]
pub struct EntryHasher {
    crc: Crc32,
    sha: Option<Sha256>,
    size: u64,
}

impl EntryHasher {
    pub fn new(with_sha256: bool) -> Self {
        Self {
            crc: Crc32::new(),
            sha: with_sha256.then(Sha256::new),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
        if let Some(sha) = self.sha.as_mut() {
            sha.update(data);
        }
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> EntryDigest {
        EntryDigest {
            crc32: self.crc.finalize(),
            sha256: self.sha.map(|sha| to_hex(&sha.finalize())),
            size: self.size,
        }
    }
}

/// Ordered list of leaf hashes with the two derived artifacts.
#[derive(Debug, Clone, Default)]
pub struct HashAccumulator {
    leaves: Vec<Hash>,
}

impl HashAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, leaf: Hash) {
        self.leaves.push(leaf);
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[Hash] {
        &self.leaves
    }

    /// Order-independent XOR of all leaves. A checksum, not a commitment.
    pub fn xor_fold(&self) -> Hash {
        self.leaves.iter().fold([0u8; 32], |mut acc, leaf| {
            acc.iter_mut().zip(leaf).for_each(|(a, b)| *a ^= b);
            acc
        })
    }

    /// Merkle tree over the accumulated leaves.
    pub fn tree(&self, options: MerkleOptions) -> MerkleTree {
        MerkleTree::from_hashes(self.leaves.iter().copied(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_round_trip_accepts_uppercase() {
        let hex = sha256_hex(b"abc");
        let digest = digest_from_hex(&hex.to_uppercase()).unwrap();
        assert_eq!(to_hex(&digest), hex);
        assert!(digest_from_hex("abc").is_none());
        assert!(digest_from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn entry_hasher_fuses_both_hashes() {
        let mut hasher = EntryHasher::new(true);
        hasher.update(b"te");
        hasher.update(b"st");
        let digest = hasher.finish();
        assert_eq!(digest.crc32, 0xD87F_7E0C);
        assert_eq!(digest.sha256, Some(sha256_hex(b"test")));
        assert_eq!(digest.size, 4);

        let mut crc_only = EntryHasher::new(false);
        crc_only.update(b"test");
        assert_eq!(crc_only.finish().sha256, None);
    }

    #[test]
    fn xor_fold_is_order_independent() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut forward = HashAccumulator::new();
        forward.push(a);
        forward.push(b);
        let mut backward = HashAccumulator::new();
        backward.push(b);
        backward.push(a);
        assert_eq!(forward.xor_fold(), backward.xor_fold());
        assert_eq!(forward.xor_fold(), [3u8; 32]);
        assert_eq!(HashAccumulator::new().xor_fold(), [0u8; 32]);
    }
}
