//! CRC-32 (IEEE 802.3, reflected, polynomial `0xEDB88320`).
//!
//! Bulk hashing goes through `crc32fast`. The raw lookup table is kept as a
//! `const` because the legacy stream cipher folds single bytes through it
//! without the final one's-complement.

/// Reflected CRC-32 lookup table.
pub(crate) const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// One table step: `(crc >> 8) ^ TABLE[(crc ^ byte) & 0xFF]`.
#[inline]
pub(crate) fn crc32_update_byte(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
}

/// Incremental CRC-32 calculator.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Current value; the calculator stays usable.
    pub fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn compute(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &format_args!("{:#010x}", self.finalize()))
            .finish()
    }
}

/// One-shot CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    Crc32::compute(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"test"), 0xD87F_7E0C);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
        // finalize does not consume state
        crc.update(b"");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn table_step_matches_crc32fast() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let raw = data.iter().fold(0xFFFF_FFFFu32, |crc, &b| crc32_update_byte(crc, b));
        assert_eq!(!raw, crc32(data));
    }

    #[test]
    fn table_spot_check() {
        assert_eq!(CRC32_TABLE[0], 0x0000_0000);
        assert_eq!(CRC32_TABLE[1], 0x7707_3096);
        assert_eq!(CRC32_TABLE[255], 0x2D02_EF8D);
    }
}
