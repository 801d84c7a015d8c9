//! CRC32C (Castagnoli) checksums for packets and chunk payloads
//!
//! Reflected polynomial 0x82F63B78, initial and final XOR 0xFFFFFFFF
//! (the CRC-32/ISCSI parameterization). Both ends of the link must agree
//! bit for bit, so this is the only checksum the protocol knows.

use lazy_static::lazy_static;

/// Reflected Castagnoli polynomial
pub const POLY: u32 = 0x82F6_3B78;

lazy_static! {
    static ref TABLE: [u32; 256] = build_table();
}

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
        *slot = crc;
    }
    table
}

/// Incremental CRC32C state
///
/// Feeding the same bytes in any split produces the same value as
/// [`crc32c`] over the concatenation.
#[derive(Debug, Clone, Copy)]
pub struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        let table = &*TABLE;
        let mut crc = self.state;

        // Unrolled four bytes at a time, same as the device firmware
        let mut words = data.chunks_exact(4);
        for w in &mut words {
            crc = table[((crc ^ w[0] as u32) & 0xFF) as usize] ^ (crc >> 8);
            crc = table[((crc ^ w[1] as u32) & 0xFF) as usize] ^ (crc >> 8);
            crc = table[((crc ^ w[2] as u32) & 0xFF) as usize] ^ (crc >> 8);
            crc = table[((crc ^ w[3] as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        for &b in words.remainder() {
            crc = table[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8);
        }

        self.state = crc;
    }

    pub fn value(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC32C over a byte span
pub fn crc32c(data: &[u8]) -> u32 {
    let mut hasher = Crc32c::new();
    hasher.update(data);
    hasher.value()
}
