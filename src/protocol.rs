//! Shared protocol constants for the sphxfer packet transport

// Packet header constants ("SPH0" read as a little-endian word)
pub const MAGIC: u32 = 0x5350_4830;

// Every packet on the wire is six little-endian u32 words
pub const PACKET_SIZE: usize = 24;

// Bytes covered by the packet checksum (everything but the last word)
pub const CHECKSUMMED_LEN: usize = 20;

// Largest single raw transfer the device side will accept (16MB)
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;

// Upper bound for an exported file name, path separators included
pub const MAX_NAME_LEN: u32 = 4096;

// Default chunk size requested by the peer driver (1MB)
pub const PEER_CHUNK_SIZE: u32 = 1024 * 1024;

// Consecutive payload checksum failures tolerated before giving up
pub const MAX_CHUNK_RETRIES: u32 = 8;

// Command codes (OPEN and EXPORT share a value; the session mode picks the meaning)
pub mod cmd {
    /// Connect barrier: the first frame the peer sends, answered with the name table
    pub const BARRIER: u32 = 0;
    pub const QUIT: u32 = 0;
    pub const OPEN: u32 = 1;
    pub const EXPORT: u32 = 1;
}

// Result codes
pub mod result {
    pub const OK: u32 = 0;
    pub const ERROR: u32 = 1;
}

// Flags carried in the upper half of an OPEN reply's third word
pub mod flags {
    pub const NONE: u16 = 0;
    // Source can only be read front to back
    pub const STREAM: u16 = 1 << 0;
}

// Progress accounting granularity
pub mod coverage {
    pub const BLOCK_SIZE: u64 = 64 * 1024;
}

// Progress and endpoint defaults
pub mod defaults {
    pub const PORT: u16 = 4230;

    // Minimum spacing between progress redraws (ms)
    pub const PROGRESS_TICK_MS: u64 = 200;

    // Throughput samples kept for the speed estimate
    pub const SPEED_WINDOW: usize = 10;
}
