//! Block-granular coverage for progress reporting
//!
//! Chunks can arrive at any offset, so progress is estimated from which
//! 64KB blocks have been touched rather than from a contiguous byte count.
//! The estimate only ever grows.

use std::collections::{BTreeSet, HashMap};

use crate::protocol::coverage::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageReport {
    pub covered_bytes: u64,
    pub percent: u8,
}

#[derive(Debug, Default)]
pub struct CoverageMap {
    files: HashMap<String, BTreeSet<u64>>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a file's blocks (it is being sent again from scratch)
    pub fn reset(&mut self, name: &str) {
        self.files.remove(name);
    }

    /// Record `[offset, offset + len)` for `name` and report the new estimate
    pub fn mark(&mut self, name: &str, file_size: u64, offset: u64, len: u64) -> CoverageReport {
        let blocks = self.files.entry(name.to_string()).or_default();
        if len > 0 {
            let first = offset / BLOCK_SIZE;
            let last = offset.saturating_add(len - 1) / BLOCK_SIZE;
            blocks.extend(first..=last);
        }
        Self::estimate(blocks.len() as u64, file_size)
    }

    pub fn report(&self, name: &str, file_size: u64) -> CoverageReport {
        let blocks = self.files.get(name).map_or(0, |b| b.len() as u64);
        Self::estimate(blocks, file_size)
    }

    fn estimate(blocks: u64, file_size: u64) -> CoverageReport {
        if file_size == 0 {
            return CoverageReport {
                covered_bytes: 0,
                percent: 100,
            };
        }
        let covered_bytes = blocks.saturating_mul(BLOCK_SIZE).min(file_size);
        let percent = (covered_bytes as u128 * 100 / file_size as u128).min(100) as u8;
        CoverageReport {
            covered_bytes,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_every_intersecting_block() {
        let mut map = CoverageMap::new();
        let size = 10 * BLOCK_SIZE;
        // Straddles blocks 0 and 1
        let r = map.mark("a", size, BLOCK_SIZE - 1, 2);
        assert_eq!(r.covered_bytes, 2 * BLOCK_SIZE);
        assert_eq!(r.percent, 20);
        // Inside block 1 again: no change
        let r = map.mark("a", size, BLOCK_SIZE + 10, 10);
        assert_eq!(r.percent, 20);
    }

    #[test]
    fn test_zero_length_chunk_marks_nothing() {
        let mut map = CoverageMap::new();
        let r = map.mark("a", 4 * BLOCK_SIZE, 0, 0);
        assert_eq!(r, CoverageReport::default());
    }

    #[test]
    fn test_empty_file_is_complete() {
        let mut map = CoverageMap::new();
        assert_eq!(map.mark("empty", 0, 0, 0).percent, 100);
        assert_eq!(map.report("never-seen", 0).percent, 100);
    }

    #[test]
    fn test_covered_bytes_capped_at_file_size() {
        let mut map = CoverageMap::new();
        let r = map.mark("small", 1000, 0, 1000);
        assert_eq!(r.covered_bytes, 1000);
        assert_eq!(r.percent, 100);
    }

    #[test]
    fn test_percent_monotonic_for_any_order() {
        let size = 1_000_000u64;
        let chunks: [(u64, u64); 8] = [
            (900_000, 100_000),
            (0, 4096),
            (500_000, 70_000),
            (0, 4096),
            (131_072, 300_000),
            (65_536, 65_536),
            (431_072, 468_928),
            (12, 1),
        ];
        let mut map = CoverageMap::new();
        let mut last = 0u8;
        for (off, len) in chunks {
            let r = map.mark("f", size, off, len);
            assert!(r.percent >= last);
            assert!(r.percent <= 100);
            last = r.percent;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut map = CoverageMap::new();
        map.mark("f", BLOCK_SIZE * 2, 0, BLOCK_SIZE);
        assert_eq!(map.report("f", BLOCK_SIZE * 2).percent, 50);
        map.reset("f");
        assert_eq!(map.report("f", BLOCK_SIZE * 2).percent, 0);
    }

    #[test]
    fn test_files_tracked_independently() {
        let mut map = CoverageMap::new();
        map.mark("a", BLOCK_SIZE * 4, 0, BLOCK_SIZE * 4);
        assert_eq!(map.report("a", BLOCK_SIZE * 4).percent, 100);
        assert_eq!(map.report("b", BLOCK_SIZE * 4).percent, 0);
    }
}
