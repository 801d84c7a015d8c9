//! Transfer speed estimation over a sliding window of samples

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::defaults::SPEED_WINDOW;

/// Throughput sample: bytes moved and how long it took
#[derive(Clone, Debug)]
struct ThroughputSample {
    bytes: u64,
    duration: Duration,
}

#[derive(Debug)]
pub struct SpeedMeter {
    last_mark: Instant,
    samples: VecDeque<ThroughputSample>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            last_mark: Instant::now(),
            samples: VecDeque::with_capacity(SPEED_WINDOW),
        }
    }

    /// Start a fresh window (new file)
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record `bytes` moved since the previous call
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.record_sample(bytes, now.duration_since(self.last_mark));
        self.last_mark = now;
    }

    fn record_sample(&mut self, bytes: u64, duration: Duration) {
        // Keep only recent samples
        if self.samples.len() >= SPEED_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(ThroughputSample { bytes, duration });
    }

    /// Average over the recent window, in bytes per second
    pub fn bytes_per_sec(&self) -> Option<f64> {
        let bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let duration: Duration = self.samples.iter().map(|s| s.duration).sum();
        if duration.as_secs_f64() > 0.0 {
            Some(bytes as f64 / duration.as_secs_f64())
        } else {
            None
        }
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable byte count, binary units
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_recent_samples() {
        let mut meter = SpeedMeter::new();
        for _ in 0..SPEED_WINDOW {
            meter.record_sample(1, Duration::from_secs(1));
        }
        // A burst pushes out one slow sample
        meter.record_sample(1_000 + 1, Duration::from_secs(1));
        let speed = meter.bytes_per_sec().unwrap();
        let expected = (SPEED_WINDOW as f64 - 1.0 + 1_001.0) / SPEED_WINDOW as f64;
        assert!((speed - expected).abs() < 1e-9);
        assert_eq!(meter.samples.len(), SPEED_WINDOW);
    }

    #[test]
    fn test_no_samples_no_speed() {
        let meter = SpeedMeter::new();
        assert!(meter.bytes_per_sec().is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GB");
    }
}
