//! Progress reporting
//!
//! The session pushes a [`ProgressUpdate`] after every chunk. [`BarProgress`]
//! renders it cargo-style: status lines scroll above, a bar stays at the bottom.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::logger::Logger;
use crate::protocol::defaults::PROGRESS_TICK_MS;
use crate::throughput::format_bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub completed_files: u32,
    pub total_files: u32,
    pub bytes_covered: u64,
    pub current_file: Option<String>,
    pub percent: u8,
    /// Recent transfer speed, when known
    pub bytes_per_sec: Option<f64>,
}

pub trait Progress: Send + Sync {
    fn update(&self, update: &ProgressUpdate);
}

pub struct NoopProgress;
impl Progress for NoopProgress {
    fn update(&self, _update: &ProgressUpdate) {}
}

/// Redraw at file boundaries, otherwise at most once per tick
#[derive(Debug, Default)]
struct DrawThrottle {
    last_draw: Option<Instant>,
    last_file: Option<String>,
    last_completed: u32,
}

impl DrawThrottle {
    fn should_draw(&mut self, update: &ProgressUpdate, now: Instant) -> bool {
        let boundary = update.percent == 100
            || update.completed_files != self.last_completed
            || update.current_file != self.last_file;
        let due = match self.last_draw {
            Some(t) => now.duration_since(t) >= Duration::from_millis(PROGRESS_TICK_MS),
            None => true,
        };
        if !boundary && !due {
            return false;
        }
        self.last_draw = Some(now);
        self.last_completed = update.completed_files;
        if update.current_file != self.last_file {
            self.last_file = update.current_file.clone();
        }
        true
    }
}

pub struct BarProgress {
    bar: ProgressBar,
    start_time: Instant,
    throttle: Mutex<DrawThrottle>,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            bar,
            start_time: Instant::now(),
            throttle: Mutex::new(DrawThrottle::default()),
        }
    }

    /// Print a line above the bar
    pub fn print_line(&self, tag: &str, color: Color, text: &str) {
        self.bar.suspend(|| {
            eprintln!("  {} {}", tag.with(color).bold(), text);
        });
    }

    pub fn finish_success(&self, files: u64, bytes: u64) {
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64().max(0.001);
        self.bar.finish_with_message(format!(
            "{} {} files ({}) in {:.1}s ({}/s)",
            "Completed".with(Color::Green).bold(),
            files,
            format_bytes(bytes as f64),
            elapsed.as_secs_f64(),
            format_bytes(bytes as f64 / secs)
        ));
    }

    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon_with_message(format!(
            "{} {}",
            "Failed".with(Color::Red).bold(),
            msg
        ));
    }

    fn should_draw(&self, update: &ProgressUpdate) -> bool {
        match self.throttle.lock() {
            Ok(mut throttle) => throttle.should_draw(update, Instant::now()),
            Err(_) => true,
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for BarProgress {
    fn update(&self, update: &ProgressUpdate) {
        if !self.should_draw(update) {
            return;
        }
        self.bar.set_position(update.percent as u64);
        self.bar.set_message(status_message(update));
    }
}

impl Logger for BarProgress {
    fn event(&self, line: &str) {
        self.print_line("Info", Color::Cyan, line);
    }
    fn chunk_retry(&self, file: &str, offset: u64, attempt: u32) {
        self.print_line(
            "Retry",
            Color::Yellow,
            &format!("{} at offset {} (attempt {})", file, offset, attempt),
        );
    }
    fn file_done(&self, file: &str, bytes: u64) {
        self.print_line("Done", Color::Green, &format!("{} ({})", file, format_bytes(bytes as f64)));
    }
    fn error(&self, msg: &str) {
        self.finish_error(msg);
    }
    fn done(&self, files: u64, bytes: u64, _seconds: f64) {
        self.finish_success(files, bytes);
    }
}

/// Status text shown next to the bar
pub fn status_message(update: &ProgressUpdate) -> String {
    let counter = if update.total_files > 0 {
        format!("({}/{})", update.completed_files, update.total_files)
    } else {
        format!("({} done)", update.completed_files)
    };
    let speed = update
        .bytes_per_sec
        .map(|s| format!(" @ {}/s", format_bytes(s)))
        .unwrap_or_default();
    match &update.current_file {
        Some(name) => format!(
            "{} {} {}{}",
            counter,
            name,
            format_bytes(update.bytes_covered as f64),
            speed
        ),
        None => counter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(current: Option<&str>) -> ProgressUpdate {
        ProgressUpdate {
            completed_files: 1,
            total_files: 3,
            bytes_covered: 2048,
            current_file: current.map(str::to_string),
            percent: 40,
            bytes_per_sec: Some(1024.0 * 1024.0),
        }
    }

    #[test]
    fn status_with_current_file() {
        assert_eq!(
            status_message(&update(Some("game.nsp"))),
            "(1/3) game.nsp 2.0 KB @ 1.0 MB/s"
        );
    }

    #[test]
    fn status_between_files() {
        assert_eq!(status_message(&update(None)), "(1/3)");
    }

    #[test]
    fn throttle_limits_redraws_within_a_file() {
        let tick = Duration::from_millis(PROGRESS_TICK_MS);
        let t0 = Instant::now();
        let mut throttle = DrawThrottle::default();
        let mut u = update(Some("save.bin"));
        u.percent = 0;

        assert!(throttle.should_draw(&u, t0));
        // Export updates stay at 0% and still get throttled
        assert!(!throttle.should_draw(&u, t0 + tick / 4));
        assert!(!throttle.should_draw(&u, t0 + tick / 2));
        assert!(throttle.should_draw(&u, t0 + tick));

        // A new file or a finished one always draws
        u.current_file = Some("next.bin".into());
        assert!(throttle.should_draw(&u, t0 + tick));
        u.percent = 100;
        assert!(throttle.should_draw(&u, t0 + tick));
        u.percent = 0;
        u.completed_files += 1;
        assert!(throttle.should_draw(&u, t0 + tick));
        assert!(!throttle.should_draw(&u, t0 + tick));
    }

    #[test]
    fn status_without_known_total() {
        let mut u = update(Some("save.bin"));
        u.total_files = 0;
        u.bytes_per_sec = None;
        assert_eq!(status_message(&u), "(1 done) save.bin 2.0 KB");
    }
}
