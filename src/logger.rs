use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Event and fatal-error sink for a session. Every hook is optional.
pub trait Logger: Send + Sync {
    fn event(&self, _line: &str) {}
    fn chunk_retry(&self, _file: &str, _offset: u64, _attempt: u32) {}
    fn file_done(&self, _file: &str, _bytes: u64) {}
    /// Called once when a session ends on a fatal error
    fn error(&self, _msg: &str) {}
    fn done(&self, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn event(&self, line: &str) {
        self.line(&format!("EVENT {}", line));
    }
    fn chunk_retry(&self, file: &str, offset: u64, attempt: u32) {
        self.line(&format!(
            "RETRY file={} offset={} attempt={}",
            file, offset, attempt
        ));
    }
    fn file_done(&self, file: &str, bytes: u64) {
        self.line(&format!("FILE file={} bytes={}", file, bytes));
    }
    fn error(&self, msg: &str) {
        self.line(&format!("ERROR msg={}", msg));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!("DONE files={files} bytes={bytes} seconds={seconds:.3}"));
    }
}

/// Forwards every hook to each inner logger in order
pub struct MultiLogger {
    inner: Vec<Arc<dyn Logger>>,
}

impl MultiLogger {
    pub fn new(inner: Vec<Arc<dyn Logger>>) -> Self {
        Self { inner }
    }
}

impl Logger for MultiLogger {
    fn event(&self, line: &str) {
        self.inner.iter().for_each(|l| l.event(line));
    }
    fn chunk_retry(&self, file: &str, offset: u64, attempt: u32) {
        self.inner
            .iter()
            .for_each(|l| l.chunk_retry(file, offset, attempt));
    }
    fn file_done(&self, file: &str, bytes: u64) {
        self.inner.iter().for_each(|l| l.file_done(file, bytes));
    }
    fn error(&self, msg: &str) {
        self.inner.iter().for_each(|l| l.error(msg));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.inner.iter().for_each(|l| l.done(files, bytes, seconds));
    }
}

/// Keeps every line in memory; handy for tests and for embedding hosts
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, s: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(s);
        }
    }
}

impl Logger for MemoryLogger {
    fn event(&self, line: &str) {
        self.push(format!("event: {}", line));
    }
    fn chunk_retry(&self, file: &str, offset: u64, attempt: u32) {
        self.push(format!("retry: {} @{} #{}", file, offset, attempt));
    }
    fn file_done(&self, file: &str, bytes: u64) {
        self.push(format!("file: {} {}", file, bytes));
    }
    fn error(&self, msg: &str) {
        self.push(format!("error: {}", msg));
    }
    fn done(&self, files: u64, bytes: u64, _seconds: f64) {
        self.push(format!("done: {} {}", files, bytes));
    }
}
