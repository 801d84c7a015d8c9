use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Export,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub direction: Direction,
    pub file: String,
    pub status: TransferStatus,
    pub bytes: u64,
    pub chunks: u64,
    pub retries: u64,
    pub error: Option<String>,
}

/// Append-only JSONL journal, one line per file
pub struct TransferLog {
    log_file_path: PathBuf,
    session_id: String,
}

impl TransferLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        TransferLog {
            log_file_path: path.as_ref().to_path_buf(),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fill in timestamp and session id for an entry about `file`
    pub fn entry(
        &self,
        direction: Direction,
        file: &str,
        status: TransferStatus,
    ) -> TransferLogEntry {
        TransferLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            session_id: self.session_id.clone(),
            direction,
            file: file.to_string(),
            status,
            bytes: 0,
            chunks: 0,
            retries: 0,
            error: None,
        }
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        if let Some(parent) = self.log_file_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = TransferLog::new(dir.path().join("journal.jsonl"));
        assert!(log.read_log().unwrap().is_empty());

        let mut ok = log.entry(Direction::Push, "a.nsp", TransferStatus::Completed);
        ok.bytes = 1234;
        ok.chunks = 2;
        log.add_entry(&ok).unwrap();

        let mut failed = log.entry(Direction::Export, "saves/x.bin", TransferStatus::Failed);
        failed.retries = 8;
        failed.error = Some("chunk at offset 0 still corrupt after 9 attempts".into());
        log.add_entry(&failed).unwrap();

        let entries = log.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file, "a.nsp");
        assert_eq!(entries[0].bytes, 1234);
        assert_eq!(entries[1].status, TransferStatus::Failed);
        assert_eq!(entries[1].direction, Direction::Export);
        assert!(entries.iter().all(|e| e.session_id == log.session_id()));
    }
}
