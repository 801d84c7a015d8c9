//! Command loop for one controller session
//!
//! The peer drives: the controller reads a command, answers it, and for
//! OPEN/EXPORT hands the link to the chunk engine until the file ends.
//! Any fatal error closes the session and is reported once to the logger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::coverage::CoverageMap;
use crate::error::{SessionError, SessionResult};
use crate::files::{DestinationRoot, FileSource};
use crate::log::{Direction, TransferLog, TransferStatus};
use crate::logger::{Logger, NoopLogger};
use crate::progress::{NoopProgress, Progress, ProgressUpdate};
use crate::protocol::{self, flags, result};
use crate::protocol_core::{pack_file_info, Command, Mode, ResultPacket};
use crate::throughput::SpeedMeter;
use crate::transfer::{receive_file, serve_file, ChunkLimits, FileStats};
use crate::transport::{read_exact, recv_command, send_result, write_all, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_chunk_size: u32,
    pub max_chunk_retries: u32,
    pub max_name_len: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: protocol::MAX_CHUNK_SIZE,
            max_chunk_retries: protocol::MAX_CHUNK_RETRIES,
            max_name_len: protocol::MAX_NAME_LEN,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            max_chunk_size: cfg.max_chunk_size,
            max_chunk_retries: cfg.max_chunk_retries,
            max_name_len: cfg.max_name_len,
        }
    }
}

impl SessionConfig {
    fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            max_chunk_size: self.max_chunk_size,
            max_chunk_retries: self.max_chunk_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingCommand,
    PushFile,
    ExportFile,
    Terminating,
    Closed,
}

/// What a finished session moved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub files: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    logger: Arc<dyn Logger>,
    progress: Arc<dyn Progress>,
    journal: Option<TransferLog>,
    state: LoopState,
    coverage: CoverageMap,
    meter: SpeedMeter,
    completed_files: u32,
    total_bytes: u64,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            logger: Arc::new(NoopLogger),
            progress: Arc::new(NoopProgress),
            journal: None,
            state: LoopState::Idle,
            coverage: CoverageMap::new(),
            meter: SpeedMeter::new(),
            completed_files: 0,
            total_bytes: 0,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_journal(mut self, journal: TransferLog) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Announce `queue` and serve it until the peer quits
    pub fn run_push(&mut self, queue: &mut [Box<dyn FileSource>]) -> SessionResult<SessionSummary> {
        self.begin()?;
        let started = Instant::now();
        let res = self.push_loop(queue);
        self.finish(res, started)
    }

    /// Accept exported files into `root` until the peer quits
    pub fn run_export(&mut self, root: &mut dyn DestinationRoot) -> SessionResult<SessionSummary> {
        self.begin()?;
        let started = Instant::now();
        let res = self.export_loop(root);
        self.finish(res, started)
    }

    fn begin(&mut self) -> SessionResult<()> {
        if self.state != LoopState::Idle {
            return Err(SessionError::desync("session has already run"));
        }
        self.state = LoopState::AwaitingCommand;
        if let Some(journal) = &self.journal {
            self.logger
                .event(&format!("journal session {}", journal.session_id()));
        }
        Ok(())
    }

    fn finish(&mut self, res: SessionResult<()>, started: Instant) -> SessionResult<SessionSummary> {
        self.state = LoopState::Closed;
        match res {
            Ok(()) => {
                let summary = SessionSummary {
                    files: self.completed_files as u64,
                    bytes: self.total_bytes,
                    elapsed: started.elapsed(),
                };
                self.logger
                    .done(summary.files, summary.bytes, summary.elapsed.as_secs_f64());
                Ok(summary)
            }
            Err(e) => {
                self.logger.error(&e.to_string());
                Err(e)
            }
        }
    }

    fn reply(&mut self, code: u32) -> SessionResult<()> {
        send_result(&mut self.transport, ResultPacket::build(code, 0, 0))
    }

    /// Reply ERROR and hand back the error that ends the session
    fn refuse(&mut self, err: SessionError) -> SessionResult<()> {
        self.state = LoopState::Terminating;
        self.reply(result::ERROR)?;
        Err(err)
    }

    fn push_loop(&mut self, queue: &mut [Box<dyn FileSource>]) -> SessionResult<()> {
        // Barrier: the first valid frame, whatever it says, asks for the names
        recv_command(&mut self.transport)?;
        let table = name_table(queue);
        send_result(
            &mut self.transport,
            ResultPacket::build(result::OK, table.len() as u32, 0),
        )?;
        write_all(&mut self.transport, &table)?;
        self.logger
            .event(&format!("announced {} file(s), waiting for the peer", queue.len()));

        loop {
            self.state = LoopState::AwaitingCommand;
            let packet = recv_command(&mut self.transport)?;
            match packet.command(Mode::Push) {
                Command::Quit => {
                    self.state = LoopState::Terminating;
                    return self.reply(result::OK);
                }
                Command::Open { index } => {
                    let total = queue_len(queue.len());
                    let Some(source) = queue.get_mut(index as usize) else {
                        return self.refuse(SessionError::desync(format!(
                            "peer opened file {} of {}",
                            index, total
                        )));
                    };
                    self.push_file(source.as_mut(), total)?;
                }
                _ => {
                    return self.refuse(SessionError::desync(format!(
                        "unexpected command {} in push mode",
                        packet.code()
                    )))
                }
            }
        }
    }

    fn push_file(&mut self, source: &mut dyn FileSource, total_files: u32) -> SessionResult<()> {
        self.state = LoopState::PushFile;
        let name = source.name().to_string();
        let size = source.size();
        let file_flags = if source.is_stream() {
            flags::STREAM
        } else {
            flags::NONE
        };

        let (arg3, arg4) = pack_file_info(size, file_flags);
        send_result(&mut self.transport, ResultPacket::build(result::OK, arg3, arg4))?;
        self.logger.event(&format!("sending {} ({} bytes)", name, size));

        self.coverage.reset(&name);
        self.meter.reset();
        let completed_files = self.completed_files;
        let Self {
            transport,
            config,
            logger,
            progress,
            coverage,
            meter,
            ..
        } = self;
        let start = coverage.report(&name, size);
        progress.update(&ProgressUpdate {
            completed_files,
            total_files,
            bytes_covered: start.covered_bytes,
            current_file: Some(name.clone()),
            percent: start.percent,
            bytes_per_sec: None,
        });

        let res = serve_file(
            transport,
            source,
            &config.limits(),
            &**logger,
            &mut |offset, len| {
                meter.record(len);
                let report = coverage.mark(&name, size, offset, len);
                progress.update(&ProgressUpdate {
                    completed_files,
                    total_files,
                    bytes_covered: report.covered_bytes,
                    current_file: Some(name.clone()),
                    percent: report.percent,
                    bytes_per_sec: meter.bytes_per_sec(),
                });
            },
        );
        self.file_finished(Direction::Push, &name, total_files, res)
    }

    fn export_loop(&mut self, root: &mut dyn DestinationRoot) -> SessionResult<()> {
        loop {
            self.state = LoopState::AwaitingCommand;
            let packet = recv_command(&mut self.transport)?;
            match packet.command(Mode::Export) {
                Command::Quit => {
                    self.state = LoopState::Terminating;
                    return self.reply(result::OK);
                }
                Command::Export { name_len } => self.export_file(root, name_len)?,
                _ => {
                    return self.refuse(SessionError::desync(format!(
                        "unexpected command {} in export mode",
                        packet.code()
                    )))
                }
            }
        }
    }

    fn export_file(&mut self, root: &mut dyn DestinationRoot, name_len: u32) -> SessionResult<()> {
        if name_len == 0 || name_len > self.config.max_name_len {
            return self.refuse(SessionError::desync(format!(
                "export name length {} outside 1..={}",
                name_len, self.config.max_name_len
            )));
        }
        self.reply(result::OK)?;

        let raw = read_exact(&mut self.transport, name_len as usize)?;
        let name = match String::from_utf8(raw) {
            Ok(name) => name,
            Err(_) => return self.refuse(SessionError::desync("export name is not UTF-8")),
        };
        let mut sink = match root.create(&name) {
            Ok(sink) => sink,
            Err(e) => {
                self.journal_entry(Direction::Export, &name, &FileStats::default(), Some(&e));
                return self.refuse(e);
            }
        };
        self.reply(result::OK)?;

        self.state = LoopState::ExportFile;
        self.logger.event(&format!("receiving {}", name));
        self.coverage.reset(&name);
        self.meter.reset();

        let completed_files = self.completed_files;
        let Self {
            transport,
            config,
            logger,
            progress,
            meter,
            ..
        } = self;
        // Final size is unknown until the sentinel, so report the high-water mark
        let mut high_water = 0u64;
        progress.update(&ProgressUpdate {
            completed_files,
            total_files: 0,
            bytes_covered: 0,
            current_file: Some(name.clone()),
            percent: 0,
            bytes_per_sec: None,
        });
        let res = receive_file(
            transport,
            &name,
            sink.as_mut(),
            &config.limits(),
            &**logger,
            &mut |offset, len| {
                meter.record(len);
                high_water = high_water.max(offset.saturating_add(len));
                progress.update(&ProgressUpdate {
                    completed_files,
                    total_files: 0,
                    bytes_covered: high_water,
                    current_file: Some(name.clone()),
                    percent: 0,
                    bytes_per_sec: meter.bytes_per_sec(),
                });
            },
        );
        self.file_finished(Direction::Export, &name, 0, res)
    }

    fn file_finished(
        &mut self,
        direction: Direction,
        name: &str,
        total_files: u32,
        res: SessionResult<FileStats>,
    ) -> SessionResult<()> {
        match res {
            Ok(stats) => {
                self.completed_files += 1;
                self.total_bytes += stats.bytes;
                self.logger.file_done(name, stats.bytes);
                self.progress.update(&ProgressUpdate {
                    completed_files: self.completed_files,
                    total_files,
                    bytes_covered: stats.bytes,
                    current_file: Some(name.to_string()),
                    percent: 100,
                    bytes_per_sec: self.meter.bytes_per_sec(),
                });
                self.journal_entry(direction, name, &stats, None);
                Ok(())
            }
            Err(e) => {
                self.state = LoopState::Terminating;
                self.journal_entry(direction, name, &FileStats::default(), Some(&e));
                Err(e)
            }
        }
    }

    fn journal_entry(
        &self,
        direction: Direction,
        name: &str,
        stats: &FileStats,
        err: Option<&SessionError>,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };
        let status = if err.is_some() {
            TransferStatus::Failed
        } else {
            TransferStatus::Completed
        };
        let mut entry = journal.entry(direction, name, status);
        entry.bytes = stats.bytes;
        entry.chunks = stats.chunks;
        entry.retries = stats.retries;
        entry.error = err.map(|e| e.to_string());
        if let Err(e) = journal.add_entry(&entry) {
            self.logger.event(&format!("journal write failed: {:#}", e));
        }
    }
}

fn queue_len(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Queued names joined by newlines, plus a trailing newline.
/// An empty queue still announces the lone newline.
pub fn name_table(queue: &[Box<dyn FileSource>]) -> Vec<u8> {
    let mut table = queue
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();
    table.push(b'\n');
    table
}
