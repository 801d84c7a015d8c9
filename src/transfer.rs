//! Chunk transfer engine
//!
//! One call moves one file. In send mode the peer asks for ranges with data
//! headers and the controller answers with the bytes; in receive mode the peer
//! announces chunks and the controller verifies and stores them. Both loops
//! end at the (offset 0, length 0) sentinel.

use crate::checksum::crc32c;
use crate::error::{SessionError, SessionResult};
use crate::files::{FileSink, FileSource};
use crate::logger::Logger;
use crate::protocol::{self, result};
use crate::protocol_core::ResultPacket;
use crate::transport::{read_exact, recv_data_header, send_result, write_all, Transport};

/// Where a verified chunk goes in the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    Sequential,
    Positioned,
}

/// Tracks the end of the contiguous prefix written so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequentialCursor {
    next: u64,
}

impl SequentialCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u64 {
        self.next
    }

    /// Route a chunk; only the sequential path advances the cursor
    pub fn route(&mut self, offset: u64, len: u64) -> WriteRoute {
        if offset == self.next {
            self.next = self.next.saturating_add(len);
            WriteRoute::Sequential
        } else {
            WriteRoute::Positioned
        }
    }
}

/// Bounds agreed out of band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_chunk_size: u32,
    pub max_chunk_retries: u32,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_chunk_size: protocol::MAX_CHUNK_SIZE,
            max_chunk_retries: protocol::MAX_CHUNK_RETRIES,
        }
    }
}

/// Per-file counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub chunks: u64,
    pub bytes: u64,
    pub retries: u64,
    pub sequential_writes: u64,
    pub positioned_writes: u64,
}

/// Compare a payload with the checksum its header announced
pub fn verify_chunk(offset: u64, expected: u32, payload: &[u8]) -> SessionResult<()> {
    let actual = crc32c(payload);
    if actual != expected {
        return Err(SessionError::ChunkChecksum {
            offset,
            expected,
            actual,
        });
    }
    Ok(())
}

fn reply<T: Transport + ?Sized>(t: &mut T, code: u32) -> SessionResult<()> {
    send_result(t, ResultPacket::build(code, 0, 0))
}

/// Serve `source` until the peer sends the end sentinel.
///
/// `on_chunk(offset, len)` runs after each range is written to the link.
pub fn serve_file<T: Transport + ?Sized>(
    t: &mut T,
    source: &mut dyn FileSource,
    limits: &ChunkLimits,
    logger: &dyn Logger,
    on_chunk: &mut dyn FnMut(u64, u64),
) -> SessionResult<FileStats> {
    let mut stats = FileStats::default();
    let mut stream_pos = 0u64;
    let stream = source.is_stream();

    loop {
        let header = recv_data_header(t)?;
        if header.is_end() {
            reply(t, result::OK)?;
            return Ok(stats);
        }

        let (offset, len) = (header.offset(), header.len());
        if len > limits.max_chunk_size {
            logger.event(&format!(
                "{}: refused {} byte request (limit {})",
                source.name(),
                len,
                limits.max_chunk_size
            ));
            reply(t, result::ERROR)?;
            continue;
        }
        if stream && offset < stream_pos {
            logger.event(&format!(
                "{}: cannot seek back to {} on a stream (at {})",
                source.name(),
                offset,
                stream_pos
            ));
            reply(t, result::ERROR)?;
            continue;
        }

        let bytes = match source.read_range(offset, len as usize) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = SessionError::resource(
                    format!("read {} at offset {}", source.name(), offset),
                    e,
                );
                logger.event(&err.to_string());
                reply(t, result::ERROR)?;
                continue;
            }
        };

        let n = bytes.len() as u32;
        send_result(t, ResultPacket::build(result::OK, n, crc32c(&bytes)))?;
        if !bytes.is_empty() {
            write_all(t, &bytes)?;
        }

        stream_pos = offset.saturating_add(n as u64);
        stats.chunks += 1;
        stats.bytes += n as u64;
        on_chunk(offset, n as u64);
    }
}

/// Store chunks for `name` into `sink` until the end sentinel.
///
/// A corrupt payload gets an ERROR reply and the loop waits for the resend.
/// More than `max_chunk_retries` corrupt payloads in a row end the session.
pub fn receive_file<T: Transport + ?Sized>(
    t: &mut T,
    name: &str,
    sink: &mut dyn FileSink,
    limits: &ChunkLimits,
    logger: &dyn Logger,
    on_chunk: &mut dyn FnMut(u64, u64),
) -> SessionResult<FileStats> {
    let mut stats = FileStats::default();
    let mut cursor = SequentialCursor::new();
    let mut consecutive_failures = 0u32;

    loop {
        let header = recv_data_header(t)?;
        if !header.is_end() && header.len() > limits.max_chunk_size {
            reply(t, result::ERROR)?;
            return Err(SessionError::desync(format!(
                "{}: chunk of {} bytes exceeds limit {}",
                name,
                header.len(),
                limits.max_chunk_size
            )));
        }

        // Readiness for the payload (or acknowledgement of the sentinel)
        reply(t, result::OK)?;

        if header.is_end() {
            sink.close()
                .map_err(|e| SessionError::resource(format!("close {}", name), e))?;
            return Ok(stats);
        }

        let offset = header.offset();
        let payload = read_exact(t, header.len() as usize)?;

        match verify_chunk(offset, header.crc32c(), &payload) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                consecutive_failures += 1;
                stats.retries += 1;
                reply(t, result::ERROR)?;
                logger.chunk_retry(name, offset, consecutive_failures);
                if consecutive_failures > limits.max_chunk_retries {
                    return Err(SessionError::RetriesExhausted {
                        offset,
                        attempts: consecutive_failures,
                    });
                }
                continue;
            }
            Err(e) => return Err(e),
        }
        consecutive_failures = 0;

        let len = payload.len() as u64;
        let route = cursor.route(offset, len);
        let written = match route {
            WriteRoute::Sequential => sink.write_sequential(&payload),
            WriteRoute::Positioned => sink.write_at(offset, &payload),
        };
        if let Err(e) = written {
            reply(t, result::ERROR)?;
            return Err(SessionError::resource(
                format!("write {} at offset {}", name, offset),
                e,
            ));
        }

        reply(t, result::OK)?;
        stats.chunks += 1;
        stats.bytes += len;
        match route {
            WriteRoute::Sequential => stats.sequential_writes += 1,
            WriteRoute::Positioned => stats.positioned_writes += 1,
        }
        on_chunk(offset, len);
    }
}
