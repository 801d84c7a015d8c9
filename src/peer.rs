//! Device side of the protocol
//!
//! [`Peer`] issues the commands a console would: ask for the name table, open
//! files and pull ranges, or export files chunk by chunk. The emulator binary
//! and the loopback tests drive a controller [`Session`](crate::session::Session)
//! with it.

use std::sync::Arc;

use crate::checksum::crc32c;
use crate::error::{SessionError, SessionResult};
use crate::files::{DestinationRoot, FileSink, FileSource};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::{self, cmd};
use crate::protocol_core::{unpack_file_info, CommandPacket, DataPacket};
use crate::transfer::verify_chunk;
use crate::transport::{read_exact, recv_result, send_packet, write_all, Transport};

pub struct Peer<T: Transport> {
    transport: T,
    chunk_size: u32,
    max_resends: u32,
    logger: Arc<dyn Logger>,
}

impl<T: Transport> Peer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            chunk_size: protocol::PEER_CHUNK_SIZE,
            max_resends: protocol::MAX_CHUNK_RETRIES,
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_resends(mut self, max_resends: u32) -> Self {
        self.max_resends = max_resends;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn command(&mut self, code: u32, arg3: u32, what: &str) -> SessionResult<(u32, u32)> {
        send_packet(&mut self.transport, CommandPacket::build(code, arg3, 0).packet())?;
        let reply = recv_result(&mut self.transport)?.expect_ok(what)?;
        Ok((reply.arg3(), reply.arg4()))
    }

    fn data_header(&mut self, header: DataPacket, what: &str) -> SessionResult<(u32, u32)> {
        send_packet(&mut self.transport, header.packet())?;
        let reply = recv_result(&mut self.transport)?.expect_ok(what)?;
        Ok((reply.arg3(), reply.arg4()))
    }

    /// Send the connect barrier and read back the announced names
    pub fn request_names(&mut self) -> SessionResult<Vec<String>> {
        let (len, _flags) = self.command(cmd::BARRIER, 0, "name table")?;
        let table = read_exact(&mut self.transport, len as usize)?;
        let names = table
            .split(|b| *b == b'\n')
            .filter(|n| !n.is_empty())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .collect();
        Ok(names)
    }

    /// Open file `index`; returns its size and flags
    pub fn open(&mut self, index: u32) -> SessionResult<(u64, u16)> {
        let (arg3, arg4) = self.command(cmd::OPEN, index, "open")?;
        Ok(unpack_file_info(arg3, arg4))
    }

    /// Ask for `len` bytes at `offset` of the open file. Shorter at end of file.
    pub fn read_chunk(&mut self, offset: u64, len: u32) -> SessionResult<Vec<u8>> {
        let (n, crc) = self.data_header(DataPacket::build(offset, len, 0), "read")?;
        if n > len {
            return Err(SessionError::desync(format!(
                "asked for {} bytes, controller sent {}",
                len, n
            )));
        }
        let data = read_exact(&mut self.transport, n as usize)?;
        verify_chunk(offset, crc, &data)?;
        Ok(data)
    }

    pub fn close_file(&mut self) -> SessionResult<()> {
        self.data_header(DataPacket::end(), "close").map(|_| ())
    }

    pub fn quit(&mut self) -> SessionResult<()> {
        self.command(cmd::QUIT, 0, "quit").map(|_| ())
    }

    /// Pull file `index` into `sink` front to back
    pub fn fetch_file(&mut self, index: u32, name: &str, sink: &mut dyn FileSink) -> SessionResult<u64> {
        let (size, _flags) = self.open(index)?;
        let mut offset = 0u64;
        let mut attempts = 0u32;
        while offset < size {
            let want = (size - offset).min(self.chunk_size as u64) as u32;
            let data = match self.read_chunk(offset, want) {
                Ok(data) => data,
                Err(e) if e.is_recoverable() && attempts < self.max_resends => {
                    attempts += 1;
                    self.logger.chunk_retry(name, offset, attempts);
                    continue;
                }
                Err(e) => return Err(e),
            };
            attempts = 0;
            if data.is_empty() {
                return Err(SessionError::desync(format!(
                    "{} ended at {} of {} bytes",
                    name, offset, size
                )));
            }
            sink.write_sequential(&data)
                .map_err(|e| SessionError::resource(format!("write {}", name), e))?;
            offset += data.len() as u64;
        }
        self.close_file()?;
        sink.close()
            .map_err(|e| SessionError::resource(format!("close {}", name), e))?;
        self.logger.file_done(name, size);
        Ok(size)
    }

    /// Pull every announced file into `root`, then quit
    pub fn fetch_all(&mut self, root: &mut dyn DestinationRoot) -> SessionResult<Vec<(String, u64)>> {
        let names = self.request_names()?;
        self.logger.event(&format!("controller offers {} file(s)", names.len()));
        let mut fetched = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let mut sink = root.create(&name)?;
            let size = self.fetch_file(index as u32, &name, sink.as_mut())?;
            fetched.push((name, size));
        }
        self.quit()?;
        Ok(fetched)
    }

    /// EXPORT `name`: two OKs, one before and one after the name goes out
    pub fn begin_export(&mut self, name: &str) -> SessionResult<()> {
        self.command(cmd::EXPORT, name.len() as u32, "export")?;
        write_all(&mut self.transport, name.as_bytes())?;
        recv_result(&mut self.transport)?.expect_ok("create")?;
        Ok(())
    }

    /// Send one chunk, resending while the controller answers ERROR
    pub fn write_chunk(&mut self, name: &str, offset: u64, data: &[u8]) -> SessionResult<()> {
        let header = DataPacket::build(offset, data.len() as u32, crc32c(data));
        let mut attempts = 0u32;
        loop {
            self.data_header(header, "chunk header")?;
            write_all(&mut self.transport, data)?;
            if recv_result(&mut self.transport)?.is_ok() {
                return Ok(());
            }
            attempts += 1;
            if attempts > self.max_resends {
                return Err(SessionError::RetriesExhausted { offset, attempts });
            }
            self.logger.chunk_retry(name, offset, attempts);
        }
    }

    pub fn end_export(&mut self) -> SessionResult<()> {
        self.data_header(DataPacket::end(), "end of file").map(|_| ())
    }

    /// Export `source` under `name`
    pub fn export_file(&mut self, name: &str, source: &mut dyn FileSource) -> SessionResult<u64> {
        self.begin_export(name)?;
        let size = source.size();
        let mut offset = 0u64;
        while offset < size {
            let data = source
                .read_range(offset, self.chunk_size as usize)
                .map_err(|e| SessionError::resource(format!("read {}", name), e))?;
            if data.is_empty() {
                break;
            }
            self.write_chunk(name, offset, &data)?;
            offset += data.len() as u64;
        }
        self.end_export()?;
        self.logger.file_done(name, offset);
        Ok(offset)
    }
}
