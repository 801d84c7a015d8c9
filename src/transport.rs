//! Byte transport the protocol runs over, plus packet I/O helpers
//!
//! The link is a reliable duplex byte channel with bounded reads. A read may
//! return fewer bytes than asked for; [`read_exact`] loops until it has them.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::{SessionError, SessionResult};
use crate::protocol::PACKET_SIZE;
use crate::protocol_core::{CommandPacket, DataPacket, Packet, ResultPacket};
use crate::url::Endpoint;

pub trait Transport {
    /// Read at most `max_bytes`; an empty read means the link is gone.
    fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>>;

    /// Write every byte of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        (**self).read(max_bytes)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

/// Adapts any blocking byte stream (TCP socket, serial port, pipe pair)
pub struct StreamTransport<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: vec![0u8; 64 * 1024],
        }
    }

}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        if self.buf.len() < max_bytes {
            self.buf.resize(max_bytes.min(crate::protocol::MAX_CHUNK_SIZE as usize), 0);
        }
        let want = max_bytes.min(self.buf.len());
        loop {
            match self.stream.read(&mut self.buf[..want]) {
                Ok(n) => return Ok(self.buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }
}

/// Read exactly `n` bytes, failing on a short or empty transfer
pub fn read_exact<T: Transport + ?Sized>(t: &mut T, n: usize) -> SessionResult<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let got = t.read(n - out.len()).map_err(SessionError::Transport)?;
        if got.is_empty() {
            return Err(SessionError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("link closed after {} of {} bytes", out.len(), n),
            )));
        }
        if got.len() > n - out.len() {
            return Err(SessionError::Transport(io::Error::new(
                io::ErrorKind::InvalidData,
                "transport returned more bytes than requested",
            )));
        }
        out.extend_from_slice(&got);
    }
    Ok(out)
}

pub fn write_all<T: Transport + ?Sized>(t: &mut T, bytes: &[u8]) -> SessionResult<()> {
    t.write(bytes).map_err(SessionError::Transport)
}

/// Read one packet and check its checksum and magic
pub fn recv_packet<T: Transport + ?Sized>(t: &mut T) -> SessionResult<Packet> {
    let bytes = read_exact(t, PACKET_SIZE)?;
    let mut raw = [0u8; PACKET_SIZE];
    raw.copy_from_slice(&bytes);
    let packet = Packet::decode(&raw);
    packet.verify()?;
    Ok(packet)
}

pub fn send_packet<T: Transport + ?Sized>(t: &mut T, packet: &Packet) -> SessionResult<()> {
    write_all(t, &packet.encode())
}

pub fn recv_command<T: Transport + ?Sized>(t: &mut T) -> SessionResult<CommandPacket> {
    recv_packet(t).map(CommandPacket::from)
}

pub fn recv_result<T: Transport + ?Sized>(t: &mut T) -> SessionResult<ResultPacket> {
    recv_packet(t).map(ResultPacket::from)
}

pub fn recv_data_header<T: Transport + ?Sized>(t: &mut T) -> SessionResult<DataPacket> {
    recv_packet(t).map(DataPacket::from)
}

pub fn send_result<T: Transport + ?Sized>(t: &mut T, reply: ResultPacket) -> SessionResult<()> {
    send_packet(t, reply.packet())
}

// Socket tuning: small request/response packets, so disable Nagle
fn tune_socket(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(())
}

/// Connect to, or wait for, the other end of the link
pub fn open_endpoint(endpoint: &Endpoint, timeout: Option<Duration>) -> Result<StreamTransport<TcpStream>> {
    let stream = match endpoint {
        Endpoint::Connect { host, port } => TcpStream::connect((host.as_str(), *port))
            .with_context(|| format!("failed to connect to {}:{}", host, port))?,
        Endpoint::Listen { bind } => {
            let listener =
                TcpListener::bind(bind).with_context(|| format!("failed to bind {}", bind))?;
            let (stream, _) = listener
                .accept()
                .with_context(|| format!("failed to accept on {}", bind))?;
            stream
        }
    };
    tune_socket(&stream, timeout).context("failed to configure socket")?;
    Ok(StreamTransport::new(stream))
}

/// In-memory transport for tests: reads from a scripted byte stream,
/// records everything written.
#[cfg(test)]
pub(crate) mod script {
    use super::*;
    use std::io::Cursor;

    pub struct Scripted {
        input: Cursor<Vec<u8>>,
        pub output: Vec<u8>,
        /// Largest single read handed back, to exercise short reads
        pub max_read: usize,
    }

    impl Scripted {
        pub fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
                max_read: usize::MAX,
            }
        }

        /// Bytes of the script not consumed yet
        pub fn unread(&self) -> usize {
            self.input.get_ref().len() - self.input.position() as usize
        }

        /// Split the recorded output into packets. Only meaningful when no
        /// raw payload was written.
        pub fn packets(&self) -> Vec<Packet> {
            self.output
                .chunks_exact(PACKET_SIZE)
                .map(|c| {
                    let mut raw = [0u8; PACKET_SIZE];
                    raw.copy_from_slice(c);
                    Packet::decode(&raw)
                })
                .collect()
        }
    }

    impl Transport for Scripted {
        fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
            let mut buf = vec![0u8; max_bytes.min(self.max_read)];
            let n = Read::read(&mut self.input, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }
    }

    /// Builder for the peer's side of a conversation
    #[derive(Default)]
    pub struct PeerScript {
        bytes: Vec<u8>,
    }

    impl PeerScript {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn command(mut self, code: u32, arg3: u32) -> Self {
            self.bytes
                .extend_from_slice(&CommandPacket::build(code, arg3, 0).packet().encode());
            self
        }

        pub fn data_header(mut self, offset: u64, len: u32, crc: u32) -> Self {
            self.bytes
                .extend_from_slice(&DataPacket::build(offset, len, crc).packet().encode());
            self
        }

        pub fn chunk(self, offset: u64, payload: &[u8]) -> Self {
            let crc = crate::checksum::crc32c(payload);
            self.data_header(offset, payload.len() as u32, crc).raw(payload)
        }

        pub fn end(self) -> Self {
            self.data_header(0, 0, 0)
        }

        pub fn result(mut self, reply: ResultPacket) -> Self {
            self.bytes.extend_from_slice(&reply.packet().encode());
            self
        }

        pub fn raw(mut self, bytes: &[u8]) -> Self {
            self.bytes.extend_from_slice(bytes);
            self
        }

        pub fn build(self) -> Scripted {
            Scripted::new(self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::script::*;
    use super::*;
    use crate::error::IntegrityError;
    use crate::protocol::cmd;

    #[test]
    fn test_read_exact_handles_short_reads() {
        let mut t = Scripted::new((0..100u8).collect());
        t.max_read = 7;
        let got = read_exact(&mut t, 100).unwrap();
        assert_eq!(got, (0..100u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_exact_eof_is_transport_error() {
        let mut t = Scripted::new(vec![1, 2, 3]);
        let err = read_exact(&mut t, 10).unwrap_err();
        match err {
            SessionError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_recv_packet_rejects_corruption() {
        let mut bytes = CommandPacket::build(cmd::OPEN, 1, 0).packet().encode().to_vec();
        bytes[8] ^= 0x01;
        let mut t = Scripted::new(bytes);
        let err = recv_command(&mut t).unwrap_err();
        assert!(matches!(
            err,
            SessionError::FrameIntegrity(IntegrityError::Checksum { .. })
        ));
    }

    #[test]
    fn test_stream_transport_over_cursor_pair() {
        struct Duplex {
            input: std::io::Cursor<Vec<u8>>,
            output: Vec<u8>,
        }
        impl Read for Duplex {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }
        impl Write for Duplex {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let reply = ResultPacket::build(0, 5, 6);
        let mut duplex = Duplex {
            input: std::io::Cursor::new(reply.packet().encode().to_vec()),
            output: Vec::new(),
        };
        let mut t = StreamTransport::new(&mut duplex);
        let got = recv_result(&mut t).unwrap();
        assert_eq!(got, reply);

        send_result(&mut t, ResultPacket::ok()).unwrap();
        drop(t);
        assert_eq!(duplex.output, ResultPacket::ok().packet().encode().to_vec());
    }
}
