//! Packet codec and export path handling shared by the controller and the peer driver
//!
//! Every packet is the same 24-byte layout. The wire carries no type tag, so
//! the three packet kinds are typed views chosen by whoever reads next:
//! [`CommandPacket`], [`ResultPacket`] and [`DataPacket`].

use crate::checksum::crc32c;
use crate::error::{IntegrityError, SessionError, SessionResult};
use crate::protocol::{cmd, result, CHECKSUMMED_LEN, MAGIC, PACKET_SIZE};

/// Raw packet: magic, four argument words, checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub magic: u32,
    pub arg2: u32,
    pub arg3: u32,
    pub arg4: u32,
    pub arg5: u32,
    pub crc32c: u32,
}

impl Packet {
    /// Build a packet with the protocol magic and a correct checksum
    pub fn sealed(arg2: u32, arg3: u32, arg4: u32, arg5: u32) -> Self {
        let mut packet = Self {
            magic: MAGIC,
            arg2,
            arg3,
            arg4,
            arg5,
            crc32c: 0,
        };
        packet.seal();
        packet
    }

    /// Recompute and store the checksum
    pub fn seal(&mut self) {
        self.crc32c = self.compute_checksum();
    }

    /// CRC32C over the first 20 encoded bytes
    pub fn compute_checksum(&self) -> u32 {
        crc32c(&self.encode()[..CHECKSUMMED_LEN])
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        let words = [
            self.magic,
            self.arg2,
            self.arg3,
            self.arg4,
            self.arg5,
            self.crc32c,
        ];
        for (slot, word) in buf.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Inverse of [`Packet::encode`]; performs no validation
    pub fn decode(buf: &[u8; PACKET_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            magic: word(0),
            arg2: word(4),
            arg3: word(8),
            arg4: word(12),
            arg5: word(16),
            crc32c: word(20),
        }
    }

    /// Checksum first, then magic
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let computed = self.compute_checksum();
        if computed != self.crc32c {
            return Err(IntegrityError::Checksum {
                stored: self.crc32c,
                computed,
            });
        }
        if self.magic != MAGIC {
            return Err(IntegrityError::Magic(self.magic));
        }
        Ok(())
    }
}

/// Which side of the shared command code a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Push,
    Export,
}

/// Decoded command, given the session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Open { index: u32 },
    Export { name_len: u32 },
    Unknown(u32),
}

/// Command request: `arg2` = command, `arg3`/`arg4` = arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPacket(Packet);

impl CommandPacket {
    pub fn build(cmd: u32, arg3: u32, arg4: u32) -> Self {
        Self(Packet::sealed(cmd, arg3, arg4, 0))
    }

    pub fn code(&self) -> u32 {
        self.0.arg2
    }

    pub fn arg3(&self) -> u32 {
        self.0.arg3
    }

    pub fn arg4(&self) -> u32 {
        self.0.arg4
    }

    pub fn command(&self, mode: Mode) -> Command {
        match (self.code(), mode) {
            (cmd::QUIT, _) => Command::Quit,
            (cmd::OPEN, Mode::Push) => Command::Open { index: self.arg3() },
            (cmd::EXPORT, Mode::Export) => Command::Export {
                name_len: self.arg3(),
            },
            (other, _) => Command::Unknown(other),
        }
    }

    pub fn packet(&self) -> &Packet {
        &self.0
    }
}

impl From<Packet> for CommandPacket {
    fn from(p: Packet) -> Self {
        Self(p)
    }
}

/// Status reply: `arg2` = result code, `arg3`/`arg4` = payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultPacket(Packet);

impl ResultPacket {
    pub fn build(code: u32, arg3: u32, arg4: u32) -> Self {
        Self(Packet::sealed(code, arg3, arg4, 0))
    }

    pub fn ok() -> Self {
        Self::build(result::OK, 0, 0)
    }

    pub fn error() -> Self {
        Self::build(result::ERROR, 0, 0)
    }

    pub fn code(&self) -> u32 {
        self.0.arg2
    }

    pub fn is_ok(&self) -> bool {
        self.code() == result::OK
    }

    pub fn arg3(&self) -> u32 {
        self.0.arg3
    }

    pub fn arg4(&self) -> u32 {
        self.0.arg4
    }

    /// A frame-valid reply that still has to say OK
    pub fn expect_ok(self, what: &str) -> SessionResult<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(SessionError::desync(format!(
                "{} answered with result code {}",
                what,
                self.code()
            )))
        }
    }

    pub fn packet(&self) -> &Packet {
        &self.0
    }
}

impl From<Packet> for ResultPacket {
    fn from(p: Packet) -> Self {
        Self(p)
    }
}

/// Data-chunk header: 64-bit offset split high/low, length, payload checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket(Packet);

impl DataPacket {
    pub fn build(offset: u64, len: u32, crc: u32) -> Self {
        Self(Packet::sealed((offset >> 32) as u32, offset as u32, len, crc))
    }

    /// Offset 0, length 0: no more chunks for this file
    pub fn end() -> Self {
        Self::build(0, 0, 0)
    }

    pub fn offset(&self) -> u64 {
        ((self.0.arg2 as u64) << 32) | self.0.arg3 as u64
    }

    pub fn len(&self) -> u32 {
        self.0.arg4
    }

    pub fn crc32c(&self) -> u32 {
        self.0.arg5
    }

    pub fn is_end(&self) -> bool {
        self.offset() == 0 && self.len() == 0
    }

    pub fn packet(&self) -> &Packet {
        &self.0
    }
}

impl From<Packet> for DataPacket {
    fn from(p: Packet) -> Self {
        Self(p)
    }
}

/// Pack a file size and flags into an OPEN reply's third and fourth words
pub fn pack_file_info(size: u64, flags: u16) -> (u32, u32) {
    let msb = ((size >> 32) & 0xFFFF) as u32 | ((flags as u32) << 16);
    (msb, size as u32)
}

/// Inverse of [`pack_file_info`]
pub fn unpack_file_info(arg3: u32, arg4: u32) -> (u64, u16) {
    let size = (((arg3 & 0xFFFF) as u64) << 32) | arg4 as u64;
    (size, (arg3 >> 16) as u16)
}

/// Make one path segment safe to create on disk.
/// Empty, "." and ".." are rejected; reserved characters become '_'.
pub fn sanitize_segment(segment: &str) -> Option<String> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return None;
    }
    Some(
        segment
            .chars()
            .map(|c| match c {
                '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect(),
    )
}

/// Split an exported name into sanitized directory segments and a file name.
/// Unusable directory segments are dropped; an unusable file name is an error.
pub fn split_export_name(name: &str) -> SessionResult<(Vec<String>, String)> {
    if name.contains('\0') {
        return Err(SessionError::resource(
            format!("invalid file name {:?}", name),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "name contains NUL byte"),
        ));
    }

    let mut parts: Vec<&str> = name.split('/').collect();
    let last = parts.pop().unwrap_or_default();
    let dirs = parts.into_iter().filter_map(sanitize_segment).collect();

    match sanitize_segment(last) {
        Some(file) => Ok((dirs, file)),
        None => Err(SessionError::resource(
            format!("invalid file name {:?}", name),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty or relative file name"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip() {
        let packet = Packet {
            magic: MAGIC,
            arg2: 1,
            arg3: 0xFFFF_FFFF,
            arg4: 0x0102_0304,
            arg5: 42,
            crc32c: 0xDEAD_BEEF,
        };
        let bytes = packet.encode();
        assert_eq!(&bytes[0..4], &[0x30, 0x48, 0x50, 0x53]);
        assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(Packet::decode(&bytes), packet);
    }

    #[test]
    fn test_sealed_packet_verifies() {
        let packet = Packet::sealed(7, 8, 9, 10);
        assert_eq!(packet.verify(), Ok(()));
        let decoded = Packet::decode(&packet.encode());
        assert_eq!(decoded.verify(), Ok(()));
    }

    #[test]
    fn test_any_bit_flip_fails_verification() {
        let bytes = Packet::sealed(1, 2, 3, 4).encode();
        for byte in 0..CHECKSUMMED_LEN {
            for bit in 0..8 {
                let mut corrupt = bytes;
                corrupt[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        Packet::decode(&corrupt).verify(),
                        Err(IntegrityError::Checksum { .. })
                    ),
                    "byte {} bit {}",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_bad_magic_reported_after_checksum() {
        let mut packet = Packet::sealed(0, 0, 0, 0);
        packet.magic = 0x1234_5678;
        assert!(matches!(packet.verify(), Err(IntegrityError::Checksum { .. })));

        packet.seal();
        assert_eq!(packet.verify(), Err(IntegrityError::Magic(0x1234_5678)));
    }

    #[test]
    fn test_data_packet_offset_split() {
        let offset = 0x0000_0012_3456_7890u64;
        let data = DataPacket::build(offset, 4096, 0xABCD);
        assert_eq!(data.packet().arg2, 0x12);
        assert_eq!(data.packet().arg3, 0x3456_7890);
        assert_eq!(data.offset(), offset);
        assert_eq!(data.len(), 4096);
        assert_eq!(data.crc32c(), 0xABCD);
        assert!(!data.is_end());
        assert!(DataPacket::end().is_end());
        // Zero length at a real offset is not the sentinel
        assert!(!DataPacket::build(65536, 0, 0).is_end());
        assert!(!DataPacket::build(0, 1, 0).is_end());
    }

    #[test]
    fn test_command_depends_on_mode() {
        let open = CommandPacket::build(cmd::OPEN, 3, 0);
        assert_eq!(open.command(Mode::Push), Command::Open { index: 3 });
        assert_eq!(open.command(Mode::Export), Command::Export { name_len: 3 });
        assert_eq!(
            CommandPacket::build(cmd::QUIT, 0, 0).command(Mode::Export),
            Command::Quit
        );
        assert_eq!(
            CommandPacket::build(9, 0, 0).command(Mode::Push),
            Command::Unknown(9)
        );
    }

    #[test]
    fn test_result_expect_ok() {
        assert!(ResultPacket::ok().expect_ok("open").is_ok());
        let err = ResultPacket::error().expect_ok("open").unwrap_err();
        assert!(matches!(err, SessionError::ProtocolDesync(_)));
    }

    #[test]
    fn test_file_info_packing() {
        let size = 0x0000_ABCD_1234_5678u64;
        let (arg3, arg4) = pack_file_info(size, crate::protocol::flags::STREAM);
        assert_eq!(arg3, 0x0001_ABCD);
        assert_eq!(arg4, 0x1234_5678);
        assert_eq!(unpack_file_info(arg3, arg4), (size, crate::protocol::flags::STREAM));
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment(""), None);
        assert_eq!(sanitize_segment("."), None);
        assert_eq!(sanitize_segment(".."), None);
        assert_eq!(sanitize_segment("save.bin").as_deref(), Some("save.bin"));
        assert_eq!(
            sanitize_segment(r#"a\b:c*d?e"f<g>h|i"#).as_deref(),
            Some("a_b_c_d_e_f_g_h_i")
        );
    }

    #[test]
    fn test_split_export_name() {
        let (dirs, file) = split_export_name("/saves/../Game: One/./slot1.bin").unwrap();
        assert_eq!(dirs, vec!["saves".to_string(), "Game_ One".to_string()]);
        assert_eq!(file, "slot1.bin");

        assert!(split_export_name("dir/").is_err());
        assert!(split_export_name("dir/..").is_err());
        assert!(split_export_name("bad\0name").is_err());
    }
}
