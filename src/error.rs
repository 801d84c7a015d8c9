//! Session error taxonomy
//!
//! Only [`SessionError::ChunkChecksum`] is recoverable: the receiver answers
//! ERROR and the peer resends. Everything else ends the session.

use std::io;

/// Why a received packet was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("packet checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
    #[error("bad packet magic {0:#010x}")]
    Magic(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Packet failed its own checksum or magic check; framing can't be trusted anymore.
    #[error("frame integrity: {0}")]
    FrameIntegrity(#[from] IntegrityError),

    #[error("chunk checksum mismatch at offset {offset}: want {expected:#010x}, got {actual:#010x}")]
    ChunkChecksum {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("chunk at offset {offset} still corrupt after {attempts} attempts")]
    RetriesExhausted { offset: u64, attempts: u32 },

    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    pub fn desync(msg: impl Into<String>) -> Self {
        Self::ProtocolDesync(msg.into())
    }

    pub fn resource(context: impl Into<String>, source: io::Error) -> Self {
        Self::Resource {
            context: context.into(),
            source,
        }
    }

    /// True for errors the chunk engine handles by asking for a resend
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ChunkChecksum { .. })
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
