//! sphxfer library
//!
//! Packet-framed file transfer between a controller and a peer device over a
//! byte stream: push a queue of files to the peer, or accept files it exports.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod coverage;
pub mod error;
pub mod files;
pub mod fs_enum;
pub mod log;
pub mod logger;
pub mod peer;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod session;
pub mod throughput;
pub mod transfer;
pub mod transport;
pub mod url;
