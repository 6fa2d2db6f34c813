//! ADB wire message codec.
//!
//! # Wire format
//!
//! ```text
//! HEADER (24 bytes, all fields u32 little-endian):
//!   [command] [arg0] [arg1] [data_len] [data_crc32] [magic]
//! PAYLOAD: [data_len bytes]
//!
//! magic       = command XOR 0xFFFFFFFF
//! data_crc32  = byte-sum of the payload mod 2^32
//! ```
//!
//! `data_crc32` is not a CRC-32 in the mathematical sense; it is the
//! historical ADB checksum (a plain byte sum). The field name is kept for
//! compatibility with the daemon's framing.

pub mod codec;
pub mod io;

pub use codec::{Command, Header, Message, checksum, decode_header, decode_payload, encode};
pub use io::{read_message, write_message};

/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad message: {0}")]
    BadMessage(String),
}

/// Header length in bytes.
pub const HEADER_LEN: usize = 24;

/// Largest payload either side may send (1 MiB, matching the `max_payload`
/// advertised in `CNXN`).
pub const MAX_PAYLOAD: usize = 0x10_0000;
