use std::fmt;

use crate::{HEADER_LEN, MAX_PAYLOAD, WireError};

/// The ADB command set accepted by this client.
///
/// Values are the ASCII tetragraphs read as little-endian u32
/// (`"CNXN"` = `0x4E58_4E43`, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Cnxn = 0x4E58_4E43,
    Auth = 0x4854_5541,
    Stls = 0x534C_5453,
    Open = 0x4E45_504F,
    Okay = 0x5941_4B4F,
    Wrte = 0x4554_5257,
    Clse = 0x4553_4C43,
}

impl Command {
    /// Maps a raw command word to the known set.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0x4E58_4E43 => Some(Command::Cnxn),
            0x4854_5541 => Some(Command::Auth),
            0x534C_5453 => Some(Command::Stls),
            0x4E45_504F => Some(Command::Open),
            0x5941_4B4F => Some(Command::Okay),
            0x4554_5257 => Some(Command::Wrte),
            0x4553_4C43 => Some(Command::Clse),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = (*self as u32).to_le_bytes();
        // The tetragraphs are ASCII by construction.
        write!(f, "{}", std::str::from_utf8(&bytes).unwrap_or("????"))
    }
}

/// A decoded 24-byte ADB header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_len: u32,
    pub data_crc32: u32,
}

/// A full ADB message: header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload,
        }
    }

    /// Message with an empty payload.
    pub fn empty(command: Command, arg0: u32, arg1: u32) -> Self {
        Self::new(command, arg0, arg1, Vec::new())
    }

    /// `OPEN(local_id, 0, "<service>\0")`.
    pub fn open(local_id: u32, service: &str) -> Self {
        let mut payload = service.as_bytes().to_vec();
        payload.push(0);
        Self::new(Command::Open, local_id, 0, payload)
    }

    /// `OKAY(local_id, remote_id)`.
    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::empty(Command::Okay, local_id, remote_id)
    }

    /// `CLSE(local_id, remote_id)`.
    pub fn clse(local_id: u32, remote_id: u32) -> Self {
        Self::empty(Command::Clse, local_id, remote_id)
    }

    /// `WRTE(local_id, remote_id, data)`.
    pub fn wrte(local_id: u32, remote_id: u32, data: Vec<u8>) -> Self {
        Self::new(Command::Wrte, local_id, remote_id, data)
    }
}

/// The historical ADB payload checksum: byte-sum mod 2^32.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

/// Serializes a message into header + payload bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    let command = msg.command as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + msg.payload.len());
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&msg.arg0.to_le_bytes());
    out.extend_from_slice(&msg.arg1.to_le_bytes());
    out.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(&msg.payload).to_le_bytes());
    out.extend_from_slice(&(command ^ 0xFFFF_FFFF).to_le_bytes());
    out.extend_from_slice(&msg.payload);
    out
}

/// Decodes and validates a 24-byte header.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<Header, WireError> {
    let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());

    let raw_command = word(0);
    let magic = word(5);
    if raw_command ^ magic != 0xFFFF_FFFF {
        return Err(WireError::BadMessage(format!(
            "magic mismatch: command={raw_command:#010x} magic={magic:#010x}"
        )));
    }

    let command = Command::from_u32(raw_command).ok_or_else(|| {
        WireError::BadMessage(format!("unknown command {raw_command:#010x}"))
    })?;

    let data_len = word(3);
    if data_len as usize > MAX_PAYLOAD {
        return Err(WireError::BadMessage(format!(
            "payload length {data_len} exceeds max {MAX_PAYLOAD}"
        )));
    }

    Ok(Header {
        command,
        arg0: word(1),
        arg1: word(2),
        data_len,
        data_crc32: word(4),
    })
}

/// Validates a payload against its header and assembles the message.
pub fn decode_payload(header: &Header, payload: Vec<u8>) -> Result<Message, WireError> {
    if payload.len() != header.data_len as usize {
        return Err(WireError::BadMessage(format!(
            "payload length {} does not match header data_len {}",
            payload.len(),
            header.data_len
        )));
    }
    if header.data_len > 0 {
        let sum = checksum(&payload);
        if sum != header.data_crc32 {
            return Err(WireError::BadMessage(format!(
                "checksum mismatch: computed {sum:#010x}, header {:#010x}",
                header.data_crc32
            )));
        }
    }
    Ok(Message {
        command: header.command,
        arg0: header.arg0,
        arg1: header.arg1,
        payload,
    })
}
