//! Pairing record framing.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::PairingError;

/// Protocol version carried in every record header.
pub const PAIRING_VERSION: u8 = 1;

/// Largest payload either side may send.
pub const MAX_PAIRING_PAYLOAD: usize = 16384;

/// Header length: version + type + u32 length.
pub const PAIRING_HEADER_LEN: usize = 6;

/// Record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Spake2Msg = 0,
    PeerInfo = 1,
}

impl PacketKind {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PacketKind::Spake2Msg),
            1 => Some(PacketKind::PeerInfo),
            _ => None,
        }
    }
}

/// Writes one pairing record and flushes.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: PacketKind,
    payload: &[u8],
) -> Result<(), PairingError> {
    if payload.len() > MAX_PAIRING_PAYLOAD {
        return Err(PairingError::Protocol(format!(
            "payload of {} bytes exceeds pairing max {MAX_PAIRING_PAYLOAD}",
            payload.len()
        )));
    }

    let mut header = [0u8; PAIRING_HEADER_LEN];
    header[0] = PAIRING_VERSION;
    header[1] = kind as u8;
    header[2..6].copy_from_slice(&(payload.len() as u32).to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one pairing record, validating version, type, and length.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(PacketKind, Vec<u8>), PairingError> {
    let mut header = [0u8; PAIRING_HEADER_LEN];
    reader.read_exact(&mut header).await?;

    if header[0] != PAIRING_VERSION {
        return Err(PairingError::Protocol(format!(
            "unsupported pairing version {}",
            header[0]
        )));
    }
    let kind = PacketKind::from_u8(header[1])
        .ok_or_else(|| PairingError::Protocol(format!("unknown pairing record type {}", header[1])))?;

    let len = u32::from_be_bytes(header[2..6].try_into().unwrap()) as usize;
    if len > MAX_PAIRING_PAYLOAD {
        return Err(PairingError::Protocol(format!(
            "pairing record of {len} bytes exceeds max {MAX_PAIRING_PAYLOAD}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((kind, payload))
}
