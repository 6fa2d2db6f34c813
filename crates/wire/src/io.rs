//! Async framing helpers over any `AsyncRead`/`AsyncWrite` transport.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{Message, decode_header, decode_payload, encode};
use crate::{HEADER_LEN, WireError};

/// Reads one full ADB message from the stream.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let mut header_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_bytes).await?;
    let header = decode_header(&header_bytes)?;

    let mut payload = vec![0u8; header.data_len as usize];
    if header.data_len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    decode_payload(&header, payload)
}

/// Writes one full ADB message and flushes the stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), WireError> {
    writer.write_all(&encode(msg)).await?;
    writer.flush().await?;
    Ok(())
}
