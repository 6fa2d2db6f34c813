//! The sync sub-protocol parser for file pulls.
//!
//! Once a `sync:` stream is open, the daemon answers a `RECV` request with
//! a stream of sync packets (`id:4-ASCII ‖ len:u32 LE ‖ payload[len]`)
//! carried inside ordinary `WRTE` frames. Packet boundaries do not align
//! with `WRTE` boundaries, so the parser accumulates a tail buffer and
//! re-splits on every frame.

use crate::SessionError;

/// A parsed sync packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// File content chunk.
    Data(Vec<u8>),
    /// Transfer complete (the packet's length field carries the mtime,
    /// not a payload size).
    Done,
    /// Daemon-side failure; payload is the UTF-8 reason.
    Fail(String),
}

/// Incremental sync packet reassembler.
#[derive(Debug, Default)]
pub struct SyncReader {
    buf: Vec<u8>,
}

impl SyncReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one `WRTE` frame's payload and returns every packet that
    /// completed. Incomplete trailing bytes stay buffered for the next
    /// frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SyncEvent>, SessionError> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        loop {
            if self.buf.len() < 8 {
                break;
            }
            let len = u32::from_le_bytes(self.buf[4..8].try_into().unwrap()) as usize;
            match &self.buf[..4] {
                b"DATA" => {
                    if self.buf.len() < 8 + len {
                        break;
                    }
                    events.push(SyncEvent::Data(self.buf[8..8 + len].to_vec()));
                    self.buf.drain(..8 + len);
                }
                b"DONE" => {
                    events.push(SyncEvent::Done);
                    self.buf.drain(..8);
                }
                b"FAIL" => {
                    if self.buf.len() < 8 + len {
                        break;
                    }
                    let reason = String::from_utf8_lossy(&self.buf[8..8 + len]).into_owned();
                    events.push(SyncEvent::Fail(reason));
                    self.buf.drain(..8 + len);
                }
                id => {
                    return Err(SessionError::Protocol(format!(
                        "unknown sync packet id {:?}",
                        String::from_utf8_lossy(id)
                    )));
                }
            }
        }
        Ok(events)
    }

    /// Bytes still waiting for the rest of their packet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Builds the `RECV` request payload for `path`.
pub fn recv_request(path: &str) -> Vec<u8> {
    let path_bytes = path.as_bytes();
    let mut req = Vec::with_capacity(8 + path_bytes.len());
    req.extend_from_slice(b"RECV");
    req.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
    req.extend_from_slice(path_bytes);
    req
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_packet(payload: &[u8]) -> Vec<u8> {
        let mut p = b"DATA".to_vec();
        p.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn done_packet(mtime: u32) -> Vec<u8> {
        let mut p = b"DONE".to_vec();
        p.extend_from_slice(&mtime.to_le_bytes());
        p
    }

    #[test]
    fn recv_request_layout() {
        let req = recv_request("/sdcard/f.txt");
        assert_eq!(&req[..4], b"RECV");
        assert_eq!(u32::from_le_bytes(req[4..8].try_into().unwrap()), 13);
        assert_eq!(&req[8..], b"/sdcard/f.txt");
    }

    #[test]
    fn whole_packets_in_one_frame() {
        let mut frame = data_packet(b"abc");
        frame.extend_from_slice(&data_packet(b"defgh"));
        frame.extend_from_slice(&done_packet(0));

        let mut reader = SyncReader::new();
        let events = reader.feed(&frame).unwrap();
        assert_eq!(
            events,
            vec![
                SyncEvent::Data(b"abc".to_vec()),
                SyncEvent::Data(b"defgh".to_vec()),
                SyncEvent::Done,
            ]
        );
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn packet_split_across_frames() {
        let packet = data_packet(b"split me");
        let (first, second) = packet.split_at(5);

        let mut reader = SyncReader::new();
        assert!(reader.feed(first).unwrap().is_empty());
        assert!(reader.pending() > 0);

        let events = reader.feed(second).unwrap();
        assert_eq!(events, vec![SyncEvent::Data(b"split me".to_vec())]);
    }

    #[test]
    fn header_split_across_frames() {
        let packet = data_packet(b"xyz");
        // Cut inside the 8-byte packet header.
        let (first, second) = packet.split_at(3);

        let mut reader = SyncReader::new();
        assert!(reader.feed(first).unwrap().is_empty());
        let events = reader.feed(second).unwrap();
        assert_eq!(events, vec![SyncEvent::Data(b"xyz".to_vec())]);
    }

    #[test]
    fn done_length_field_is_not_a_payload() {
        // DONE carries the file mtime in the length slot; bytes after it
        // belong to the next packet, not to DONE.
        let mut frame = done_packet(0x5F00_0000);
        frame.extend_from_slice(&data_packet(b"tail"));

        let mut reader = SyncReader::new();
        let events = reader.feed(&frame).unwrap();
        assert_eq!(events, vec![SyncEvent::Done, SyncEvent::Data(b"tail".to_vec())]);
    }

    #[test]
    fn fail_carries_reason() {
        let mut p = b"FAIL".to_vec();
        p.extend_from_slice(&21u32.to_le_bytes());
        p.extend_from_slice(b"open failed: ENOENT x");

        let mut reader = SyncReader::new();
        let events = reader.feed(&p).unwrap();
        assert_eq!(
            events,
            vec![SyncEvent::Fail("open failed: ENOENT x".into())]
        );
    }

    #[test]
    fn unknown_id_is_protocol_error() {
        let mut p = b"SEND".to_vec();
        p.extend_from_slice(&0u32.to_le_bytes());

        let mut reader = SyncReader::new();
        let err = reader.feed(&p).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }
}
