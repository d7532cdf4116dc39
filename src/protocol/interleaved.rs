//! Interleaved RTP/RTCP framing (RFC 2326 §10.12)
//!
//! When a client negotiates `RTP/AVP/TCP`, media frames travel on the
//! control connection prefixed with a 4-byte header:
//!
//! ```text
//! '$' <channel u8> <length u16 big-endian> <payload>
//! ```
//!
//! Channel numbers come from the `interleaved=` pair of the SETUP exchange;
//! by convention track N uses channels 2N (RTP) and 2N+1 (RTCP).

use bytes::{BufMut, Bytes, BytesMut};

/// Leading byte distinguishing an interleaved frame from an RTSP request.
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Size of the framing header.
pub const HEADER_LEN: usize = 4;

/// One interleaved frame. `payload` is reference-counted, so cloning a
/// frame for fan-out never copies media bytes.
#[derive(Debug, Clone)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

impl InterleavedFrame {
    pub fn new(channel: u8, payload: Bytes) -> Self {
        InterleavedFrame { channel, payload }
    }

    /// Serialize header + payload into a single buffer for the writer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(INTERLEAVED_MAGIC);
        buf.put_u8(self.channel);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Parse the 3 bytes following the magic: channel and payload length.
pub fn parse_header(rest: [u8; 3]) -> (u8, usize) {
    let channel = rest[0];
    let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
    (channel, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let frame = InterleavedFrame::new(2, Bytes::from_static(&[0x80, 0x60, 0x00, 0x01]));
        let out = frame.encode();
        assert_eq!(&out[..4], &[b'$', 2, 0, 4]);
        assert_eq!(&out[4..], &[0x80, 0x60, 0x00, 0x01]);
    }

    #[test]
    fn test_parse_header() {
        let (channel, len) = parse_header([3, 0x01, 0x02]);
        assert_eq!(channel, 3);
        assert_eq!(len, 0x0102);
    }

    #[test]
    fn test_round_trip() {
        let frame = InterleavedFrame::new(1, Bytes::from_static(b"rtcp-payload"));
        let wire = frame.encode();
        assert_eq!(wire[0], INTERLEAVED_MAGIC);
        let (channel, len) = parse_header([wire[1], wire[2], wire[3]]);
        assert_eq!(channel, 1);
        assert_eq!(&wire[HEADER_LEN..HEADER_LEN + len], b"rtcp-payload");
    }
}
