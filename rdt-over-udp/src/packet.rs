//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, type tag, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for truncated input or an unknown type tag.
//!
//! Pure data transformation; no I/O.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |            Payload ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 9 bytes.
//! The payload has no length field; it is whatever follows the header in the
//! datagram.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 9;

/// Largest datagram either peer will ever send.
pub const MAX_SEGMENT_SIZE: usize = 1400;

/// Largest payload that fits in one segment.
pub const MAX_PAYLOAD: usize = MAX_SEGMENT_SIZE - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_TYPE: usize = 8;

/// One-byte segment type tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    /// Handshake request from the initiator.
    Syn = 0,
    /// Listener's reply to a SYN.
    SynAck = 1,
    /// Acknowledgement; `ack` names the sequence number being acknowledged.
    Ack = 2,
    /// Application payload.
    Data = 3,
    /// Teardown request.
    Close = 4,
}

impl TryFrom<u8> for SegmentType {
    type Error = PacketError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Syn),
            1 => Ok(Self::SynAck),
            2 => Ok(Self::Ack),
            3 => Ok(Self::Data),
            4 => Ok(Self::Close),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYN_ACK",
            Self::Ack => "ACK",
            Self::Data => "DATA",
            Self::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// DATA: identifies this transmission.  Control segments carry 0.
    pub seq: u32,
    /// ACK: the sequence number being acknowledged.
    pub ack: u32,
    pub kind: SegmentType,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A payload-free control segment.
    pub fn control(kind: SegmentType, seq: u32, ack: u32) -> Self {
        Self {
            header: Header { seq, ack, kind },
            payload: Vec::new(),
        }
    }

    /// A DATA segment carrying `payload`.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack: 0,
                kind: SegmentType::Data,
            },
            payload,
        }
    }

    /// Acknowledgement of the DATA segment numbered `seq`.
    pub fn ack_for(seq: u32) -> Self {
        Self::control(SegmentType::Ack, seq, seq)
    }

    pub fn kind(&self) -> SegmentType {
        self.header.kind
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// Fails if the payload would push the datagram past [`MAX_SEGMENT_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_TYPE] = self.header.kind as u8;
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the type tag is not one of the five known types, or
    /// - the datagram is larger than [`MAX_SEGMENT_SIZE`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        if buf.len() > MAX_SEGMENT_SIZE {
            return Err(PacketError::PayloadTooLarge {
                len: buf.len() - HEADER_LEN,
                max: MAX_PAYLOAD,
            });
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let kind = SegmentType::try_from(buf[OFF_TYPE])?;

        Ok(Segment {
            header: Header { seq, ack, kind },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when building or parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// Type byte outside the known set.
    #[error("unknown segment type tag {0}")]
    UnknownType(u8),
    #[error("payload of {len} bytes exceeds the {max}-byte segment capacity")]
    PayloadTooLarge { len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let seg = Segment::data(42, b"hello".to_vec());
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn header_len_constant_is_correct() {
        // seq(4) + ack(4) + type(1) = 9
        assert_eq!(HEADER_LEN, 9);
        assert_eq!(MAX_PAYLOAD, 1391);
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let seg = Segment::control(SegmentType::Ack, 0x0102_0304, 0x0506_0708);
        let bytes = seg.encode().unwrap();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(bytes[OFF_TYPE], 2);
    }

    #[test]
    fn type_tags_match_wire_values() {
        for (tag, kind) in [
            (0u8, SegmentType::Syn),
            (1, SegmentType::SynAck),
            (2, SegmentType::Ack),
            (3, SegmentType::Data),
            (4, SegmentType::Close),
        ] {
            assert_eq!(kind as u8, tag);
            assert_eq!(SegmentType::try_from(tag), Ok(kind));
        }
    }

    #[test]
    fn control_segment_is_header_only() {
        let bytes = Segment::control(SegmentType::Syn, 0, 0).encode().unwrap();
        assert_eq!(bytes, vec![0u8; HEADER_LEN]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_unknown_type_returns_error() {
        let mut bytes = Segment::control(SegmentType::Ack, 1, 1).encode().unwrap();
        bytes[OFF_TYPE] = 9;
        assert_eq!(Segment::decode(&bytes), Err(PacketError::UnknownType(9)));
    }

    #[test]
    fn full_size_payload_is_accepted() {
        let seg = Segment::data(7, vec![0xab; MAX_PAYLOAD]);
        let bytes = seg.encode().unwrap();
        assert_eq!(bytes.len(), MAX_SEGMENT_SIZE);
        assert_eq!(Segment::decode(&bytes).unwrap().payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let seg = Segment::data(0, vec![0; MAX_PAYLOAD + 1]);
        assert_eq!(
            seg.encode(),
            Err(PacketError::PayloadTooLarge {
                len: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
    }

    #[test]
    fn ack_for_echoes_sequence_number() {
        let ack = Segment::ack_for(17);
        assert_eq!(ack.kind(), SegmentType::Ack);
        assert_eq!(ack.header.seq, 17);
        assert_eq!(ack.header.ack, 17);
    }
}
