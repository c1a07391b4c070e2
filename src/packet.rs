use std::fmt::{Debug, Formatter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::ArqError;

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketKind {
    Ack = 0,
    Data = 1,
    End = 2,
}

/// A single protocol frame. Packets are immutable values; the sender keeps the very same
///  instance in its window cache for retransmission.
///
/// ```ascii
/// 0:  kind (u32 BE) - 0 = ACK, 1 = DATA, 2 = END
/// 4:  wire sequence number (u32 BE), in [0, modulus)
/// 8:  payload length (u32 BE), at most 496
/// 12: payload
/// *:  zero padding up to 512 bytes
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub wire_seq: u32,
    pub payload: Bytes,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PacketKind::Ack => write!(f, "ACK#{}", self.wire_seq),
            PacketKind::Data => write!(f, "DATA#{}[{}]", self.wire_seq, self.payload.len()),
            PacketKind::End => write!(f, "END#{}", self.wire_seq),
        }
    }
}

impl Packet {
    pub const FRAME_LEN: usize = 512;
    pub const HEADER_LEN: usize = 3 * size_of::<u32>();
    /// NB: This leaves four bytes of the frame unused, even for a full packet
    pub const MAX_PAYLOAD_LEN: usize = 496;

    pub fn data(wire_seq: u32, payload: Bytes) -> Packet {
        debug_assert!(!payload.is_empty(), "DATA packets must carry payload");
        debug_assert!(payload.len() <= Self::MAX_PAYLOAD_LEN);

        Packet {
            kind: PacketKind::Data,
            wire_seq,
            payload,
        }
    }

    pub fn ack(wire_seq: u32) -> Packet {
        Packet {
            kind: PacketKind::Ack,
            wire_seq,
            payload: Bytes::new(),
        }
    }

    pub fn end(wire_seq: u32) -> Packet {
        Packet {
            kind: PacketKind::End,
            wire_seq,
            payload: Bytes::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Writes the full frame: header, exactly `len()` bytes of payload, and zero padding
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.kind.into());
        buf.put_u32(self.wire_seq);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.put_bytes(0, (Self::FRAME_LEN - Self::HEADER_LEN).saturating_sub(self.payload.len()));
    }

    pub fn to_frame(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::FRAME_LEN);
        self.ser(&mut buf);
        buf
    }

    /// Reads a frame, honoring the encoded length. Trailing bytes after the payload are padding
    ///  and ignored, so this accepts frames that were truncated after their payload.
    pub fn deser(buf: &mut impl Buf) -> Result<Packet, ArqError> {
        if buf.remaining() < Self::HEADER_LEN {
            return Err(ArqError::MalformedPacket(format!("frame of {} bytes is shorter than the header", buf.remaining())));
        }

        let raw_kind = buf.get_u32();
        let kind = PacketKind::try_from(raw_kind)
            .map_err(|_| ArqError::MalformedPacket(format!("undefined packet kind {}", raw_kind)))?;
        let wire_seq = buf.get_u32();

        let len = buf.get_i32();
        if len < 0 || len as usize > Self::MAX_PAYLOAD_LEN {
            return Err(ArqError::MalformedPacket(format!("invalid payload length {}", len)));
        }
        let len = len as usize;
        if buf.remaining() < len {
            return Err(ArqError::MalformedPacket(format!("payload length {} exceeds the remaining {} bytes of the frame", len, buf.remaining())));
        }

        Ok(Packet {
            kind,
            wire_seq,
            payload: buf.copy_to_bytes(len),
        })
    }
}
