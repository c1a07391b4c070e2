//! Reliable, in-order delivery of a byte stream over a lossy datagram link, using the Go-Back-N
//!  ARQ protocol.
//!
//! A session has two roles. The [sender::Sender] cuts a [byte_stream::ByteSource] into DATA
//!  packets and keeps up to `window_size` of them in flight, resending all unacknowledged
//!  packets whenever the single retransmission timer expires. The [receiver::Receiver] accepts
//!  only the next packet in sequence, writes it to a [byte_stream::ByteSink] and answers with a
//!  cumulative ACK. An END packet that the receiver echoes back terminates the session.
//!
//! Every packet is a fixed-size frame of 512 bytes:
//!
//! ```ascii
//! 0:  kind (u32 BE) - 0 = ACK, 1 = DATA, 2 = END
//! 4:  sequence number modulo M (u32 BE)
//! 8:  payload length (u32 BE)
//! 12: payload, zero padded to the end of the frame
//! ```
//!
//! Sequence numbers are unbounded counters internally; see [sequence_space] for how the wire
//!  numbers are mapped back.

pub mod byte_stream;
pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod send_window;
pub mod sender;
pub mod sequence_log;
pub mod sequence_space;
pub mod test_util;
pub mod timer;
pub mod transport;
