use thiserror::Error;
use crate::sequence_space::SeqNum;

/// Protocol violations. All of them are fatal to the session that detects them - packet loss,
///  duplicates and reordering are *not* errors but the regular conditions the protocol handles.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ArqError {
    /// The frame can not be decoded, or its kind / length combination is invalid for the side
    ///  that received it
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// An acknowledgment (or END echo) that carries payload
    #[error("corrupt acknowledgment #{wire_seq}: carries {len} bytes of payload")]
    CorruptAck { wire_seq: u32, len: usize },

    /// The peer sent END while there are packets that were not acknowledged
    #[error("premature termination: END #{wire_seq} received while packets {base}..{next_seq_num} are unacknowledged")]
    PrematureTermination { wire_seq: u32, base: SeqNum, next_seq_num: SeqNum },
}
