//! Mapping between logical sequence numbers and the sequence numbers that go on the wire.
//!
//! Both sides count packets with an unbounded logical counter starting at 0, but only the
//!  counter modulo `M` is transmitted. Since at most one window of packets is in flight, a
//!  wire number together with a reference point close to the window has exactly one consistent
//!  logical value: the one in `[reference - window_size, reference - window_size + M)`. This
//!  interval contains all logical numbers within `window_size` of the reference as long as
//!  `M >= 2 * window_size`.

use std::fmt::{Display, Formatter};
use std::ops::Add;
use crate::config::ArqConfig;

/// A logical (i.e. unwrapped) sequence number. These are never transmitted directly.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SeqNum(u64);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u64) -> Self::Output {
        SeqNum(self.0 + rhs)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> SeqNum {
        SeqNum(self.0 + 1)
    }

    pub fn checked_minus(&self, other: u64) -> Option<SeqNum> {
        self.0.checked_sub(other).map(SeqNum)
    }

    /// number of sequence numbers from `lower` (incl) to `self` (excl), zero if `lower` is
    ///  not below `self`
    pub fn distance_from(&self, lower: SeqNum) -> u64 {
        self.0.saturating_sub(lower.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceSpace {
    window_size: u64,
    modulus: u64,
}

impl SequenceSpace {
    pub fn new(window_size: u32, modulus: u32) -> SequenceSpace {
        assert!(window_size > 0);
        assert!(modulus as u64 >= 2 * window_size as u64, "modulus must be at least twice the window size");

        SequenceSpace {
            window_size: window_size as u64,
            modulus: modulus as u64,
        }
    }

    pub fn from_config(config: &ArqConfig) -> SequenceSpace {
        Self::new(config.window_size, config.seq_modulus)
    }

    pub fn modulus(&self) -> u32 {
        self.modulus as u32
    }

    pub fn is_valid_wire(&self, wire_seq: u32) -> bool {
        (wire_seq as u64) < self.modulus
    }

    pub fn to_wire(&self, seq: SeqNum) -> u32 {
        (seq.0 % self.modulus) as u32
    }

    /// The unique logical sequence number that is congruent to `wire_seq` and lies in
    ///  `[reference - window_size, reference - window_size + modulus)`.
    ///
    /// Returns `None` if that number would be negative, i.e. it lies before the start of the
    ///  session. Callers should treat this as a stale packet.
    pub fn from_wire(&self, wire_seq: u32, reference: SeqNum) -> Option<SeqNum> {
        debug_assert!(self.is_valid_wire(wire_seq));

        let lower = reference.0 as i128 - self.window_size as i128;
        let offset = (wire_seq as i128 - lower).rem_euclid(self.modulus as i128);
        let candidate = lower + offset;

        if candidate < 0 {
            None
        }
        else {
            Some(SeqNum(candidate as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(20, 0, 0)]
    #[case::below_modulus(20, 19, 19)]
    #[case::at_modulus(20, 20, 0)]
    #[case::wrapped_twice(32, 70, 6)]
    fn test_to_wire(#[case] modulus: u32, #[case] seq: u64, #[case] expected: u32) {
        let space = SequenceSpace::new(10, modulus);
        assert_eq!(space.to_wire(SeqNum::from_raw(seq)), expected);
    }

    #[rstest]
    #[case::same(10, 20, 5, 5, Some(5))]
    #[case::ahead(10, 20, 14, 5, Some(14))]
    #[case::behind(10, 20, 0, 5, Some(0))]
    #[case::behind_wrapped(10, 20, 19, 25, Some(19))]
    #[case::window_start(10, 20, 17, 27, Some(17))]
    #[case::window_end(10, 20, 16, 27, Some(36))]
    #[case::wrapped_ahead(10, 20, 3, 18, Some(23))]
    #[case::wrapped_behind(10, 20, 18, 21, Some(18))]
    #[case::before_session_start(10, 20, 19, 0, None)]
    #[case::before_session_start_2(10, 32, 25, 3, None)]
    #[case::session_start(10, 32, 0, 3, Some(0))]
    #[case::wide_modulus_ahead(10, 32, 2, 30, Some(34))]
    #[case::wide_modulus_behind(10, 32, 31, 40, Some(31))]
    fn test_from_wire(#[case] window_size: u32, #[case] modulus: u32, #[case] wire_seq: u32, #[case] reference: u64, #[case] expected: Option<u64>) {
        let space = SequenceSpace::new(window_size, modulus);
        assert_eq!(space.from_wire(wire_seq, SeqNum::from_raw(reference)), expected.map(SeqNum::from_raw));
    }

    /// for every sequence number within `window_size` of the reference, unwrapping the wire
    ///  number must give back the original number
    #[rstest]
    #[case(1, 2)]
    #[case(3, 6)]
    #[case(10, 20)]
    #[case(10, 32)]
    #[case(7, 100)]
    fn test_unwrap_is_inverse_near_reference(#[case] window_size: u32, #[case] modulus: u32) {
        let space = SequenceSpace::new(window_size, modulus);
        let window_size = window_size as u64;

        for reference in 0..5 * modulus as u64 {
            let lowest = reference.saturating_sub(window_size - 1);
            for seq in lowest..reference + window_size {
                let seq = SeqNum::from_raw(seq);
                let wire_seq = space.to_wire(seq);
                assert!(space.is_valid_wire(wire_seq));
                assert_eq!(space.from_wire(wire_seq, SeqNum::from_raw(reference)), Some(seq), "reference {}", reference);
            }
        }
    }

    #[test]
    fn test_seq_num_arithmetic() {
        let seq = SeqNum::from_raw(7);
        assert_eq!(seq.next(), SeqNum::from_raw(8));
        assert_eq!(seq + 3, SeqNum::from_raw(10));
        assert_eq!(seq.checked_minus(7), Some(SeqNum::ZERO));
        assert_eq!(seq.checked_minus(8), None);
        assert_eq!(seq.distance_from(SeqNum::from_raw(2)), 5);
        assert_eq!(seq.distance_from(SeqNum::from_raw(9)), 0);
    }
}
