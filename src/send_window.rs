use std::cmp::max;
use std::collections::BTreeMap;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::packet::{Packet, PacketKind};
use crate::sequence_space::{SeqNum, SequenceSpace};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AckOutcome {
    /// `base` moved forward, acknowledging this many packets
    Advanced { newly_acked: usize },
    /// duplicate, stale or otherwise irrelevant acknowledgment - nothing changed
    NoProgress,
    /// the END packet was acknowledged and nothing is left in flight
    TransferComplete,
}

/// Go-Back-N send window, i.e. the packets that were sent but not yet cumulatively acknowledged.
///
/// ```ascii
///  base               next_seq_num
///   │                      │
/// ──┼──────────────────────┼────────────────▶ logical sequence numbers
///   │ <── cached packets ─▶│ <── sendable ──▶ (up to base + window_size)
/// ```
///
/// This is just the state machine - it does no I/O and has no notion of time. The window actor
///  in [crate::sender] drives it and owns the retransmission timer.
pub struct SendWindow {
    sequence_space: SequenceSpace,
    window_size: u64,

    base: SeqNum,
    next_seq_num: SeqNum,

    /// NB: There is an invariant that this holds exactly the packets in `base..next_seq_num`
    cache: BTreeMap<SeqNum, Packet>,

    /// set once the source is exhausted and the END packet was placed in the window
    end_seq_num: Option<SeqNum>,
}

impl SendWindow {
    pub fn new(config: &ArqConfig) -> anyhow::Result<SendWindow> {
        config.validate()?;
        Ok(SendWindow {
            sequence_space: SequenceSpace::from_config(config),
            window_size: config.window_size as u64,
            base: SeqNum::ZERO,
            next_seq_num: SeqNum::ZERO,
            cache: BTreeMap::default(),
            end_seq_num: None,
        })
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn next_seq_num(&self) -> SeqNum {
        self.next_seq_num
    }

    pub fn in_flight(&self) -> u64 {
        self.next_seq_num.distance_from(self.base)
    }

    pub fn has_room(&self) -> bool {
        self.in_flight() < self.window_size
    }

    pub fn is_empty(&self) -> bool {
        self.base == self.next_seq_num
    }

    pub fn is_source_exhausted(&self) -> bool {
        self.end_seq_num.is_some()
    }

    /// The transfer is complete when END was sent and everything up to and including it is
    ///  acknowledged
    pub fn is_complete(&self) -> bool {
        self.is_source_exhausted() && self.is_empty()
    }

    /// Places the next packet in the window: a DATA packet for a chunk, or the END packet if
    ///  the source is exhausted (`None`). The caller is responsible for actually sending it.
    ///
    /// Panics if there is no room in the window or END was submitted before - both are bugs in
    ///  the calling code.
    pub fn submit(&mut self, chunk: Option<Bytes>) -> Packet {
        assert!(self.has_room(), "submit called on a full send window");
        assert!(self.end_seq_num.is_none(), "submit called after END");

        let wire_seq = self.sequence_space.to_wire(self.next_seq_num);
        let packet = match chunk {
            Some(chunk) => Packet::data(wire_seq, chunk),
            None => {
                debug!("source exhausted - placing END at #{}", self.next_seq_num);
                self.end_seq_num = Some(self.next_seq_num);
                Packet::end(wire_seq)
            }
        };

        trace!("submitting packet #{} as {:?}", self.next_seq_num, packet);
        self.cache.insert(self.next_seq_num, packet.clone());
        self.next_seq_num = self.next_seq_num.next();
        packet
    }

    /// Handles a packet received from the peer, which is either a cumulative ACK or the echo of
    ///  our END packet
    pub fn on_ack(&mut self, packet: &Packet) -> Result<AckOutcome, ArqError> {
        match packet.kind {
            PacketKind::Data => return Err(ArqError::MalformedPacket(format!("sender received DATA packet {:?}", packet))),
            PacketKind::Ack | PacketKind::End => {
                if packet.len() != 0 {
                    return Err(ArqError::CorruptAck { wire_seq: packet.wire_seq, len: packet.len() });
                }
            }
        }
        if !self.sequence_space.is_valid_wire(packet.wire_seq) {
            return Err(ArqError::MalformedPacket(format!("wire sequence number {} is outside the modulus {}", packet.wire_seq, self.sequence_space.modulus())));
        }

        let acked = self.sequence_space.from_wire(packet.wire_seq, self.base);

        if packet.kind == PacketKind::End {
            return match (acked, self.end_seq_num) {
                (Some(acked), Some(end_seq_num)) if acked == end_seq_num => {
                    let newly_acked = self.acknowledge_up_to(acked);
                    debug!("END #{} acknowledged together with {} other packets - transfer complete", acked, newly_acked.saturating_sub(1));
                    Ok(AckOutcome::TransferComplete)
                }
                _ => Err(ArqError::PrematureTermination {
                    wire_seq: packet.wire_seq,
                    base: self.base,
                    next_seq_num: self.next_seq_num,
                }),
            };
        }

        let acked = match acked {
            Some(acked) => acked,
            None => {
                trace!("ACK {:?} precedes the start of the session - ignoring", packet);
                return Ok(AckOutcome::NoProgress);
            }
        };

        if acked >= self.next_seq_num {
            warn!("ACK #{} for a packet that was never sent (next sequence number is #{}) - ignoring", acked, self.next_seq_num);
            return Ok(AckOutcome::NoProgress);
        }
        if acked < self.base {
            trace!("duplicate ACK #{} below base #{}", acked, self.base);
            return Ok(AckOutcome::NoProgress);
        }

        let newly_acked = self.acknowledge_up_to(acked);
        if self.is_complete() {
            Ok(AckOutcome::TransferComplete)
        }
        else {
            Ok(AckOutcome::Advanced { newly_acked })
        }
    }

    /// removes all cached packets up to and including `acked` and moves `base` after it
    fn acknowledge_up_to(&mut self, acked: SeqNum) -> usize {
        let remaining = self.cache.split_off(&acked.next());
        let newly_acked = self.cache.len();
        self.cache = remaining;

        self.base = max(self.base, acked.next());
        trace!("cumulative ACK #{}: {} packets acknowledged, window is now #{}..#{}", acked, newly_acked, self.base, self.next_seq_num);
        newly_acked
    }

    /// All packets in the window with their logical sequence numbers, in ascending order
    pub fn unacknowledged(&self) -> impl Iterator<Item = (SeqNum, &Packet)> {
        self.cache.iter()
            .map(|(seq, packet)| (*seq, packet))
    }

    /// The logical sequence number an ACK packet refers to, relative to the current window. This
    ///  is `None` for other kinds of packets, invalid wire numbers and ACKs preceding the session.
    pub fn ack_seq_num(&self, packet: &Packet) -> Option<SeqNum> {
        if packet.kind != PacketKind::Ack || !self.sequence_space.is_valid_wire(packet.wire_seq) {
            return None;
        }
        self.sequence_space.from_wire(packet.wire_seq, self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn config(window_size: u32, seq_modulus: u32) -> ArqConfig {
        ArqConfig {
            window_size,
            seq_modulus,
            retransmit_delay: Duration::from_millis(100),
            max_payload_len: Packet::MAX_PAYLOAD_LEN,
            end_linger: Duration::ZERO,
        }
    }

    fn chunk(n: u64) -> Option<Bytes> {
        Some(Bytes::from(format!("chunk-{}", n)))
    }

    fn window_with(window_size: u32, seq_modulus: u32, num_submitted: u64) -> SendWindow {
        let mut window = SendWindow::new(&config(window_size, seq_modulus)).unwrap();
        for n in 0..num_submitted {
            window.submit(chunk(n));
        }
        window
    }

    fn assert_cache_matches_window(window: &SendWindow) {
        let keys = window.cache.keys().cloned().collect::<Vec<_>>();
        let expected = (window.base.to_raw()..window.next_seq_num.to_raw())
            .map(SeqNum::from_raw)
            .collect::<Vec<_>>();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_submit_fills_window() {
        let mut window = SendWindow::new(&config(3, 6)).unwrap();
        assert!(window.is_empty());

        for n in 0..3 {
            assert!(window.has_room());
            let packet = window.submit(chunk(n));
            assert_eq!(packet.kind, PacketKind::Data);
            assert_eq!(packet.wire_seq, n as u32);
        }
        assert!(!window.has_room());
        assert_eq!(window.in_flight(), 3);
        assert_cache_matches_window(&window);
    }

    #[test]
    #[should_panic]
    fn test_submit_on_full_window_panics() {
        let mut window = window_with(2, 4, 2);
        window.submit(chunk(2));
    }

    #[test]
    fn test_submit_end() {
        let mut window = window_with(10, 32, 1);
        let end = window.submit(None);

        assert_eq!(end, Packet::end(1));
        assert!(window.is_source_exhausted());
        assert!(!window.is_complete());
    }

    #[test]
    fn test_wire_numbers_wrap_around() {
        let mut window = SendWindow::new(&config(2, 4)).unwrap();
        let mut wire_numbers = Vec::new();
        for n in 0..9 {
            if !window.has_room() {
                let ack = Packet::ack(window.sequence_space.to_wire(window.base));
                window.on_ack(&ack).unwrap();
            }
            wire_numbers.push(window.submit(chunk(n)).wire_seq);
        }
        assert_eq!(wire_numbers, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[rstest]
    #[case::first(5, 0, AckOutcome::Advanced { newly_acked: 1 }, 1)]
    #[case::cumulative(5, 3, AckOutcome::Advanced { newly_acked: 4 }, 4)]
    #[case::all(5, 4, AckOutcome::Advanced { newly_acked: 5 }, 5)]
    #[case::never_sent(5, 7, AckOutcome::NoProgress, 0)]
    #[case::precedes_session(5, 31, AckOutcome::NoProgress, 0)]
    fn test_on_ack(#[case] num_submitted: u64, #[case] ack_wire_seq: u32, #[case] expected: AckOutcome, #[case] expected_base: u64) {
        let mut window = window_with(10, 32, num_submitted);

        assert_eq!(window.on_ack(&Packet::ack(ack_wire_seq)).unwrap(), expected);
        assert_eq!(window.base(), SeqNum::from_raw(expected_base));
        assert_eq!(window.next_seq_num(), SeqNum::from_raw(num_submitted));
        assert_cache_matches_window(&window);
    }

    #[rstest]
    #[case::in_window(Packet::ack(31), Some(31))]
    #[case::wrapped(Packet::ack(1), Some(33))]
    #[case::stale(Packet::ack(25), Some(25))]
    #[case::end_echo(Packet::end(31), None)]
    #[case::outside_modulus(Packet::ack(40), None)]
    fn test_ack_seq_num(#[case] packet: Packet, #[case] expected: Option<u64>) {
        let mut window = SendWindow::new(&config(10, 32)).unwrap();
        for n in 0..35 {
            if !window.has_room() {
                let last_sent = window.next_seq_num().checked_minus(1).unwrap();
                window.on_ack(&Packet::ack(window.sequence_space.to_wire(last_sent))).unwrap();
            }
            window.submit(chunk(n));
        }
        assert_eq!(window.base(), SeqNum::from_raw(30));

        assert_eq!(window.ack_seq_num(&packet), expected.map(SeqNum::from_raw));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(SendWindow::new(&config(10, 19)).is_err());
        assert!(SendWindow::new(&config(0, 32)).is_err());
    }

    #[test]
    fn test_reordered_acks_are_cumulative() {
        let mut window = window_with(10, 32, 5);
        window.on_ack(&Packet::ack(0)).unwrap();
        window.on_ack(&Packet::ack(1)).unwrap();

        // the ACK for #3 overtakes the ACK for #2
        assert_eq!(window.on_ack(&Packet::ack(3)).unwrap(), AckOutcome::Advanced { newly_acked: 2 });
        assert_eq!(window.base(), SeqNum::from_raw(4));

        assert_eq!(window.on_ack(&Packet::ack(2)).unwrap(), AckOutcome::NoProgress);
        assert_eq!(window.base(), SeqNum::from_raw(4));
        assert_cache_matches_window(&window);
    }

    #[test]
    fn test_duplicate_ack_does_not_regress_base() {
        let mut window = window_with(10, 32, 3);
        window.on_ack(&Packet::ack(1)).unwrap();

        for _ in 0..3 {
            assert_eq!(window.on_ack(&Packet::ack(1)).unwrap(), AckOutcome::NoProgress);
            assert_eq!(window.base(), SeqNum::from_raw(2));
        }
    }

    #[test]
    fn test_end_echo_completes_transfer() {
        let mut window = window_with(10, 32, 2);
        window.submit(None);

        // ACKs for the DATA packets were lost, the END echo acknowledges everything
        assert_eq!(window.on_ack(&Packet::end(2)).unwrap(), AckOutcome::TransferComplete);
        assert!(window.is_complete());
        assert_eq!(window.unacknowledged().count(), 0);
    }

    #[test]
    fn test_end_before_source_exhausted() {
        let mut window = window_with(10, 32, 2);
        assert_eq!(
            window.on_ack(&Packet::end(1)),
            Err(ArqError::PrematureTermination { wire_seq: 1, base: SeqNum::ZERO, next_seq_num: SeqNum::from_raw(2) }),
        );
    }

    #[test]
    fn test_end_for_wrong_sequence_number() {
        let mut window = window_with(10, 32, 2);
        window.submit(None);
        assert!(matches!(window.on_ack(&Packet::end(1)), Err(ArqError::PrematureTermination { .. })));
    }

    #[rstest]
    #[case::ack_with_payload(Packet { kind: PacketKind::Ack, wire_seq: 0, payload: Bytes::from_static(b"x") }, ArqError::CorruptAck { wire_seq: 0, len: 1 })]
    #[case::end_with_payload(Packet { kind: PacketKind::End, wire_seq: 1, payload: Bytes::from_static(b"xy") }, ArqError::CorruptAck { wire_seq: 1, len: 2 })]
    fn test_corrupt_ack(#[case] packet: Packet, #[case] expected: ArqError) {
        let mut window = window_with(10, 32, 2);
        assert_eq!(window.on_ack(&packet), Err(expected));
    }

    #[rstest]
    #[case::data(Packet::data(0, Bytes::from_static(b"x")))]
    #[case::outside_modulus(Packet::ack(32))]
    fn test_malformed_ack(#[case] packet: Packet) {
        let mut window = window_with(10, 32, 2);
        assert!(matches!(window.on_ack(&packet), Err(ArqError::MalformedPacket(_))));
    }

    /// drive the window through a long transfer with wrap-around, acknowledging in irregular
    ///  steps and re-delivering stale ACKs, checking the invariants after every step
    #[rstest]
    #[case(10, 20)]
    #[case(10, 32)]
    #[case(3, 6)]
    fn test_invariants_over_long_transfer(#[case] window_size: u32, #[case] seq_modulus: u32) {
        let mut window = SendWindow::new(&config(window_size, seq_modulus)).unwrap();
        let space = SequenceSpace::new(window_size, seq_modulus);
        let mut prev_base = window.base();
        let mut stale_acks = Vec::new();

        for round in 0..200u64 {
            while window.has_room() {
                window.submit(chunk(window.next_seq_num().to_raw()));
            }
            assert!(window.in_flight() <= window_size as u64);

            let step = 1 + round % window_size as u64;
            let acked = (window.base() + step).checked_minus(1).unwrap();
            let acked = if acked >= window.next_seq_num() { window.next_seq_num().checked_minus(1).unwrap() } else { acked };

            stale_acks.push(space.to_wire(acked));
            window.on_ack(&Packet::ack(space.to_wire(acked))).unwrap();
            assert_eq!(window.base(), acked.next());

            // a delayed duplicate from a previous round
            if stale_acks.len() > 2 {
                let stale = stale_acks[stale_acks.len() - 2];
                assert_eq!(window.on_ack(&Packet::ack(stale)).unwrap(), AckOutcome::NoProgress);
            }

            assert!(window.base() >= prev_base);
            prev_base = window.base();
            assert!(window.base() <= window.next_seq_num());
            assert_cache_matches_window(&window);
        }
    }
}
