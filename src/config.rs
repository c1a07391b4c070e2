use std::time::Duration;
use anyhow::bail;
use crate::packet::Packet;

/// Session parameters shared by sender and receiver. They are fixed for the lifetime of a
///  session and not negotiated between the peers, so both sides must be started with
///  compatible values (same window size and modulus).
#[derive(Clone, Debug)]
pub struct ArqConfig {
    /// Maximum number of packets in flight, i.e. sent but not yet cumulatively acknowledged.
    pub window_size: u32,

    /// Sequence numbers on the wire are the logical sequence numbers modulo this value. The
    ///  wire number can only be unwrapped unambiguously if at most one window's worth of
    ///  sequence numbers is in flight on either side of a reference point, which requires
    ///  `seq_modulus >= 2 * window_size`.
    pub seq_modulus: u32,

    /// Delay after which all unacknowledged packets are sent again. The timer is re-armed after
    ///  every retransmission burst and after every acknowledgment that advances the window.
    pub retransmit_delay: Duration,

    /// Upper bound for the payload of a single DATA packet. This can be configured to be smaller
    ///  than what fits into a frame, but never bigger.
    pub max_payload_len: usize,

    /// After the END handshake, the receiver keeps listening for this long and echoes END
    ///  packets again. This covers the case of the original END echo getting lost, which would
    ///  otherwise leave the sender retransmitting END to a peer that is gone.
    ///
    /// NB: Zero means that the receiver terminates immediately after echoing END
    pub end_linger: Duration,
}

impl ArqConfig {
    /// The classic parameters: a window of 10 packets, modulus 32 and a retransmission delay of
    ///  100ms with full-size frames
    pub fn default_config() -> ArqConfig {
        ArqConfig {
            window_size: 10,
            seq_modulus: 32,
            retransmit_delay: Duration::from_millis(100),
            max_payload_len: Packet::MAX_PAYLOAD_LEN,
            end_linger: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if (self.seq_modulus as u64) < 2 * (self.window_size as u64) {
            bail!("sequence number modulus {} is too small for window size {} - it must be at least twice the window size", self.seq_modulus, self.window_size);
        }
        if self.retransmit_delay.is_zero() {
            bail!("retransmission delay must not be zero");
        }
        if self.max_payload_len == 0 || self.max_payload_len > Packet::MAX_PAYLOAD_LEN {
            bail!("maximum payload length must be between 1 and {}, was {}", Packet::MAX_PAYLOAD_LEN, self.max_payload_len);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = ArqConfig::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_size, 10);
        assert_eq!(config.seq_modulus, 32);
        assert_eq!(config.max_payload_len, 496);
    }

    #[rstest]
    #[case::minimal_modulus(10, 20, 100, 496, true)]
    #[case::small_window(1, 2, 1, 1, true)]
    #[case::modulus_too_small(10, 19, 100, 496, false)]
    #[case::zero_window(0, 32, 100, 496, false)]
    #[case::zero_delay(10, 32, 0, 496, false)]
    #[case::zero_payload(10, 32, 100, 0, false)]
    #[case::payload_too_big(10, 32, 100, 497, false)]
    fn test_validate(#[case] window_size: u32, #[case] seq_modulus: u32, #[case] delay_millis: u64, #[case] max_payload_len: usize, #[case] expected_valid: bool) {
        let config = ArqConfig {
            window_size,
            seq_modulus,
            retransmit_delay: Duration::from_millis(delay_millis),
            max_payload_len,
            end_linger: Duration::ZERO,
        };
        assert_eq!(config.validate().is_ok(), expected_valid);
    }
}
