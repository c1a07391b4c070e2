use std::sync::Arc;
use bytes::Bytes;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::byte_stream::ByteSink;
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::packet::{Packet, PacketKind};
use crate::sequence_log::{NoSequenceLog, SequenceEvent, SequenceLog};
use crate::sequence_space::{SeqNum, SequenceSpace};
use crate::transport::DatagramTransport;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReceiverState {
    Receiving,
    /// END was received and echoed
    Done,
}

/// What the receiver loop should do with a packet
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReceiveAction {
    /// the next packet in sequence: write the payload to the sink, then send the ACK
    Deliver { payload: Bytes, ack: Packet },
    /// out of order or duplicate: send the previous ACK again
    ResendAck(Packet),
    /// out of order before anything was accepted, or irrelevant after END
    Discard,
    /// END: echo this packet to the sender. In [ReceiverState::Done], this is a repeated echo
    ///  for a retransmitted END.
    Terminate(Packet),
}

/// Go-Back-N receiver state: the next expected sequence number and the most recent ACK. There
///  is no buffering - anything but the next packet in sequence is dropped, and recovery is left
///  to the sender's retransmission.
///
/// This is a pure state machine, the I/O is in [Receiver].
pub struct ReceiveCursor {
    sequence_space: SequenceSpace,
    state: ReceiverState,
    expected_seq_num: SeqNum,
    last_ack: Option<Packet>,
    end_packet: Option<Packet>,
}

impl ReceiveCursor {
    pub fn new(config: &ArqConfig) -> anyhow::Result<ReceiveCursor> {
        config.validate()?;
        Ok(ReceiveCursor {
            sequence_space: SequenceSpace::from_config(config),
            state: ReceiverState::Receiving,
            expected_seq_num: SeqNum::ZERO,
            last_ack: None,
            end_packet: None,
        })
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn expected_seq_num(&self) -> SeqNum {
        self.expected_seq_num
    }

    pub fn last_ack(&self) -> Option<&Packet> {
        self.last_ack.as_ref()
    }

    pub fn on_packet(&mut self, packet: Packet) -> Result<ReceiveAction, ArqError> {
        Self::validate(&packet, &self.sequence_space)?;

        if self.state == ReceiverState::Done {
            return Ok(match &self.end_packet {
                Some(end) if *end == packet => {
                    debug!("END #{} retransmitted - echoing again", packet.wire_seq);
                    ReceiveAction::Terminate(packet)
                }
                _ => {
                    trace!("received {:?} after END - discarding", packet);
                    ReceiveAction::Discard
                }
            });
        }

        let seq = self.sequence_space.from_wire(packet.wire_seq, self.expected_seq_num);
        if seq != Some(self.expected_seq_num) {
            return Ok(match &self.last_ack {
                Some(ack) => {
                    trace!("received {:?}, expected #{} - resending {:?}", packet, self.expected_seq_num, ack);
                    ReceiveAction::ResendAck(ack.clone())
                }
                None => {
                    trace!("received {:?} before the first packet of the session - discarding", packet);
                    ReceiveAction::Discard
                }
            });
        }

        match packet.kind {
            PacketKind::Data => {
                let ack = Packet::ack(self.sequence_space.to_wire(self.expected_seq_num));
                trace!("received packet #{} in order - delivering {} bytes", self.expected_seq_num, packet.len());

                self.expected_seq_num = self.expected_seq_num.next();
                self.last_ack = Some(ack.clone());
                Ok(ReceiveAction::Deliver { payload: packet.payload, ack })
            }
            PacketKind::End => {
                debug!("received END #{} - transfer complete", self.expected_seq_num);
                self.state = ReceiverState::Done;
                self.end_packet = Some(packet.clone());
                Ok(ReceiveAction::Terminate(packet))
            }
            PacketKind::Ack => unreachable!("rejected by validation"),
        }
    }

    fn validate(packet: &Packet, sequence_space: &SequenceSpace) -> Result<(), ArqError> {
        match packet.kind {
            PacketKind::Data if packet.len() == 0 => return Err(ArqError::MalformedPacket(format!("DATA packet #{} without payload", packet.wire_seq))),
            PacketKind::End if packet.len() != 0 => return Err(ArqError::MalformedPacket(format!("END packet #{} with {} bytes of payload", packet.wire_seq, packet.len()))),
            PacketKind::Ack => return Err(ArqError::MalformedPacket(format!("receiver received ACK packet {:?}", packet))),
            _ => {}
        }
        if !sequence_space.is_valid_wire(packet.wire_seq) {
            return Err(ArqError::MalformedPacket(format!("wire sequence number {} is outside the modulus {}", packet.wire_seq, sequence_space.modulus())));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReceiveSummary {
    pub delivered_packets: u64,
    pub delivered_bytes: u64,
    /// out-of-order or repeated packets that were answered with the previous ACK
    pub duplicates: u64,
    pub discarded: u64,
}

pub struct Receiver {
    config: Arc<ArqConfig>,
    transport: Arc<dyn DatagramTransport>,
    sequence_log: Box<dyn SequenceLog>,
}

impl Receiver {
    pub fn new(config: Arc<ArqConfig>, transport: Arc<dyn DatagramTransport>) -> anyhow::Result<Receiver> {
        config.validate()?;
        Ok(Receiver {
            config,
            transport,
            sequence_log: Box::new(NoSequenceLog),
        })
    }

    pub fn with_sequence_log(mut self, sequence_log: Box<dyn SequenceLog>) -> Receiver {
        self.sequence_log = sequence_log;
        self
    }

    /// Receives the stream into `sink` until the sender terminates it with END. The sink is
    ///  flushed before END is echoed.
    pub async fn run(mut self, sink: &mut dyn ByteSink) -> anyhow::Result<ReceiveSummary> {
        let session = Uuid::new_v4();
        let span = span!(Level::INFO, "gbn_receiver", %session);

        async move {
            info!("waiting for data: window size {}, modulus {}", self.config.window_size, self.config.seq_modulus);

            let mut cursor = ReceiveCursor::new(&self.config)?;
            let mut summary = ReceiveSummary::default();
            let mut receive_buffer = vec![0u8; Packet::FRAME_LEN];

            loop {
                let len = self.transport.recv(&mut receive_buffer).await?;
                let packet = Packet::deser(&mut &receive_buffer[..len])?;
                let (kind, wire_seq) = (packet.kind, packet.wire_seq);

                let action = cursor.on_packet(packet)?;
                if kind == PacketKind::Data {
                    self.sequence_log.record(SequenceEvent::Arrived, wire_seq as u64)?;
                }

                match action {
                    ReceiveAction::Deliver { payload, ack } => {
                        // NB: the sink must have the data before the sender is told about it
                        sink.write(&payload).await?;
                        summary.delivered_packets += 1;
                        summary.delivered_bytes += payload.len() as u64;
                        self.send(&ack).await?;
                    }
                    ReceiveAction::ResendAck(ack) => {
                        summary.duplicates += 1;
                        self.send(&ack).await?;
                    }
                    ReceiveAction::Discard => {
                        summary.discarded += 1;
                    }
                    ReceiveAction::Terminate(end) => {
                        // NB: END is the sender's confirmation that everything is stored
                        sink.flush().await?;
                        self.send(&end).await?;
                        break;
                    }
                }
            }

            info!("transfer complete: {:?}", summary);

            if !self.config.end_linger.is_zero() {
                self.linger(&mut cursor, &mut receive_buffer).await;
            }
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Keeps answering retransmitted END packets in case the sender did not get the echo. The
    ///  data is safely in the sink at this point, so failures are logged and end the linger
    ///  period without failing the session.
    async fn linger(&self, cursor: &mut ReceiveCursor, receive_buffer: &mut [u8]) {
        debug!("lingering for {:?} to answer retransmitted END packets", self.config.end_linger);
        let deadline = Instant::now() + self.config.end_linger;

        loop {
            let len = match timeout_at(deadline, self.transport.recv(receive_buffer)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!("error receiving while lingering after END: {}", e);
                    break;
                }
                Ok(Ok(len)) => len,
            };

            let action = Packet::deser(&mut &receive_buffer[..len])
                .and_then(|packet| cursor.on_packet(packet));
            match action {
                Ok(ReceiveAction::Terminate(end)) => {
                    if let Err(e) = self.send(&end).await {
                        warn!("error echoing END while lingering: {}", e);
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("ignoring invalid packet while lingering after END: {}", e),
            }
        }
        debug!("linger period over");
    }

    async fn send(&self, packet: &Packet) -> anyhow::Result<()> {
        trace!("sending {:?}", packet);
        self.transport.send(&packet.to_frame()).await
    }
}
