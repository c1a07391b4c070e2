//! The sending side of a session.
//!
//! A session runs three cooperating tasks that share nothing but channels:
//!
//! * the *window actor* owns the [SendWindow] and the [RetransmitTimer]. It is the only code
//!    that touches window state, so submissions, acknowledgments and timeouts are processed
//!    one at a time without locking
//! * the *transmit* task pulls chunks from the [ByteSource] and submits them to the actor,
//!    waiting while the window is full
//! * the *ACK monitor* receives datagrams from the peer and feeds them to the actor until the
//!    transfer is complete

use std::sync::Arc;
use bytes::Bytes;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, span, trace, Instrument, Level};
use uuid::Uuid;
use anyhow::{anyhow, bail};
use crate::byte_stream::ByteSource;
use crate::config::ArqConfig;
use crate::packet::Packet;
use crate::send_window::{AckOutcome, SendWindow};
use crate::sequence_log::{NoSequenceLog, SequenceEvent, SequenceLog};
use crate::sequence_space::SeqNum;
use crate::timer::RetransmitTimer;
use crate::transport::DatagramTransport;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TransferSummary {
    /// every frame that was transmitted, including retransmissions and END
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
    /// payload bytes taken from the source, each counted once
    pub bytes_sent: u64,
}

enum WindowCommand {
    /// `None` signals the end of the source. The reply is sent as soon as the packet was placed
    ///  in the window, which may be delayed until there is room.
    Submit { chunk: Option<Bytes>, reply: oneshot::Sender<()> },
    Inbound { packet: Packet, reply: oneshot::Sender<AckOutcome> },
}

#[derive(Clone)]
struct WindowHandle {
    commands: mpsc::Sender<WindowCommand>,
}

impl WindowHandle {
    async fn submit(&self, chunk: Option<Bytes>) -> anyhow::Result<()> {
        let (reply, reply_recv) = oneshot::channel();
        self.commands.send(WindowCommand::Submit { chunk, reply }).await
            .map_err(|_| anyhow!("send window closed"))?;
        reply_recv.await
            .map_err(|_| anyhow!("send window closed"))
    }

    async fn on_inbound(&self, packet: Packet) -> anyhow::Result<AckOutcome> {
        let (reply, reply_recv) = oneshot::channel();
        self.commands.send(WindowCommand::Inbound { packet, reply }).await
            .map_err(|_| anyhow!("send window closed"))?;
        reply_recv.await
            .map_err(|_| anyhow!("send window closed"))
    }
}

struct WindowActor {
    window: SendWindow,
    timer: RetransmitTimer,
    transport: Arc<dyn DatagramTransport>,
    sequence_log: Box<dyn SequenceLog>,
    /// a submission that arrived while the window was full
    pending_submit: Option<(Option<Bytes>, oneshot::Sender<()>)>,
    summary: TransferSummary,
}

impl WindowActor {
    fn new(config: &ArqConfig, transport: Arc<dyn DatagramTransport>, sequence_log: Box<dyn SequenceLog>) -> anyhow::Result<WindowActor> {
        Ok(WindowActor {
            window: SendWindow::new(config)?,
            timer: RetransmitTimer::new(config.retransmit_delay),
            transport,
            sequence_log,
            pending_submit: None,
            summary: TransferSummary::default(),
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<WindowCommand>) -> anyhow::Result<TransferSummary> {
        while !self.window.is_complete() {
            select! {
                opt_cmd = commands.recv() => {
                    match opt_cmd {
                        Some(WindowCommand::Submit { chunk, reply }) => self.on_submit(chunk, reply).await?,
                        Some(WindowCommand::Inbound { packet, reply }) => self.on_inbound(packet, reply).await?,
                        None => bail!("send window handles were dropped before the transfer was complete"),
                    }
                }
                _ = self.timer.expiry() => {
                    self.on_retransmit_timeout().await?;
                }
            }
        }

        self.timer.cancel();
        Ok(self.summary)
    }

    async fn on_submit(&mut self, chunk: Option<Bytes>, reply: oneshot::Sender<()>) -> anyhow::Result<()> {
        if self.window.has_room() {
            self.submit_and_send(chunk).await?;
            let _ = reply.send(());
        }
        else {
            trace!("send window is full - parking submission until the window advances");
            self.pending_submit = Some((chunk, reply));
        }
        Ok(())
    }

    async fn submit_and_send(&mut self, chunk: Option<Bytes>) -> anyhow::Result<()> {
        let was_empty = self.window.is_empty();
        if let Some(chunk) = &chunk {
            self.summary.bytes_sent += chunk.len() as u64;
        }

        let seq = self.window.next_seq_num();
        let packet = self.window.submit(chunk);
        self.send_packet(seq, &packet).await?;

        if was_empty {
            self.timer.arm();
        }
        Ok(())
    }

    async fn on_inbound(&mut self, packet: Packet, reply: oneshot::Sender<AckOutcome>) -> anyhow::Result<()> {
        let acked = self.window.ack_seq_num(&packet);
        let outcome = self.window.on_ack(&packet)?;
        self.summary.acks_received += 1;
        if let Some(acked) = acked {
            self.sequence_log.record(SequenceEvent::Acknowledged, acked.to_raw())?;
        }

        match outcome {
            AckOutcome::Advanced { newly_acked } => {
                trace!("{:?} acknowledged {} packets, base is now #{}", packet, newly_acked, self.window.base());
                if self.window.is_empty() {
                    self.timer.cancel();
                }
                else {
                    self.timer.arm();
                }
            }
            AckOutcome::NoProgress => {}
            AckOutcome::TransferComplete => {
                debug!("{:?} completed the transfer", packet);
                self.timer.cancel();
            }
        }

        if self.window.has_room() && !self.window.is_complete() {
            if let Some((chunk, submit_reply)) = self.pending_submit.take() {
                self.submit_and_send(chunk).await?;
                let _ = submit_reply.send(());
            }
        }

        let _ = reply.send(outcome);
        Ok(())
    }

    async fn on_retransmit_timeout(&mut self) -> anyhow::Result<()> {
        if self.window.is_empty() {
            self.timer.cancel();
            return Ok(());
        }

        let packets = self.window.unacknowledged()
            .map(|(seq, packet)| (seq, packet.clone()))
            .collect::<Vec<_>>();
        debug!("retransmission timeout: resending {} packets starting at #{}", packets.len(), self.window.base());

        for (seq, packet) in &packets {
            self.send_packet(*seq, packet).await?;
            self.summary.retransmissions += 1;
        }
        self.timer.arm();
        Ok(())
    }

    async fn send_packet(&mut self, seq: SeqNum, packet: &Packet) -> anyhow::Result<()> {
        trace!("sending packet #{} as {:?}", seq, packet);
        self.transport.send(&packet.to_frame()).await?;
        self.summary.packets_sent += 1;
        self.sequence_log.record(SequenceEvent::Sent, seq.to_raw())?;
        Ok(())
    }
}

/// Pulls chunks from the source and submits them to the window, finishing with END. Since every
///  submission waits for its acknowledgment by the window actor, at most one chunk is read
///  ahead of the window.
async fn transmit(handle: WindowHandle, source: &mut dyn ByteSource, max_payload_len: usize) -> anyhow::Result<()> {
    loop {
        let chunk = source.next_chunk(max_payload_len).await?;
        match &chunk {
            Some(c) if c.is_empty() => {
                trace!("skipping empty chunk from source");
                continue;
            }
            Some(c) if c.len() > max_payload_len => {
                bail!("source returned a chunk of {} bytes, maximum payload length is {}", c.len(), max_payload_len);
            }
            _ => {}
        }

        let is_end = chunk.is_none();
        handle.submit(chunk).await?;
        if is_end {
            debug!("source exhausted");
            return Ok(());
        }
    }
}

async fn monitor_acks(handle: WindowHandle, transport: Arc<dyn DatagramTransport>) -> anyhow::Result<()> {
    let mut receive_buffer = vec![0u8; Packet::FRAME_LEN];
    loop {
        let len = transport.recv(&mut receive_buffer).await?;
        let packet = Packet::deser(&mut &receive_buffer[..len])?;
        trace!("received {:?}", packet);

        if handle.on_inbound(packet).await? == AckOutcome::TransferComplete {
            return Ok(());
        }
    }
}

pub struct Sender {
    config: Arc<ArqConfig>,
    transport: Arc<dyn DatagramTransport>,
    sequence_log: Box<dyn SequenceLog>,
}

impl Sender {
    pub fn new(config: Arc<ArqConfig>, transport: Arc<dyn DatagramTransport>) -> anyhow::Result<Sender> {
        config.validate()?;
        Ok(Sender {
            config,
            transport,
            sequence_log: Box::new(NoSequenceLog),
        })
    }

    pub fn with_sequence_log(mut self, sequence_log: Box<dyn SequenceLog>) -> Sender {
        self.sequence_log = sequence_log;
        self
    }

    /// Transfers the source's entire content to the peer, returning after the peer acknowledged
    ///  END. There is no overall timeout: if the peer goes away, this keeps retransmitting.
    pub async fn run(self, source: &mut dyn ByteSource) -> anyhow::Result<TransferSummary> {
        let session = Uuid::new_v4();
        let span = span!(Level::INFO, "gbn_sender", %session);

        async move {
            info!("starting transfer: window size {}, modulus {}, retransmission delay {:?}", self.config.window_size, self.config.seq_modulus, self.config.retransmit_delay);

            let (send, recv) = mpsc::channel(32);
            let handle = WindowHandle { commands: send };

            let actor = WindowActor::new(&self.config, self.transport.clone(), self.sequence_log)?;

            let (summary, _, _) = tokio::try_join!(
                actor.run(recv),
                transmit(handle.clone(), source, self.config.max_payload_len),
                monitor_acks(handle, self.transport.clone()),
            )?;

            info!("transfer complete: {:?}", summary);
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
