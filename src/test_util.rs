use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::trace;
use anyhow::anyhow;
use crate::packet::{Packet, PacketKind};
use crate::transport::DatagramTransport;

/// An in-process datagram link for testing. Both ends of a pair are connected through unbounded
///  channels, so datagrams arrive in order and without loss unless a test asks for specific
///  frames to be dropped.
///
/// Every send attempt is tracked, including frames that are subsequently dropped.
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    drops: RwLock<FxHashMap<(PacketKind, u32), usize>>,
    tracker: Arc<RwLock<Vec<Packet>>>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (send_a, recv_a) = mpsc::unbounded_channel();
        let (send_b, recv_b) = mpsc::unbounded_channel();
        (ChannelTransport::new(send_a, recv_b), ChannelTransport::new(send_b, recv_a))
    }

    fn new(outgoing: mpsc::UnboundedSender<Bytes>, incoming: mpsc::UnboundedReceiver<Bytes>) -> ChannelTransport {
        ChannelTransport {
            outgoing,
            incoming: Mutex::new(incoming),
            drops: Default::default(),
            tracker: Default::default(),
        }
    }

    /// Silently discards the next outgoing frame with this kind and wire sequence number
    pub async fn drop_once(&self, kind: PacketKind, wire_seq: u32) {
        self.drop_times(kind, wire_seq, 1).await;
    }

    /// Silently discards the next `times` outgoing frames with this kind and wire sequence number
    pub async fn drop_times(&self, kind: PacketKind, wire_seq: u32, times: usize) {
        *self.drops.write().await
            .entry((kind, wire_seq))
            .or_default() += times;
    }

    /// returns all packets that were passed to `send()` so far, in order
    pub async fn sent_packets(&self) -> Vec<Packet> {
        self.tracker.read().await.clone()
    }

    async fn should_drop(&self, packet: &Packet) -> bool {
        let mut drops = self.drops.write().await;
        match drops.get_mut(&(packet.kind, packet.wire_seq)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DatagramTransport for ChannelTransport {
    async fn send(&self, datagram: &[u8]) -> anyhow::Result<()> {
        let packet = Packet::deser(&mut &datagram[..])?;
        self.tracker.write().await.push(packet.clone());

        if self.should_drop(&packet).await {
            trace!("channel transport: dropping {:?}", packet);
            return Ok(());
        }

        // the peer may have terminated already - that is the same as a lost datagram
        let _ = self.outgoing.send(Bytes::copy_from_slice(datagram));
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let datagram = self.incoming.lock().await
            .recv().await
            .ok_or_else(|| anyhow!("channel transport: peer is closed"))?;

        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }
}
