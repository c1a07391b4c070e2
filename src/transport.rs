use std::net::SocketAddr;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tracing::{debug, trace};
use anyhow::anyhow;

/// This is an abstraction for the datagram channel to the (single, fixed) peer, introduced to
///  decouple the protocol from the socket and facilitate mocking the I/O part away for testing.
///
/// The protocol assumes that datagrams may be dropped, delayed or reordered, but not corrupted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    async fn send(&self, datagram: &[u8]) -> anyhow::Result<()>;

    /// Blocks until a datagram arrives, copying it into `buf` and returning its length.
    ///  Datagrams longer than `buf` are truncated.
    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize>;
}

pub struct UdpTransport {
    socket: UdpSocket,
    peer_addr: SocketAddr,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, peer_addr: SocketAddr) -> UdpTransport {
        UdpTransport { socket, peer_addr }
    }

    /// Binds a socket to `local_addr`, sending all datagrams to the first address that `peer`
    ///  resolves to
    pub async fn bind(local_addr: SocketAddr, peer: impl ToSocketAddrs) -> anyhow::Result<UdpTransport> {
        let peer_addr = lookup_host(peer).await?
            .next()
            .ok_or_else(|| anyhow!("peer address does not resolve to any socket address"))?;

        let socket = UdpSocket::bind(local_addr).await?;
        debug!("bound UDP socket to {:?}, peer is {:?}", socket.local_addr()?, peer_addr);
        Ok(UdpTransport::new(socket, peer_addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.len(), self.peer_addr);
        self.socket.send_to(datagram, self.peer_addr).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let (len, from) = self.socket.recv_from(buf).await?;
        trace!("UDP socket: received {} bytes from {:?}", len, from);
        Ok(len)
    }
}

/// Emulates a lossy link by dropping each outgoing datagram with a fixed probability
pub struct LossyTransport<T: DatagramTransport> {
    inner: T,
    loss_rate: f64,
}

impl<T: DatagramTransport> LossyTransport<T> {
    pub fn new(inner: T, loss_rate: f64) -> anyhow::Result<LossyTransport<T>> {
        if !(0.0..1.0).contains(&loss_rate) {
            return Err(anyhow!("loss rate must be in [0, 1), was {}", loss_rate));
        }
        Ok(LossyTransport { inner, loss_rate })
    }
}

#[async_trait]
impl<T: DatagramTransport> DatagramTransport for LossyTransport<T> {
    async fn send(&self, datagram: &[u8]) -> anyhow::Result<()> {
        if self.loss_rate > 0.0 && rand::random::<f64>() < self.loss_rate {
            trace!("lossy link: dropping datagram of {} bytes", datagram.len());
            return Ok(());
        }
        self.inner.send(datagram).await
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.inner.recv(buf).await
    }
}

#[async_trait]
impl<T: DatagramTransport + ?Sized> DatagramTransport for std::sync::Arc<T> {
    async fn send(&self, datagram: &[u8]) -> anyhow::Result<()> {
        self.as_ref().send(datagram).await
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.as_ref().recv(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Builder;

    #[test]
    fn test_udp_transport_loopback() {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let addr_a = a.local_addr().unwrap();
            let addr_b = b.local_addr().unwrap();

            let a = UdpTransport::new(a, addr_b);
            let b = UdpTransport::new(b, addr_a);
            assert_eq!(a.peer_addr(), addr_b);

            a.send(b"hello").await.unwrap();
            let mut buf = [0u8; 16];
            let len = b.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"hello");
        });
    }

    #[test]
    fn test_lossy_transport_without_loss_forwards() {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let mut inner = MockDatagramTransport::new();
            inner.expect_send()
                .with(always())
                .times(20)
                .returning(|_| Ok(()));

            let lossy = LossyTransport::new(inner, 0.0).unwrap();
            for _ in 0..20 {
                lossy.send(b"x").await.unwrap();
            }
        });
    }

    #[test]
    fn test_lossy_transport_drops_some() {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let forwarded = Arc::new(AtomicUsize::new(0));
            let counter = forwarded.clone();

            let mut inner = MockDatagramTransport::new();
            inner.expect_send()
                .returning(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });

            let lossy = LossyTransport::new(inner, 0.5).unwrap();
            for _ in 0..1000 {
                lossy.send(b"x").await.unwrap();
            }
            // roughly half of the datagrams get through - these bounds are practically certain
            let forwarded = forwarded.load(Ordering::SeqCst);
            assert!(forwarded > 300 && forwarded < 700, "{} forwarded", forwarded);
        });
    }

    #[test]
    fn test_lossy_transport_rejects_invalid_rate() {
        assert!(LossyTransport::new(MockDatagramTransport::new(), 1.0).is_err());
        assert!(LossyTransport::new(MockDatagramTransport::new(), -0.1).is_err());
    }
}
