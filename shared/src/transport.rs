//! Point-to-point message transport between agents.
//!
//! The state machines only assume a reliable asynchronous channel where
//! every peer is reachable under a stable string address. [`Transport`] is
//! that seam. Two implementations ship with the workspace: an in-process
//! [`ChannelHub`] used by tests and single-process embeddings, and a
//! loopback-grade [`UdpEndpoint`] for the demo binaries.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const UDP_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no peer registered at '{0}'")]
    UnknownPeer(String),

    #[error("invalid peer address '{0}'")]
    BadAddress(String),

    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A reliable, addressed, asynchronous message channel.
///
/// Received messages are `(sender address, body)` pairs. Delivery order per
/// peer pair is preserved; backpressure is the transport's own concern.
pub trait Transport {
    /// Stable address peers use to reach this endpoint.
    fn local_addr(&self) -> &str;

    /// Queues a message for delivery to `to`.
    fn send(&mut self, to: &str, body: &[u8]) -> Result<(), TransportError>;

    /// One non-blocking receive attempt.
    fn try_recv(&mut self) -> Option<(String, Vec<u8>)>;

    /// Receives with a bounded wait; `None` if nothing arrived in time.
    fn recv(&mut self, wait: Duration) -> impl Future<Output = Option<(String, Vec<u8>)>> + Send;
}

type Delivery = (String, Vec<u8>);
type PeerMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>>;

/// In-process message hub. Cloning shares the peer table; [`ChannelHub::bind`]
/// registers a new addressable endpoint.
#[derive(Debug, Clone, Default)]
pub struct ChannelHub {
    peers: PeerMap,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` on the hub and returns its endpoint. Binding an
    /// address twice replaces the previous mailbox.
    pub fn bind(&self, addr: &str) -> ChannelEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .lock()
            .expect("poisoned hub lock")
            .insert(addr.to_string(), tx);
        ChannelEndpoint {
            addr: addr.to_string(),
            peers: Arc::clone(&self.peers),
            rx,
        }
    }
}

/// One agent's mailbox on a [`ChannelHub`].
#[derive(Debug)]
pub struct ChannelEndpoint {
    addr: String,
    peers: PeerMap,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Transport for ChannelEndpoint {
    fn local_addr(&self) -> &str {
        &self.addr
    }

    fn send(&mut self, to: &str, body: &[u8]) -> Result<(), TransportError> {
        let tx = {
            let peers = self.peers.lock().expect("poisoned hub lock");
            peers.get(to).cloned()
        };
        let tx = tx.ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        tx.send((self.addr.clone(), body.to_vec()))
            .map_err(|_| TransportError::UnknownPeer(to.to_string()))
    }

    fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    fn recv(&mut self, wait: Duration) -> impl Future<Output = Option<Delivery>> + Send {
        async move { tokio::time::timeout(wait, self.rx.recv()).await.ok().flatten() }
    }
}

/// UDP endpoint for running the demo agents in separate processes.
///
/// UDP does not guarantee delivery; this is adequate on loopback, where the
/// demos run, but a production embedding should bring a reliable transport.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    addr: String,
    buffer: Vec<u8>,
}

impl UdpEndpoint {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?.to_string();
        Ok(Self {
            socket,
            addr,
            buffer: vec![0u8; UDP_BUFFER_SIZE],
        })
    }
}

impl Transport for UdpEndpoint {
    fn local_addr(&self) -> &str {
        &self.addr
    }

    fn send(&mut self, to: &str, body: &[u8]) -> Result<(), TransportError> {
        let target: SocketAddr = to
            .parse()
            .map_err(|_| TransportError::BadAddress(to.to_string()))?;
        self.socket.try_send_to(body, target)?;
        Ok(())
    }

    fn try_recv(&mut self) -> Option<Delivery> {
        match self.socket.try_recv_from(&mut self.buffer) {
            Ok((len, from)) => Some((from.to_string(), self.buffer[..len].to_vec())),
            Err(_) => None,
        }
    }

    fn recv(&mut self, wait: Duration) -> impl Future<Output = Option<Delivery>> + Send {
        async move {
            match tokio::time::timeout(wait, self.socket.recv_from(&mut self.buffer)).await {
                Ok(Ok((len, from))) => Some((from.to_string(), self.buffer[..len].to_vec())),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_delivers_with_sender_address() {
        let hub = ChannelHub::new();
        let mut alice = hub.bind("alice");
        let mut bob = hub.bind("bob");

        alice.send("bob", b"hello").unwrap();

        let (from, body) = bob.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(from, "alice");
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn try_recv_is_non_blocking() {
        let hub = ChannelHub::new();
        let mut alice = hub.bind("alice");
        let mut bob = hub.bind("bob");

        assert!(bob.try_recv().is_none());

        alice.send("bob", b"ping").unwrap();
        let (from, body) = bob.try_recv().unwrap();
        assert_eq!(from, "alice");
        assert_eq!(body, b"ping");
        assert!(bob.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_times_out_when_quiet() {
        let hub = ChannelHub::new();
        let mut alice = hub.bind("alice");

        assert!(alice.recv(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let hub = ChannelHub::new();
        let mut alice = hub.bind("alice");

        assert!(matches!(
            alice.send("nobody", b"hi"),
            Err(TransportError::UnknownPeer(addr)) if addr == "nobody"
        ));
    }

    #[tokio::test]
    async fn delivery_order_is_preserved() {
        let hub = ChannelHub::new();
        let mut alice = hub.bind("alice");
        let mut bob = hub.bind("bob");

        for i in 0..5u8 {
            alice.send("bob", &[i]).unwrap();
        }
        for i in 0..5u8 {
            let (_, body) = bob.recv(Duration::from_millis(100)).await.unwrap();
            assert_eq!(body, vec![i]);
        }
    }

    #[tokio::test]
    async fn udp_endpoints_exchange_messages() {
        let mut server = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();
        let mut client = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().to_string();

        client.send(&server_addr, b"connect").unwrap();

        let (from, body) = server.recv(Duration::from_millis(200)).await.unwrap();
        assert_eq!(from, client.local_addr());
        assert_eq!(body, b"connect");

        server.send(&from, b"welcome").unwrap();
        let (_, reply) = client.recv(Duration::from_millis(200)).await.unwrap();
        assert_eq!(reply, b"welcome");
    }
}
