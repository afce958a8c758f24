//! Frame transports between the host and a radio block.
//!
//! A transport moves whole encoded frames. It never inspects them; stream
//! ids and sequencing belong to the endpoint's codec.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sdrio_core::wire::MAX_FRAME_SIZE;
use sdrio_core::Direction;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::registry::BlockId;

/// Outcome of one receive attempt.
#[derive(Debug)]
pub enum Recv {
    Frame(Bytes),
    Timeout,
    Closed,
}

#[async_trait]
pub trait Transport: Send {
    /// Hand one frame to the link. Returns `false` once the link is gone.
    async fn send(&mut self, frame: Bytes) -> bool;

    /// Wait up to `timeout` for one frame.
    async fn recv(&mut self, timeout: Duration) -> Recv;
}

/// Opens the link for one radio block in one direction.
pub trait TransportFactory: Send + Sync {
    fn make_transport(
        &self,
        block: BlockId,
        direction: Direction,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("radio block {0} is unreachable")]
    Unreachable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Loopback ──────────────────────────────────────────────────────────────────

/// One end of an in-process frame link.
pub struct LoopbackTransport {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

/// Two connected ends. Frames sent on one arrive on the other.
pub fn loopback_pair(depth: usize) -> (LoopbackTransport, LoopbackTransport) {
    let depth = depth.max(1);
    let (a_tx, a_rx) = mpsc::channel(depth);
    let (b_tx, b_rx) = mpsc::channel(depth);
    (
        LoopbackTransport { tx: a_tx, rx: b_rx },
        LoopbackTransport { tx: b_tx, rx: a_rx },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: Bytes) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    async fn recv(&mut self, timeout: Duration) -> Recv {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Recv::Frame(frame),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Timeout,
        }
    }
}

/// Hands the host side of a fresh loopback pair to each endpoint and keeps
/// the device side for a simulator or test to pick up.
pub struct LoopbackFactory {
    depth: usize,
    device_ends: DashMap<(BlockId, Direction), LoopbackTransport>,
}

impl LoopbackFactory {
    pub fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            depth,
            device_ends: DashMap::new(),
        })
    }

    /// Take the device side of the most recent link opened for `block`.
    pub fn take_device_end(&self, block: BlockId, direction: Direction) -> Option<LoopbackTransport> {
        self.device_ends
            .remove(&(block, direction))
            .map(|(_, end)| end)
    }
}

impl TransportFactory for LoopbackFactory {
    fn make_transport(
        &self,
        block: BlockId,
        direction: Direction,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (host, device) = loopback_pair(self.depth);
        self.device_ends.insert((block, direction), device);
        Ok(Box::new(host))
    }
}

// ── UDP ───────────────────────────────────────────────────────────────────────

/// One frame per datagram over a connected socket.
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind `local` with a kernel receive buffer of `recv_buff_size` bytes
    /// and connect to `remote`. The buffer is sized before the socket sees
    /// any traffic.
    pub async fn connect(
        local: SocketAddr,
        remote: SocketAddr,
        recv_buff_size: usize,
    ) -> Result<Self, TransportError> {
        let socket = make_udp_socket(local, recv_buff_size)?;
        let socket = UdpSocket::from_std(socket.into())?;
        socket.connect(remote).await?;
        tracing::debug!(%local, %remote, recv_buff_size, "udp transport connected");
        Ok(Self::from_socket(socket))
    }

    /// Receive buffer size the kernel actually granted.
    pub fn recv_buffer_size(&self) -> std::io::Result<usize> {
        SockRef::from(&self.socket).recv_buffer_size()
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_FRAME_SIZE],
        }
    }
}

fn make_udp_socket(local: SocketAddr, recv_buff_size: usize) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(recv_buff_size)?;
    let granted = socket.recv_buffer_size()?;
    if granted < recv_buff_size {
        tracing::warn!(
            requested = recv_buff_size,
            granted,
            "kernel granted a smaller receive buffer, raise net.core.rmem_max to avoid overflows"
        );
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    Ok(socket)
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, frame: Bytes) -> bool {
        match self.socket.send(&frame).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "udp send failed");
                false
            }
        }
    }

    async fn recv(&mut self, timeout: Duration) -> Recv {
        match tokio::time::timeout(timeout, self.socket.recv(&mut self.buf)).await {
            Ok(Ok(n)) => Recv::Frame(Bytes::copy_from_slice(&self.buf[..n])),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "udp recv failed");
                Recv::Closed
            }
            Err(_) => Recv::Timeout,
        }
    }
}
