//! How probe datagrams reach a target.
//!
//! The prober only sees the [`Transport`] capability, so direct delivery and
//! any proxied delivery are interchangeable.
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Opens datagram channels to targets.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a channel that only exchanges datagrams with `target`.
    async fn open(&self, target: SocketAddr) -> io::Result<Box<dyn DatagramChannel>>;
}

/// A channel bound to a single remote (address, port).
///
/// An ICMP port unreachable for the remote must surface as
/// [`io::ErrorKind::ConnectionRefused`] (or `ConnectionReset`) from `send`
/// or `recv`.
#[async_trait]
pub trait DatagramChannel: Send + Sync {
    async fn send(&self, payload: &[u8]) -> io::Result<usize>;

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Whether an I/O error is the transport-level rejection of a closed port.
pub fn is_rejection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Sends straight from an ephemeral local UDP socket.
///
/// Every channel is its own connected socket, so the kernel only delivers
/// datagrams and ICMP errors from that remote to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTransport;

impl DirectTransport {
    async fn udp_bind(target: SocketAddr) -> io::Result<UdpSocket> {
        let local_addr = match target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        UdpSocket::bind(local_addr).await
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn open(&self, target: SocketAddr) -> io::Result<Box<dyn DatagramChannel>> {
        let socket = Self::udp_bind(target).await?;
        socket.connect(target).await?;
        Ok(Box::new(DirectChannel { socket }))
    }
}

struct DirectChannel {
    socket: UdpSocket,
}

#[async_trait]
impl DatagramChannel for DirectChannel {
    async fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}
