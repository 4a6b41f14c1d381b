//! Outbound connection factory
//!
//! Command handlers never dial directly; they go through the [`Dialer`]
//! capability so deployments can route outbound traffic through an upstream
//! proxy, a specific interface, or a test fixture.

use async_trait::async_trait;
use std::io;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Factory for outbound connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establish a TCP connection to `addr` (a `host:port` string).
    async fn connect_tcp(&self, cancel: &CancellationToken, addr: &str) -> io::Result<TcpStream>;

    /// Create a UDP socket connected to `addr` (a `host:port` string).
    ///
    /// The returned socket is bound to an ephemeral local port and
    /// `connect`ed, so plain `send`/`recv` talk to the destination only.
    async fn connect_udp(&self, cancel: &CancellationToken, addr: &str) -> io::Result<UdpSocket>;
}

/// Default dialer using the operating system's routing table.
#[derive(Debug, Default)]
pub struct SystemDialer;

#[async_trait]
impl Dialer for SystemDialer {
    async fn connect_tcp(&self, cancel: &CancellationToken, addr: &str) -> io::Result<TcpStream> {
        tokio::select! {
            res = TcpStream::connect(addr) => res,
            _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")),
        }
    }

    async fn connect_udp(&self, cancel: &CancellationToken, addr: &str) -> io::Result<UdpSocket> {
        let connect = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(addr).await?;
            Ok(socket)
        };
        tokio::select! {
            res = connect => res,
            _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")),
        }
    }
}
