// UDP transport module

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::net::UdpSocket;

use crate::error::SipPingError;

/// Largest datagram read from the socket.
pub const MAX_DATAGRAM_SIZE: usize = 0xffff;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SipPingError>> + Send + 'a>>;

/// Send one datagram, receive one datagram. The probe loop only ever talks
/// to the network through this trait.
pub trait SipTransport: Send + Sync {
    fn send_to<'a>(&'a self, data: &'a [u8], addr: SocketAddr) -> TransportFuture<'a, ()>;

    fn recv_from(&self) -> TransportFuture<'_, (Vec<u8>, SocketAddr)>;
}

/// A single UDP socket used for both directions.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind the socket. Port 0 lets the OS pick an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SipPingError> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(local = ?socket.local_addr().ok(), "bound UDP socket");
        Ok(Self { socket })
    }

    /// Returns the local address of the socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

impl SipTransport for UdpTransport {
    fn send_to<'a>(&'a self, data: &'a [u8], addr: SocketAddr) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.socket.send_to(data, addr).await?;
            Ok(())
        })
    }

    fn recv_from(&self) -> TransportFuture<'_, (Vec<u8>, SocketAddr)> {
        Box::pin(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok((buf, from))
        })
    }
}

/// Resolve `host:port`, preferring an address of the same family as `local`.
pub async fn resolve_destination(
    host: &str,
    port: u16,
    local: SocketAddr,
) -> Result<SocketAddr, SipPingError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SipPingError::ConfigError(format!("cannot resolve {}: {}", host, e)))?
        .collect();

    candidates
        .iter()
        .find(|a| a.is_ipv4() == local.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| SipPingError::ConfigError(format!("no address found for {}", host)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn bind_ephemeral_port() {
        let transport = UdpTransport::bind(loopback()).await.expect("bind");
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn bind_twice_to_same_port_fails() {
        let first = UdpTransport::bind(loopback()).await.expect("bind");
        let taken = first.local_addr().unwrap();
        let result = UdpTransport::bind(taken).await;
        assert!(matches!(result, Err(SipPingError::NetworkError(_))));
    }

    #[tokio::test]
    async fn send_and_recv_roundtrip() {
        let sender = UdpTransport::bind(loopback()).await.expect("sender bind");
        let receiver = UdpTransport::bind(loopback()).await.expect("receiver bind");
        let recv_addr = receiver.local_addr().unwrap();

        let payload = b"SIP/2.0 200 OK\r\n\r\n";
        sender.send_to(payload, recv_addr).await.expect("send");

        let (data, from) = receiver.recv_from().await.expect("recv");
        assert_eq!(&data, payload);
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn recv_without_traffic_blocks() {
        let transport = UdpTransport::bind(loopback()).await.expect("bind");
        let result = tokio::time::timeout(Duration::from_millis(50), transport.recv_from()).await;
        assert!(result.is_err(), "recv_from should still be waiting");
    }

    #[tokio::test]
    async fn recv_large_datagram() {
        let sender = UdpTransport::bind(loopback()).await.expect("bind");
        let receiver = UdpTransport::bind(loopback()).await.expect("bind");
        let payload = vec![b'x'; 8000];
        sender
            .send_to(&payload, receiver.local_addr().unwrap())
            .await
            .expect("send");
        let (data, _) = receiver.recv_from().await.expect("recv");
        assert_eq!(data.len(), 8000);
    }

    #[tokio::test]
    async fn resolve_ip_literal() {
        let addr = resolve_destination("127.0.0.1", 5060, loopback()).await.unwrap();
        assert_eq!(addr, "127.0.0.1:5060".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn resolve_localhost_prefers_ipv4_for_ipv4_socket() {
        let addr = resolve_destination("localhost", 5080, loopback()).await.unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 5080);
    }
}
