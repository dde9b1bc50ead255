//! Stream probe for `OpenVPN` over TCP.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use smartvpn_core::VpnProtocol;

use super::checker::AvailabilityChecker;
use super::handshake::{Handshake, frame_for_stream};

/// Sends a length-framed hard reset and reads one framed reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenVpnTcpChecker;

impl OpenVpnTcpChecker {
    async fn exchange(addr: SocketAddr) -> std::io::Result<bool> {
        let mut stream = TcpStream::connect(addr).await?;
        let request = Handshake::OpenVpn.initiation();
        let framed = frame_for_stream(&request).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "probe packet too large")
        })?;
        stream.write_all(&framed).await?;

        let len = stream.read_u16().await?;
        let mut response = vec![0u8; usize::from(len)];
        stream.read_exact(&mut response).await?;
        Ok(Handshake::OpenVpn.accepts(&request, &response))
    }
}

#[async_trait]
impl AvailabilityChecker for OpenVpnTcpChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpnTcp
    }

    async fn probe_port(&self, addr: SocketAddr) -> bool {
        match Self::exchange(addr).await {
            Ok(ok) => ok,
            Err(e) => {
                debug!(%addr, error = %e, "OpenVPN TCP probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::smart::handshake::responder::reply;

    async fn spawn_responder() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let len = stream.read_u16().await.unwrap();
                let mut request = vec![0u8; usize::from(len)];
                stream.read_exact(&mut request).await.unwrap();
                let framed = frame_for_stream(&reply(Handshake::OpenVpn, &request)).unwrap();
                stream.write_all(&framed).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn detects_openvpn_tcp_on_loopback() {
        let addr = spawn_responder().await;
        assert!(OpenVpnTcpChecker.probe_port(addr).await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!OpenVpnTcpChecker.probe_port(addr).await);
    }
}
