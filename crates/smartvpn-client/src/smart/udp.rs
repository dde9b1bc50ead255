//! Datagram probes: WireGuard, `OpenVPN` over UDP and IKEv2.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use smartvpn_core::VpnProtocol;

use super::checker::AvailabilityChecker;
use super::handshake::Handshake;

const MAX_DATAGRAM: usize = 2048;

/// Sends one initiation datagram and waits for a matching reply.
#[derive(Debug, Clone, Copy)]
pub struct UdpChecker {
    protocol: VpnProtocol,
    handshake: Handshake,
}

impl UdpChecker {
    pub const fn new(protocol: VpnProtocol) -> Self {
        Self {
            protocol,
            handshake: Handshake::for_protocol(protocol),
        }
    }

    async fn exchange(&self, addr: SocketAddr) -> std::io::Result<bool> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        let request = self.handshake.initiation();
        socket.send(&request).await?;

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let n = socket.recv(&mut buf).await?;
            if self.handshake.accepts(&request, &buf[..n]) {
                return Ok(true);
            }
            debug!(protocol = %self.protocol, %addr, len = n, "Ignoring unrelated datagram");
        }
    }
}

#[async_trait]
impl AvailabilityChecker for UdpChecker {
    fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    async fn probe_port(&self, addr: SocketAddr) -> bool {
        match self.exchange(addr).await {
            Ok(ok) => ok,
            Err(e) => {
                debug!(protocol = %self.protocol, %addr, error = %e, "UDP probe failed");
                false
            }
        }
    }
}
