//! VPN protocol model.
//!
//! A [`VpnProtocol`] is the transport tag the negotiator chooses between; a
//! [`ProtocolCandidate`] pairs it with the ports worth probing, in the order
//! they should be tried.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Transport protocols the client can establish a tunnel with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VpnProtocol {
    #[serde(rename = "wireguard")]
    WireGuard,
    #[serde(rename = "openvpn-udp")]
    OpenVpnUdp,
    #[serde(rename = "openvpn-tcp")]
    OpenVpnTcp,
    #[serde(rename = "ikev2")]
    Ikev2,
}

impl VpnProtocol {
    /// All protocols, in the default smart-protocol priority order.
    pub const ALL: [Self; 4] = [Self::WireGuard, Self::OpenVpnUdp, Self::OpenVpnTcp, Self::Ikev2];

    /// Stable lowercase name used in config files, CLI flags and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WireGuard => "wireguard",
            Self::OpenVpnUdp => "openvpn-udp",
            Self::OpenVpnTcp => "openvpn-tcp",
            Self::Ikev2 => "ikev2",
        }
    }

    /// Whether probing this protocol needs a stream connection.
    pub const fn is_tcp(self) -> bool {
        matches!(self, Self::OpenVpnTcp)
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VpnProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wireguard" | "wg" => Ok(Self::WireGuard),
            "openvpn-udp" | "openvpn_udp" => Ok(Self::OpenVpnUdp),
            "openvpn-tcp" | "openvpn_tcp" => Ok(Self::OpenVpnTcp),
            "ikev2" | "ike" => Ok(Self::Ikev2),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// A protocol together with its candidate ports, highest preference first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCandidate {
    pub protocol: VpnProtocol,
    pub ports: Vec<u16>,
}

impl ProtocolCandidate {
    pub fn new(protocol: VpnProtocol, ports: impl Into<Vec<u16>>) -> Self {
        Self {
            protocol,
            ports: ports.into(),
        }
    }
}
