//! Immutable description of one connection attempt.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smartvpn_core::VpnProtocol;
use smartvpn_core::config::WireguardConfig;
use smartvpn_crypto::VpnKeys;

use crate::server::{Server, ServerEndpoint};

/// Server-side content filtering level requested for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentInspection {
    #[default]
    Off,
    /// Block malware.
    Level1,
    /// Block malware, ads and trackers.
    Level2,
}

impl FromStr for ContentInspection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(Self::Off),
            "1" | "level1" => Ok(Self::Level1),
            "2" | "level2" => Ok(Self::Level2),
            other => Err(format!("unknown content inspection level: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("cannot render a WireGuard configuration for {0}")]
    NotWireGuard(VpnProtocol),

    #[error("descriptor has no ports")]
    NoPorts,

    #[error("endpoint {endpoint} has no X25519 public key")]
    MissingServerKey { endpoint: String },
}

/// Everything the tunnel needs for one attempt.
///
/// Built once per attempt and never mutated. Every attempt gets its own
/// `attempt_id`, so two descriptors with otherwise equal fields still compare
/// unequal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    attempt_id: Uuid,
    server: Server,
    endpoint: ServerEndpoint,
    protocol: VpnProtocol,
    content_inspection: ContentInspection,
    /// Ports to try, in order; the first is the primary.
    ports: Vec<u16>,
}

impl ConnectionDescriptor {
    pub fn new(
        server: Server,
        endpoint: ServerEndpoint,
        protocol: VpnProtocol,
        ports: Vec<u16>,
        content_inspection: ContentInspection,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            server,
            endpoint,
            protocol,
            content_inspection,
            ports,
        }
    }

    pub const fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub const fn server(&self) -> &Server {
        &self.server
    }

    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub const fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    pub const fn content_inspection(&self) -> ContentInspection {
        self.content_inspection
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Same attempt with a different content-inspection level.
    #[must_use]
    pub fn with_content_inspection(&self, level: ContentInspection) -> Self {
        Self {
            content_inspection: level,
            ..self.clone()
        }
    }

    /// Render a `wg-quick` style configuration for this descriptor.
    pub fn to_wireguard_config(
        &self,
        keys: &VpnKeys,
        wireguard: &WireguardConfig,
    ) -> Result<String, DescriptorError> {
        if self.protocol != VpnProtocol::WireGuard {
            return Err(DescriptorError::NotWireGuard(self.protocol));
        }
        let port = *self.ports.first().ok_or(DescriptorError::NoPorts)?;
        let server_key = self.endpoint.x25519_public_key.as_deref().ok_or_else(|| {
            DescriptorError::MissingServerKey {
                endpoint: self.endpoint.id.clone(),
            }
        })?;
        let endpoint = SocketAddr::new(self.endpoint.entry_ip, port);

        let mut out = String::new();
        let _ = writeln!(out, "[Interface]");
        let _ = writeln!(out, "PrivateKey = {}", keys.private_base64());
        let _ = writeln!(out, "Address = {}", wireguard.address);
        let _ = writeln!(out, "DNS = {}", wireguard.dns);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey = {server_key}");
        let _ = writeln!(out, "AllowedIPs = {}", wireguard.allowed_ips);
        let _ = writeln!(out, "Endpoint = {endpoint}");
        Ok(out)
    }
}
