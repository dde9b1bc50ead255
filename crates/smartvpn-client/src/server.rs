//! Logical VPN servers and their physical endpoints.

use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Subscription tier. A server may only be used by accounts whose tier is at
/// least the server's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(pub u8);

impl Tier {
    pub const FREE: Self = Self(0);
    pub const BASIC: Self = Self(1);
    pub const PLUS: Self = Self(2);
    pub const VISIONARY: Self = Self(3);
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FREE => f.write_str("free"),
            Self::BASIC => f.write_str("basic"),
            Self::PLUS => f.write_str("plus"),
            Self::VISIONARY => f.write_str("visionary"),
            Self(other) => write!(f, "tier-{other}"),
        }
    }
}

/// One physical endpoint of a logical server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub id: String,
    /// Address the tunnel connects to.
    pub entry_ip: IpAddr,
    /// Address traffic appears to come from.
    pub exit_ip: IpAddr,
    pub domain: String,
    #[serde(default)]
    pub under_maintenance: bool,
    /// Base64 X25519 key, required for WireGuard.
    #[serde(default)]
    pub x25519_public_key: Option<String>,
}

/// A logical server: a name users pick plus a pool of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub domain: String,
    pub tier: Tier,
    pub endpoints: Vec<ServerEndpoint>,
}

impl Server {
    /// Endpoints not under maintenance, in list order.
    pub fn available_endpoints(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.endpoints.iter().filter(|e| !e.under_maintenance)
    }
}

/// Server list as served by the API or cached on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerList {
    pub servers: Vec<Server>,
}

impl ServerList {
    pub fn load(path: &Path) -> smartvpn_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Case-insensitive lookup by server name.
    pub fn find(&self, name: &str) -> Option<&Server> {
        self.servers
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}
