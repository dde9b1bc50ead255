//! Configuration resolution for `SmartVPN`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/smartvpn/settings.json)
//! 3. Explicit config file (e.g. `--config` on the command line)
//! 4. Environment variables
//! 5. CLI arguments (applied by the binary, highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{ProtocolCandidate, VpnProtocol};

/// Complete `SmartVPN` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub smart_protocol: SmartProtocolConfig,
    #[serde(default)]
    pub wireguard: WireguardConfig,
    #[serde(default)]
    pub openvpn: OpenVpnConfig,
    #[serde(default)]
    pub ikev2: Ikev2Config,
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smart_protocol: SmartProtocolConfig::default(),
            wireguard: WireguardConfig::default(),
            openvpn: OpenVpnConfig::default(),
            ikev2: Ikev2Config::default(),
            certificate: CertificateConfig::default(),
            api: ApiConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Smart protocol negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartProtocolConfig {
    /// Protocols to probe, highest priority first.
    pub priority: Vec<VpnProtocol>,
    /// Protocol used when nothing responds and no protocol is remembered.
    pub default_protocol: VpnProtocol,
    /// Per-port response timeout (milliseconds).
    pub probe_timeout_ms: u64,
    /// Ceiling for the whole negotiation (milliseconds).
    pub negotiation_timeout_ms: u64,
}

impl Default for SmartProtocolConfig {
    fn default() -> Self {
        Self {
            priority: VpnProtocol::ALL.to_vec(),
            default_protocol: VpnProtocol::OpenVpnUdp,
            probe_timeout_ms: 1_000,
            negotiation_timeout_ms: 3_000,
        }
    }
}

impl SmartProtocolConfig {
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub const fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}

/// WireGuard interface settings and candidate ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    pub ports: Vec<u16>,
    pub address: String,
    pub dns: String,
    pub allowed_ips: String,
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            ports: vec![51820],
            address: "10.2.0.2/32".to_string(),
            dns: "10.2.0.1".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
        }
    }
}

/// `OpenVPN` candidate ports per transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVpnConfig {
    pub udp_ports: Vec<u16>,
    pub tcp_ports: Vec<u16>,
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            udp_ports: vec![80, 51820, 4569, 1194, 5060],
            tcp_ports: vec![443, 7770, 8443],
        }
    }
}

/// IKEv2 candidate ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ikev2Config {
    pub ports: Vec<u16>,
}

impl Default for Ikev2Config {
    fn default() -> Self {
        Self { ports: vec![500] }
    }
}

/// Client certificate refresh timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Seconds subtracted from the server-declared refresh time.
    pub refresh_skew_secs: u64,
    /// First retry delay unit; the n-th consecutive failure waits `base * 2^n`.
    pub backoff_base_secs: u64,
    /// Upper bound for a single retry delay.
    pub max_backoff_secs: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            refresh_skew_secs: 60,
            backoff_base_secs: 10,
            max_backoff_secs: 60 * 60,
        }
    }
}

/// VPN API endpoint used for certificate signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.protonvpn.ch".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Candidate ports configured for `protocol`.
    pub fn ports_for(&self, protocol: VpnProtocol) -> &[u16] {
        match protocol {
            VpnProtocol::WireGuard => &self.wireguard.ports,
            VpnProtocol::OpenVpnUdp => &self.openvpn.udp_ports,
            VpnProtocol::OpenVpnTcp => &self.openvpn.tcp_ports,
            VpnProtocol::Ikev2 => &self.ikev2.ports,
        }
    }

    /// Candidate for a single (possibly pinned) protocol.
    pub fn candidate_for(&self, protocol: VpnProtocol) -> ProtocolCandidate {
        ProtocolCandidate::new(protocol, self.ports_for(protocol))
    }

    /// Smart-protocol candidates in priority order, duplicates removed.
    pub fn smart_candidates(&self) -> Vec<ProtocolCandidate> {
        let mut seen = Vec::with_capacity(self.smart_protocol.priority.len());
        for protocol in &self.smart_protocol.priority {
            if !seen.contains(protocol) {
                seen.push(*protocol);
            }
        }
        seen.into_iter().map(|p| self.candidate_for(p)).collect()
    }

    /// Reject settings the rest of the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.smart_protocol.priority.is_empty() {
            return Err(Error::Config(
                "smart_protocol.priority must list at least one protocol".into(),
            ));
        }
        if self.smart_protocol.probe_timeout_ms == 0 {
            return Err(Error::Config("smart_protocol.probe_timeout_ms must be > 0".into()));
        }
        if self.smart_protocol.negotiation_timeout_ms == 0 {
            return Err(Error::Config(
                "smart_protocol.negotiation_timeout_ms must be > 0".into(),
            ));
        }
        for protocol in VpnProtocol::ALL {
            if self.ports_for(protocol).is_empty() {
                return Err(Error::Config(format!("no candidate ports for {protocol}")));
            }
        }
        if self.certificate.backoff_base_secs == 0 {
            return Err(Error::Config("certificate.backoff_base_secs must be > 0".into()));
        }
        if self.certificate.max_backoff_secs < self.certificate.backoff_base_secs {
            return Err(Error::Config(
                "certificate.max_backoff_secs must be >= backoff_base_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|path| path.exists());
    let mut config = load_layered(global.as_deref(), explicit)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse `global` and then `explicit` on top of it. Keys the explicit file
/// does not mention keep the global (or default) value.
pub fn load_layered(global: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in [global, explicit].into_iter().flatten() {
        merge_config(&mut merged, read_config_value(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Failed to parse layered config: {e}")))
}

/// Objects merge key by key; any other overlay value replaces the base.
fn merge_config(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".smartvpn").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/smartvpn/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("smartvpn").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Apply `SMARTVPN_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("SMARTVPN_PROBE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.smart_protocol.probe_timeout_ms = n;
    }
    if let Some(n) = lookup("SMARTVPN_NEGOTIATION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.smart_protocol.negotiation_timeout_ms = n;
    }
    if let Some(p) = lookup("SMARTVPN_DEFAULT_PROTOCOL").and_then(|v| v.parse().ok()) {
        config.smart_protocol.default_protocol = p;
    }
    if let Some(url) = lookup("SMARTVPN_API_URL") {
        config.api.base_url = url;
    }
    if let Some(level) = lookup("SMARTVPN_LOG_LEVEL") {
        config.log_level = level;
    }
}
