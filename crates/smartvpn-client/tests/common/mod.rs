//! Doubles shared by the integration tests: a recording tunnel, a scripted
//! certificate signer, canned checkers and an alert collector.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use smartvpn_client::refresh::{CertificateSigner, SignerError};
use smartvpn_client::smart::{AvailabilityChecker, CheckerRegistry};
use smartvpn_client::{
    Alert, AlertSink, ConnectionDescriptor, Server, ServerEndpoint, Tier, TransportError,
    TunnelTransport, VpnCredentials,
};
use smartvpn_core::VpnProtocol;
use smartvpn_crypto::{VpnCertificate, test_certificate};

/// Tunnel that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingTransport {
    pub connects: Mutex<Vec<ConnectionDescriptor>>,
    pub reconnects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl RecordingTransport {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelTransport for RecordingTransport {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError> {
        self.connects.lock().unwrap().push(descriptor.clone());
        Ok(())
    }

    async fn reconnect_control_channel(
        &self,
        _certificate: &VpnCertificate,
    ) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Signer that issues an hour-long certificate, or fails once `failing`
/// is set.
#[derive(Default)]
pub struct CountingSigner {
    pub calls: AtomicUsize,
    pub keys_seen: Mutex<Vec<String>>,
    pub failing: AtomicBool,
}

impl CountingSigner {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateSigner for CountingSigner {
    async fn sign(&self, public_key: &str) -> Result<VpnCertificate, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys_seen.lock().unwrap().push(public_key.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(SignerError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(fresh_certificate())
    }
}

/// Certificate not due for renewal for an hour.
pub fn fresh_certificate() -> VpnCertificate {
    test_certificate(
        SystemTime::now() + Duration::from_secs(3600),
        Duration::from_secs(3600),
    )
}

/// Checker answering from a fixed set of open ports.
pub struct CannedChecker {
    protocol: VpnProtocol,
    open: Vec<u16>,
    pub probes: AtomicUsize,
}

impl CannedChecker {
    pub fn new(protocol: VpnProtocol, open: &[u16]) -> Self {
        Self {
            protocol,
            open: open.to_vec(),
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AvailabilityChecker for CannedChecker {
    fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    async fn probe_port(&self, addr: SocketAddr) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.open.contains(&addr.port())
    }
}

/// Registry with one canned checker per protocol, plus handles to count
/// probes afterwards.
pub fn canned_checkers(
    open: &[(VpnProtocol, &[u16])],
) -> (CheckerRegistry, Vec<Arc<CannedChecker>>) {
    let mut registry: CheckerRegistry = HashMap::new();
    let mut handles = Vec::new();
    for protocol in VpnProtocol::ALL {
        let ports = open
            .iter()
            .find(|(p, _)| *p == protocol)
            .map_or(&[][..], |(_, ports)| *ports);
        let checker = Arc::new(CannedChecker::new(protocol, ports));
        handles.push(Arc::clone(&checker));
        registry.insert(protocol, checker);
    }
    (registry, handles)
}

pub fn total_probes(handles: &[Arc<CannedChecker>]) -> usize {
    handles.iter().map(|c| c.probes.load(Ordering::SeqCst)).sum()
}

#[derive(Default)]
pub struct CollectingAlerts {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlerts {
    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().unwrap())
    }
}

impl AlertSink for CollectingAlerts {
    fn push(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

pub fn credentials(max_tier: Tier) -> VpnCredentials {
    VpnCredentials {
        plan_name: "plus".into(),
        max_tier,
        max_connect: 10,
    }
}

pub fn endpoint(id: &str, last_octet: u8, under_maintenance: bool) -> ServerEndpoint {
    let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet));
    ServerEndpoint {
        id: id.into(),
        entry_ip: ip,
        exit_ip: ip,
        domain: format!("{id}.smartvpn.test"),
        under_maintenance,
        x25519_public_key: Some("yKbwPsqHn9cnvGUV3EF9dYLyDrhRBhqLNPyO+dMpMA0=".into()),
    }
}

pub fn server(tier: Tier, endpoints: Vec<ServerEndpoint>) -> Server {
    Server {
        name: "CH#1".into(),
        domain: "ch-01.smartvpn.test".into(),
        tier,
        endpoints,
    }
}
