//! Reachability probing of one protocol over a set of ports.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use smartvpn_core::VpnProtocol;

/// Outcome of probing one port of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckResult {
    pub protocol: VpnProtocol,
    pub port: u16,
    pub reachable: bool,
}

/// A protocol-specific probe.
///
/// Implementations send one handshake initiation to `addr` and return
/// whether a matching response arrived. They should not time out on their
/// own: [`probe_ports`] bounds every call.
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    fn protocol(&self) -> VpnProtocol;

    async fn probe_port(&self, addr: SocketAddr) -> bool;
}

/// Probe every port concurrently, each bounded by `timeout`.
///
/// Results come back in the order of `ports`. A silent or failing port is
/// simply unreachable; this never errors.
pub async fn probe_ports(
    checker: &Arc<dyn AvailabilityChecker>,
    host: IpAddr,
    ports: &[u16],
    timeout: Duration,
) -> Vec<CheckResult> {
    let protocol = checker.protocol();
    let mut set = JoinSet::new();
    for (index, &port) in ports.iter().enumerate() {
        let checker = Arc::clone(checker);
        set.spawn(async move {
            let addr = SocketAddr::new(host, port);
            let reachable = tokio::time::timeout(timeout, checker.probe_port(addr))
                .await
                .unwrap_or_else(|_| {
                    debug!(%protocol, %addr, "Probe timed out");
                    false
                });
            (index, reachable)
        });
    }

    let mut reachable = vec![false; ports.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, ok)) => reachable[index] = ok,
            Err(e) => warn!(%protocol, error = %e, "Probe task failed"),
        }
    }

    ports
        .iter()
        .zip(reachable)
        .map(|(&port, reachable)| CheckResult {
            protocol,
            port,
            reachable,
        })
        .collect()
}

/// Reachable ports from `results`, in result order.
pub fn reachable_ports(results: &[CheckResult]) -> Vec<u16> {
    results
        .iter()
        .filter(|r| r.reachable)
        .map(|r| r.port)
        .collect()
}
