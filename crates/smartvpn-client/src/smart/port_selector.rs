//! Port selection for a user-pinned protocol.

use std::net::IpAddr;
use std::time::Duration;

use tracing::{info, warn};

use smartvpn_core::ProtocolCandidate;

use super::CheckerRegistry;
use super::checker::{probe_ports, reachable_ports};

pub struct PortSelector {
    checkers: CheckerRegistry,
    probe_timeout: Duration,
}

impl PortSelector {
    pub const fn new(checkers: CheckerRegistry, probe_timeout: Duration) -> Self {
        Self {
            checkers,
            probe_timeout,
        }
    }

    /// Reachable ports of `candidate` in configured order, or the whole
    /// configured list when none answer.
    pub async fn select_ports(&self, candidate: &ProtocolCandidate, host: IpAddr) -> Vec<u16> {
        let Some(checker) = self.checkers.get(&candidate.protocol) else {
            warn!(protocol = %candidate.protocol, "No availability checker registered");
            return candidate.ports.clone();
        };

        let results = probe_ports(checker, host, &candidate.ports, self.probe_timeout).await;
        let reachable = reachable_ports(&results);
        if reachable.is_empty() {
            warn!(
                %host,
                protocol = %candidate.protocol,
                "No port responded, keeping full port list"
            );
            return candidate.ports.clone();
        }
        info!(%host, protocol = %candidate.protocol, ports = ?reachable, "Ports selected");
        reachable
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use async_trait::async_trait;
    use smartvpn_core::VpnProtocol;

    use super::*;
    use crate::smart::checker::AvailabilityChecker;

    struct OpenPorts(Vec<u16>);

    #[async_trait]
    impl AvailabilityChecker for OpenPorts {
        fn protocol(&self) -> VpnProtocol {
            VpnProtocol::OpenVpnUdp
        }

        async fn probe_port(&self, addr: SocketAddr) -> bool {
            self.0.contains(&addr.port())
        }
    }

    fn selector(open: &[u16]) -> PortSelector {
        let checker: Arc<dyn AvailabilityChecker> = Arc::new(OpenPorts(open.to_vec()));
        PortSelector::new(
            HashMap::from([(VpnProtocol::OpenVpnUdp, checker)]),
            Duration::from_millis(100),
        )
    }

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn returns_reachable_subset_in_configured_order() {
        let candidate =
            ProtocolCandidate::new(VpnProtocol::OpenVpnUdp, [80, 51820, 4569, 1194, 5060]);
        let ports = selector(&[5060, 80, 1194]).select_ports(&candidate, HOST).await;
        assert_eq!(ports, vec![80, 1194, 5060]);
    }

    #[tokio::test]
    async fn nothing_reachable_keeps_candidate_list() {
        let candidate = ProtocolCandidate::new(VpnProtocol::OpenVpnUdp, [1194, 80]);
        let ports = selector(&[]).select_ports(&candidate, HOST).await;
        assert_eq!(ports, vec![1194, 80]);
    }

    #[tokio::test]
    async fn unknown_protocol_keeps_candidate_list() {
        let candidate = ProtocolCandidate::new(VpnProtocol::Ikev2, [500, 4500]);
        let ports = selector(&[500]).select_ports(&candidate, HOST).await;
        assert_eq!(ports, vec![500, 4500]);
    }
}
