//! Smart protocol selection: per-protocol reachability probes, the
//! negotiator that ranks their results, and the pinned-protocol port
//! selector.

use std::collections::HashMap;
use std::sync::Arc;

use smartvpn_core::VpnProtocol;

pub mod checker;
pub mod handshake;
pub mod history;
pub mod negotiator;
pub mod port_selector;
pub mod tcp;
pub mod udp;

pub use checker::{AvailabilityChecker, CheckResult, probe_ports, reachable_ports};
pub use history::{FileProtocolHistory, MemoryProtocolHistory, ProtocolHistory};
pub use negotiator::{Negotiated, SmartProtocolNegotiator};
pub use port_selector::PortSelector;
pub use tcp::OpenVpnTcpChecker;
pub use udp::UdpChecker;

/// One checker per protocol.
pub type CheckerRegistry = HashMap<VpnProtocol, Arc<dyn AvailabilityChecker>>;

/// Network checkers for every supported protocol.
pub fn default_checkers() -> CheckerRegistry {
    VpnProtocol::ALL
        .into_iter()
        .map(|protocol| {
            let checker: Arc<dyn AvailabilityChecker> = if protocol.is_tcp() {
                Arc::new(OpenVpnTcpChecker)
            } else {
                Arc::new(UdpChecker::new(protocol))
            };
            (protocol, checker)
        })
        .collect()
}
