//! Smart protocol selection.
//!
//! Every candidate protocol is probed concurrently. The highest-priority
//! protocol with at least one reachable port wins and its reachable ports,
//! in configured order, become the failover list. Waiting stops as soon as
//! the outcome can no longer change or the negotiation ceiling elapses.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use smartvpn_core::config::SmartProtocolConfig;
use smartvpn_core::{ProtocolCandidate, VpnProtocol};

use super::CheckerRegistry;
use super::checker::{CheckResult, probe_ports};
use super::history::ProtocolHistory;

/// The negotiated protocol and the ports to try, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub protocol: VpnProtocol,
    pub ports: Vec<u16>,
    /// True when nothing answered and the protocol came from history or
    /// the configured default.
    pub fallback: bool,
}

/// Pick the winner from a set of probe results.
///
/// Depends only on which `(protocol, port)` pairs are reachable and on the
/// order of `candidates`; the order of `results` is irrelevant.
pub fn select(candidates: &[ProtocolCandidate], results: &[CheckResult]) -> Option<Negotiated> {
    let reachable: HashSet<(VpnProtocol, u16)> = results
        .iter()
        .filter(|r| r.reachable)
        .map(|r| (r.protocol, r.port))
        .collect();

    candidates.iter().find_map(|candidate| {
        let ports: Vec<u16> = candidate
            .ports
            .iter()
            .copied()
            .filter(|port| reachable.contains(&(candidate.protocol, *port)))
            .collect();
        (!ports.is_empty()).then(|| Negotiated {
            protocol: candidate.protocol,
            ports,
            fallback: false,
        })
    })
}

/// Protocol to use when nothing answered.
///
/// The remembered protocol wins over the default, but only protocols the
/// user allowed (present in `candidates`) are considered. With neither
/// allowed the first candidate is used. The full configured port list is
/// returned since no port was confirmed.
pub fn fallback(
    candidates: &[ProtocolCandidate],
    last_working: Option<VpnProtocol>,
    default_protocol: VpnProtocol,
) -> Option<Negotiated> {
    let find = |protocol: VpnProtocol| candidates.iter().find(|c| c.protocol == protocol);
    last_working
        .and_then(find)
        .or_else(|| find(default_protocol))
        .or_else(|| candidates.first())
        .map(|candidate| Negotiated {
            protocol: candidate.protocol,
            ports: candidate.ports.clone(),
            fallback: true,
        })
}

/// Whether `results` can no longer change the winner: every protocol ranked
/// above the current best has reported.
fn settled(
    candidates: &[ProtocolCandidate],
    completed: &HashSet<VpnProtocol>,
    results: &[CheckResult],
) -> bool {
    let Some(best) = select(candidates, results) else {
        return false;
    };
    candidates
        .iter()
        .take_while(|c| c.protocol != best.protocol)
        .all(|c| completed.contains(&c.protocol))
}

pub struct SmartProtocolNegotiator {
    candidates: Vec<ProtocolCandidate>,
    checkers: CheckerRegistry,
    history: Arc<dyn ProtocolHistory>,
    default_protocol: VpnProtocol,
    probe_timeout: Duration,
    ceiling: Duration,
}

impl SmartProtocolNegotiator {
    /// `candidates` must be in priority order and non-empty.
    pub fn new(
        candidates: Vec<ProtocolCandidate>,
        checkers: CheckerRegistry,
        history: Arc<dyn ProtocolHistory>,
        settings: &SmartProtocolConfig,
    ) -> Self {
        Self {
            candidates,
            checkers,
            history,
            default_protocol: settings.default_protocol,
            probe_timeout: settings.probe_timeout(),
            ceiling: settings.negotiation_timeout(),
        }
    }

    /// Probe all candidates against `host` and pick a protocol.
    ///
    /// Returns `None` only when there are no candidates at all.
    pub async fn negotiate(&self, host: IpAddr) -> Option<Negotiated> {
        let results = self.collect_results(host).await;

        if let Some(winner) = select(&self.candidates, &results) {
            info!(
                %host,
                protocol = %winner.protocol,
                ports = ?winner.ports,
                "Smart protocol selected"
            );
            self.history.record(winner.protocol);
            return Some(winner);
        }

        let chosen = fallback(
            &self.candidates,
            self.history.last_working(),
            self.default_protocol,
        )?;
        warn!(
            %host,
            protocol = %chosen.protocol,
            "No protocol responded, falling back"
        );
        Some(chosen)
    }

    async fn collect_results(&self, host: IpAddr) -> Vec<CheckResult> {
        let mut completed = HashSet::new();
        let mut set = JoinSet::new();
        for candidate in &self.candidates {
            let Some(checker) = self.checkers.get(&candidate.protocol) else {
                warn!(protocol = %candidate.protocol, "No availability checker registered");
                completed.insert(candidate.protocol);
                continue;
            };
            let checker = Arc::clone(checker);
            let ports = candidate.ports.clone();
            let protocol = candidate.protocol;
            let timeout = self.probe_timeout;
            set.spawn(async move {
                let results = probe_ports(&checker, host, &ports, timeout).await;
                (protocol, results)
            });
        }

        let deadline = tokio::time::Instant::now() + self.ceiling;
        let mut results = Vec::new();
        loop {
            if settled(&self.candidates, &completed, &results) {
                debug!(%host, pending = set.len(), "Negotiation settled early");
                break;
            }
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((protocol, batch)))) => {
                    debug!(%protocol, ?batch, "Probe set finished");
                    completed.insert(protocol);
                    results.extend(batch);
                }
                Ok(Some(Err(e))) => warn!(error = %e, "Probe set task failed"),
                Ok(None) => break,
                Err(_) => {
                    debug!(%host, pending = set.len(), "Negotiation ceiling reached");
                    break;
                }
            }
        }
        // Dropping the set aborts whatever is still probing.
        results
    }
}
