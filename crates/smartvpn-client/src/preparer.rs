//! Turns a connection request into an immutable descriptor and hands it to
//! the tunnel transport.
//!
//! Order matters: the tier gate runs before any network I/O, endpoint
//! choice before probing, probing before the descriptor exists.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use smartvpn_core::{Config, VpnProtocol};

use crate::account::{AccountError, AccountProvider};
use crate::alerts::{Alert, AlertSink};
use crate::descriptor::{ConnectionDescriptor, ContentInspection};
use crate::server::{Server, ServerEndpoint, Tier};
use crate::smart::{CheckerRegistry, PortSelector, ProtocolHistory, SmartProtocolNegotiator};
use crate::transport::{TransportError, TunnelTransport};

/// How the protocol for a connection is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionProtocol {
    Smart,
    Pinned(VpnProtocol),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub server: Server,
    pub protocol: ConnectionProtocol,
    pub content_inspection: ContentInspection,
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("server {server} requires tier {required}, account allows {allowed}")]
    TierTooLow {
        server: String,
        required: Tier,
        allowed: Tier,
    },

    #[error("no endpoint of server {server} is available")]
    NoEndpointAvailable { server: String },

    #[error("no protocol candidates configured")]
    NoProtocol,

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct ConnectionPreparer {
    config: Arc<Config>,
    negotiator: SmartProtocolNegotiator,
    port_selector: PortSelector,
    accounts: Arc<dyn AccountProvider>,
    alerts: Arc<dyn AlertSink>,
    transport: Arc<dyn TunnelTransport>,
}

impl ConnectionPreparer {
    pub fn new(
        config: Arc<Config>,
        checkers: CheckerRegistry,
        history: Arc<dyn ProtocolHistory>,
        accounts: Arc<dyn AccountProvider>,
        alerts: Arc<dyn AlertSink>,
        transport: Arc<dyn TunnelTransport>,
    ) -> Self {
        let negotiator = SmartProtocolNegotiator::new(
            config.smart_candidates(),
            checkers.clone(),
            history,
            &config.smart_protocol,
        );
        let port_selector = PortSelector::new(checkers, config.smart_protocol.probe_timeout());
        Self {
            config,
            negotiator,
            port_selector,
            accounts,
            alerts,
            transport,
        }
    }

    /// Build the descriptor for `request` without connecting.
    pub async fn prepare(
        &self,
        request: &ConnectionRequest,
    ) -> Result<ConnectionDescriptor, PrepareError> {
        let server = &request.server;

        let allowed = self.accounts.credentials()?.max_tier;
        if server.tier > allowed {
            warn!(server = %server.name, required = %server.tier, %allowed, "Tier too low");
            self.alerts.push(Alert::UpgradeRequired {
                server: server.name.clone(),
                required: server.tier,
            });
            return Err(PrepareError::TierTooLow {
                server: server.name.clone(),
                required: server.tier,
                allowed,
            });
        }

        let endpoint = self.pick_endpoint(server)?;
        let host = endpoint.entry_ip;

        let (protocol, ports) = match request.protocol {
            ConnectionProtocol::Smart => {
                let negotiated = self
                    .negotiator
                    .negotiate(host)
                    .await
                    .ok_or(PrepareError::NoProtocol)?;
                (negotiated.protocol, negotiated.ports)
            }
            ConnectionProtocol::Pinned(protocol) => {
                let candidate = self.config.candidate_for(protocol);
                (protocol, self.port_selector.select_ports(&candidate, host).await)
            }
        };

        let descriptor = ConnectionDescriptor::new(
            server.clone(),
            endpoint,
            protocol,
            ports,
            request.content_inspection,
        );
        info!(
            attempt_id = %descriptor.attempt_id(),
            server = %server.name,
            endpoint = %descriptor.endpoint().id,
            %protocol,
            ports = ?descriptor.ports(),
            "Connection prepared"
        );
        Ok(descriptor)
    }

    /// Prepare `request` and start the tunnel with the result.
    pub async fn connect(
        &self,
        request: &ConnectionRequest,
    ) -> Result<ConnectionDescriptor, PrepareError> {
        let descriptor = self.prepare(request).await?;
        self.transport.connect(&descriptor).await?;
        Ok(descriptor)
    }

    /// Uniform random choice among endpoints not under maintenance.
    fn pick_endpoint(&self, server: &Server) -> Result<ServerEndpoint, PrepareError> {
        let available: Vec<&ServerEndpoint> = server.available_endpoints().collect();
        available
            .choose(&mut rand::thread_rng())
            .map(|&endpoint| endpoint.clone())
            .ok_or_else(|| {
                warn!(server = %server.name, "All endpoints under maintenance");
                self.alerts.push(Alert::ServerUnavailable {
                    server: server.name.clone(),
                });
                PrepareError::NoEndpointAvailable {
                    server: server.name.clone(),
                }
            })
    }
}
