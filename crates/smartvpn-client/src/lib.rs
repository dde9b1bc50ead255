//! `SmartVPN` client core.
//!
//! Selects, establishes and keeps alive a VPN session:
//! - [`smart`]: protocol/port reachability probes and smart protocol selection
//! - [`preparer`]: tier gate, endpoint choice and connection descriptor creation
//! - [`refresh`]: client certificate renewal ahead of expiry
//! - [`session`]: recovery from control-channel errors of a live session
//!
//! Collaborators outside the core (secret store, tunnel data plane, alert
//! delivery, account information) are injected as trait objects.

pub mod account;
pub mod alerts;
pub mod clock;
pub mod descriptor;
pub mod preparer;
pub mod refresh;
pub mod server;
pub mod session;
pub mod smart;
pub mod transport;

pub use account::{AccountError, AccountProvider, StaticAccount, VpnCredentials};
pub use alerts::{Alert, AlertSink, LogAlertSink};
pub use clock::{Clock, SystemClock, TokioClock};
pub use descriptor::{ConnectionDescriptor, ContentInspection, DescriptorError};
pub use preparer::{ConnectionPreparer, ConnectionProtocol, ConnectionRequest, PrepareError};
pub use refresh::{
    ApiCertificateSigner, BackoffPolicy, CertificateRefreshScheduler, CertificateSigner,
    RefreshError, RefreshHandle, RefreshSettings, RefreshState, SignerError,
};
pub use server::{Server, ServerEndpoint, ServerList, Tier};
pub use session::{
    ConnectionState, RecoveryAction, SessionError, SessionErrorCode, SessionErrorHandler,
    TunnelEvent, TunnelState,
};
pub use smart::{
    AvailabilityChecker, CheckResult, CheckerRegistry, FileProtocolHistory, MemoryProtocolHistory,
    Negotiated, PortSelector, ProtocolHistory, SmartProtocolNegotiator,
};
pub use transport::{TransportError, TunnelTransport, WireguardConfigWriter};
