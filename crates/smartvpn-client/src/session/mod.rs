//! Live session supervision: connection state, control-channel events and
//! error recovery.

use serde::{Deserialize, Serialize};

use crate::descriptor::ContentInspection;

pub mod error_code;
pub mod handler;

pub use error_code::{DisconnectAlert, RecoveryAction, SessionErrorCode, recovery_for};
pub use handler::{SessionError, SessionErrorHandler};

/// Connection state as seen by the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// State reported by the tunnel's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelState {
    Connecting,
    Connected,
    Disconnected,
    /// The tunnel rejected the client certificate while connecting.
    ClientCertificateError,
}

/// Event emitted by a [`TunnelTransport`](crate::transport::TunnelTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum TunnelEvent {
    State(TunnelState),
    Error(SessionErrorCode),
    /// The server applied a different content-inspection level.
    ContentInspection(ContentInspection),
    /// The server reported whether VPN Accelerator is active.
    Accelerator(bool),
}
