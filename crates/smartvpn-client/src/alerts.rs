//! User-facing alerts. Delivery is fire-and-forget.

use tracing::warn;

use crate::account::VpnCredentials;
use crate::server::Tier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// The server requires a higher plan than the user has.
    UpgradeRequired { server: String, required: Tier },
    /// Every endpoint of the server is under maintenance.
    ServerUnavailable { server: String },
    /// Too many simultaneous sessions for the user's plan.
    MaxSessions { credentials: VpnCredentials },
    ServerError,
    DelinquentUser,
    SubscriptionRequired,
    /// A certificate renewal needed for recovery did not succeed.
    CertificateRefreshFailed { reason: String },
}

pub trait AlertSink: Send + Sync {
    fn push(&self, alert: Alert);
}

/// Sink that only logs; used by the command-line client.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn push(&self, alert: Alert) {
        warn!(?alert, "User alert");
    }
}
