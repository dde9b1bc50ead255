//! Account information consumed by tier gating and plan-specific alerts.

use serde::{Deserialize, Serialize};

use crate::server::Tier;

/// The signed-in user's VPN entitlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnCredentials {
    pub plan_name: String,
    pub max_tier: Tier,
    /// Maximum simultaneous sessions allowed by the plan.
    pub max_connect: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account information unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the current account.
pub trait AccountProvider: Send + Sync {
    fn credentials(&self) -> Result<VpnCredentials, AccountError>;
}

/// Fixed credentials, e.g. from command-line flags.
#[derive(Debug, Clone)]
pub struct StaticAccount {
    credentials: VpnCredentials,
}

impl StaticAccount {
    pub const fn new(credentials: VpnCredentials) -> Self {
        Self { credentials }
    }
}

impl AccountProvider for StaticAccount {
    fn credentials(&self) -> Result<VpnCredentials, AccountError> {
        Ok(self.credentials.clone())
    }
}
