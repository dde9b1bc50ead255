//! Tunnel data-plane interface.
//!
//! The core hands a [`ConnectionDescriptor`] to a [`TunnelTransport`] and
//! receives [`TunnelEvent`](crate::session::TunnelEvent)s back; how packets
//! actually flow is the transport's business.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use smartvpn_core::config::WireguardConfig;
use smartvpn_crypto::{SecretStore, StoreError, VpnCertificate};

use crate::descriptor::{ConnectionDescriptor, DescriptorError};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("tunnel connect failed: {0}")]
    Connect(String),

    #[error("control channel error: {0}")]
    ControlChannel(String),

    #[error("cannot render tunnel configuration: {0}")]
    Render(#[from] DescriptorError),

    #[error("tunnel secrets unavailable: {0}")]
    Secrets(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Start a tunnel for `descriptor`, replacing any current one.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError>;

    /// Re-authenticate the control channel of the live tunnel.
    async fn reconnect_control_channel(
        &self,
        certificate: &VpnCertificate,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport that renders the WireGuard configuration to a file for
/// `wg-quick` instead of driving a tunnel itself.
pub struct WireguardConfigWriter {
    path: PathBuf,
    store: Arc<dyn SecretStore>,
    wireguard: WireguardConfig,
}

impl WireguardConfigWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        store: Arc<dyn SecretStore>,
        wireguard: WireguardConfig,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            wireguard,
        }
    }
}

#[async_trait]
impl TunnelTransport for WireguardConfigWriter {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError> {
        let keys = self.store.keys()?;
        let rendered = descriptor.to_wireguard_config(&keys, &self.wireguard)?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, rendered).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        info!(
            attempt_id = %descriptor.attempt_id(),
            server = %descriptor.server().name,
            path = %self.path.display(),
            "WireGuard configuration written"
        );
        Ok(())
    }

    async fn reconnect_control_channel(
        &self,
        _certificate: &VpnCertificate,
    ) -> Result<(), TransportError> {
        info!("No control channel for a rendered configuration; nothing to reconnect");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "WireGuard configuration removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
