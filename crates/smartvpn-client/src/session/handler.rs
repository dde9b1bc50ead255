//! Recovery from control-channel errors of an established session.
//!
//! Events are consumed one at a time, so each error code results in exactly
//! one recovery action and no second reconnect can be started while one is
//! in progress.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use smartvpn_crypto::{SecretStore, StoreError, VpnKeys};

use super::error_code::{DisconnectAlert, RecoveryAction, SessionErrorCode, recovery_for};
use super::{ConnectionState, TunnelEvent, TunnelState};
use crate::account::AccountProvider;
use crate::alerts::{Alert, AlertSink};
use crate::descriptor::ConnectionDescriptor;
use crate::preparer::{ConnectionPreparer, ConnectionRequest, PrepareError};
use crate::refresh::{RefreshError, RefreshHandle};
use crate::transport::{TransportError, TunnelTransport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("certificate refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("secret store error: {0}")]
    Store(#[from] StoreError),

    #[error("tunnel error: {0}")]
    Transport(#[from] TransportError),

    #[error("no active connection")]
    NotConnected,
}

struct ActiveConnection {
    request: ConnectionRequest,
    descriptor: ConnectionDescriptor,
}

pub struct SessionErrorHandler {
    refresh: RefreshHandle,
    store: Arc<dyn SecretStore>,
    preparer: Arc<ConnectionPreparer>,
    transport: Arc<dyn TunnelTransport>,
    accounts: Arc<dyn AccountProvider>,
    alerts: Arc<dyn AlertSink>,
    state: watch::Sender<ConnectionState>,
    active: Option<ActiveConnection>,
    accelerator: Option<bool>,
}

impl SessionErrorHandler {
    pub fn new(
        refresh: RefreshHandle,
        store: Arc<dyn SecretStore>,
        preparer: Arc<ConnectionPreparer>,
        transport: Arc<dyn TunnelTransport>,
        accounts: Arc<dyn AccountProvider>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            refresh,
            store,
            preparer,
            transport,
            accounts,
            alerts,
            state,
            active: None,
            accelerator: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Descriptor of the current attempt, if any.
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.active.as_ref().map(|a| &a.descriptor)
    }

    /// Accelerator status last reported by the server for this session.
    pub const fn accelerator(&self) -> Option<bool> {
        self.accelerator
    }

    /// Start a new connection attempt.
    pub async fn connect(
        &mut self,
        request: ConnectionRequest,
    ) -> Result<ConnectionDescriptor, SessionError> {
        self.set_state(ConnectionState::Connecting);
        match self.preparer.connect(&request).await {
            Ok(descriptor) => {
                self.active = Some(ActiveConnection {
                    request,
                    descriptor: descriptor.clone(),
                });
                Ok(descriptor)
            }
            Err(e) => {
                self.active = None;
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// User-initiated disconnect.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    /// Apply the recovery policy for `code`. Returns the action taken.
    pub async fn handle_error(
        &mut self,
        code: SessionErrorCode,
    ) -> Result<RecoveryAction, SessionError> {
        let action = recovery_for(code);
        info!(%code, ?action, "Control channel reported an error");
        match action {
            RecoveryAction::RefreshCertificate => self.refresh_and_reconnect().await?,
            RecoveryAction::RegenerateKeys => self.reconnect_with_new_keys().await?,
            RecoveryAction::Disconnect(alert) => {
                if code == SessionErrorCode::GuestSession {
                    error!(%code, "Unexpected internal status from control channel");
                }
                self.teardown().await;
                if let Some(alert) = alert {
                    self.push_alert(alert);
                }
            }
            RecoveryAction::Wait => {
                info!(%code, "Waiting for the control channel to recover");
            }
        }
        Ok(action)
    }

    /// Handle one event from the tunnel.
    pub async fn on_event(&mut self, event: TunnelEvent) -> Result<(), SessionError> {
        match event {
            TunnelEvent::State(TunnelState::Connecting) => {
                self.set_state(ConnectionState::Connecting);
            }
            TunnelEvent::State(TunnelState::Connected) => {
                self.set_state(ConnectionState::Connected);
            }
            TunnelEvent::State(TunnelState::Disconnected) => {
                self.set_state(ConnectionState::Disconnected);
            }
            // The tunnel reports an expired certificate at connect time as
            // a state, not as an error code.
            TunnelEvent::State(TunnelState::ClientCertificateError) => {
                self.handle_error(SessionErrorCode::CertificateExpired)
                    .await?;
            }
            TunnelEvent::Error(code) => {
                self.handle_error(code).await?;
            }
            TunnelEvent::ContentInspection(level) => {
                if let Some(active) = self.active.as_mut()
                    && active.descriptor.content_inspection() != level
                {
                    info!(
                        from = ?active.descriptor.content_inspection(),
                        to = ?level,
                        "Content inspection level changed by server"
                    );
                    active.descriptor = active.descriptor.with_content_inspection(level);
                    active.request.content_inspection = level;
                }
            }
            TunnelEvent::Accelerator(enabled) => {
                if self.accelerator != Some(enabled) {
                    info!(enabled, "VPN Accelerator status reported by server");
                    self.accelerator = Some(enabled);
                }
            }
        }
        Ok(())
    }

    /// Consume tunnel events until the channel closes or `shutdown` changes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TunnelEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Session handler shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Tunnel event stream closed");
                        break;
                    };
                    if let Err(e) = self.on_event(event).await {
                        warn!(error = %e, ?event, "Session recovery failed");
                    }
                }
            }
        }
    }

    async fn refresh_and_reconnect(&mut self) -> Result<(), SessionError> {
        if self.active.is_none() {
            return Err(SessionError::NotConnected);
        }
        self.set_state(ConnectionState::Reconnecting);

        let result = async {
            let cert = self.refresh.force_refresh().await?;
            info!("Reconnecting control channel with renewed certificate");
            self.transport.reconnect_control_channel(&cert).await?;
            Ok::<_, SessionError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connecting);
                Ok(())
            }
            Err(e) => self.fail_recovery(e).await,
        }
    }

    async fn reconnect_with_new_keys(&mut self) -> Result<(), SessionError> {
        let request = self
            .active
            .as_ref()
            .map(|a| a.request.clone())
            .ok_or(SessionError::NotConnected)?;
        self.set_state(ConnectionState::Reconnecting);

        let result = async {
            self.store.clear()?;
            let keys = VpnKeys::generate();
            self.store.store_keys(&keys)?;
            info!(
                fingerprint = %keys.fingerprint(),
                "Replaced key pair, requesting new certificate"
            );
            self.refresh.force_refresh().await?;
            self.set_state(ConnectionState::Connecting);
            Ok::<_, SessionError>(self.preparer.connect(&request).await?)
        }
        .await;

        match result {
            Ok(descriptor) => {
                info!(attempt_id = %descriptor.attempt_id(), "Reconnected with new key pair");
                self.active = Some(ActiveConnection {
                    request,
                    descriptor,
                });
                Ok(())
            }
            Err(e) => self.fail_recovery(e).await,
        }
    }

    /// Recovery could not complete: tell the user when the certificate was
    /// the problem and drop the session.
    async fn fail_recovery(&mut self, e: SessionError) -> Result<(), SessionError> {
        error!(error = %e, "Session recovery failed, disconnecting");
        if let SessionError::Refresh(ref refresh) = e {
            self.alerts.push(Alert::CertificateRefreshFailed {
                reason: refresh.to_string(),
            });
        }
        self.teardown().await;
        Err(e)
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Tunnel disconnect failed");
        }
        self.active = None;
        self.accelerator = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn push_alert(&self, alert: DisconnectAlert) {
        let alert = match alert {
            DisconnectAlert::MaxSessions => match self.accounts.credentials() {
                Ok(credentials) => Alert::MaxSessions { credentials },
                Err(e) => {
                    error!(error = %e, "Cannot show max sessions alert without credentials");
                    return;
                }
            },
            DisconnectAlert::ServerError => Alert::ServerError,
            DisconnectAlert::DelinquentUser => Alert::DelinquentUser,
            DisconnectAlert::SubscriptionRequired => Alert::SubscriptionRequired,
        };
        self.alerts.push(alert);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Connection state changed");
        }
    }
}
