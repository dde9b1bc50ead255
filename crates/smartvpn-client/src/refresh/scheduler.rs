//! Client certificate renewal ahead of expiry.
//!
//! A single actor task owns the only renewal timer. Scheduled firings and
//! forced refreshes are serialised through it, so at most one request to
//! the signer is in flight. Every firing re-reads the secret store before
//! deciding to sign, which makes stale timers harmless.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use smartvpn_core::config::CertificateConfig;
use smartvpn_crypto::{SecretStore, StoreError, VpnCertificate, VpnKeys, unix_secs};

use super::backoff::BackoffPolicy;
use super::signer::{CertificateSigner, SignerError};
use crate::clock::Clock;

const COMMAND_BUFFER: usize = 16;
/// Signing rounds per renewal when the key pair keeps changing underneath.
const MAX_SIGN_ROUNDS: usize = 3;

/// Timing knobs of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Renew this long before the server's refresh time.
    pub skew: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            skew: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RefreshSettings {
    pub const fn from_config(config: &CertificateConfig) -> Self {
        Self {
            skew: Duration::from_secs(config.refresh_skew_secs),
            backoff: BackoffPolicy::from_config(config),
        }
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Scheduled { next_run: SystemTime },
    Firing,
    BackoffPending { next_run: SystemTime, failures: u32 },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("certificate signing failed: {0}")]
    Signer(#[from] SignerError),

    #[error("secret store error: {0}")]
    Store(#[from] StoreError),

    #[error("key pair was replaced during every signing attempt")]
    KeysReplaced,

    #[error("certificate refresh scheduler is not running")]
    Stopped,
}

enum Command {
    ForceRefresh {
        issued: Instant,
        reply: oneshot::Sender<Result<VpnCertificate, RefreshError>>,
    },
}

/// Cloneable handle to a running scheduler.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RefreshState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForceRefresh { issued, .. } => f
                .debug_struct("ForceRefresh")
                .field("issued", issued)
                .finish_non_exhaustive(),
        }
    }
}

impl RefreshHandle {
    /// Renew now, replacing any pending timer. Signs even when the stored
    /// certificate is not yet due.
    ///
    /// When a renewal completed after this call was made (e.g. a concurrent
    /// force) and signed the key pair currently stored, its certificate is
    /// returned without another request.
    pub async fn force_refresh(&self) -> Result<VpnCertificate, RefreshError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ForceRefresh {
                issued: Instant::now(),
                reply,
            })
            .await
            .map_err(|_| RefreshError::Stopped)?;
        rx.await.map_err(|_| RefreshError::Stopped)?
    }

    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.clone()
    }
}

pub struct CertificateRefreshScheduler {
    store: Arc<dyn SecretStore>,
    signer: Arc<dyn CertificateSigner>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    state: watch::Sender<RefreshState>,
    /// The single pending timer.
    deadline: Instant,
    failures: u32,
    last_success: Option<Instant>,
    /// Public key the stored certificate was issued for.
    signed_key: Option<String>,
}

impl CertificateRefreshScheduler {
    /// Start the scheduler task. It runs until `shutdown` changes or every
    /// handle is dropped.
    pub fn spawn(
        store: Arc<dyn SecretStore>,
        signer: Arc<dyn CertificateSigner>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
        shutdown: watch::Receiver<bool>,
    ) -> (RefreshHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(RefreshState::Idle);
        let scheduler = Self {
            store,
            signer,
            clock,
            settings,
            state: state_tx,
            deadline: Instant::now(),
            failures: 0,
            last_success: None,
            signed_key: None,
        };
        let task = tokio::spawn(scheduler.run(commands_rx, shutdown));
        (
            RefreshHandle {
                commands: commands_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            skew_secs = self.settings.skew.as_secs(),
            "Certificate refresh scheduler started"
        );
        self.start();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Certificate refresh scheduler shutting down");
                    break;
                }
                command = commands.recv() => {
                    let Some(Command::ForceRefresh { issued, reply }) = command else {
                        debug!("All refresh handles dropped");
                        break;
                    };
                    let result = self.force(issued).await;
                    let _ = reply.send(result);
                }
                () = tokio::time::sleep_until(self.deadline) => {
                    self.fire().await;
                }
            }
        }
        self.set_state(RefreshState::Idle);
    }

    fn start(&mut self) {
        match self.store.certificate() {
            Ok(cert) => {
                let now = self.clock.now();
                let due = cert.refresh_due_at(self.settings.skew);
                if due <= now {
                    info!(
                        refresh_time = unix_secs(cert.refresh_time()),
                        expired = cert.is_expired(now),
                        "Stored certificate is due for renewal"
                    );
                    self.fire_now();
                } else {
                    self.schedule_at(due);
                }
            }
            Err(e) => {
                info!(reason = %e, "No usable stored certificate, requesting one");
                self.fire_now();
            }
        }
    }

    /// Timer expiry: renew unless the stored certificate turned out fresh.
    async fn fire(&mut self) {
        self.set_state(RefreshState::Firing);
        match self.store.certificate() {
            Ok(cert) if !cert.needs_refresh(self.clock.now(), self.settings.skew) => {
                debug!("Stale refresh trigger, stored certificate is still fresh");
                self.schedule_at(cert.refresh_due_at(self.settings.skew));
                return;
            }
            Ok(_) => {}
            Err(e) if e.is_missing() => debug!("No stored certificate"),
            Err(e) => warn!(error = %e, "Stored certificate unreadable, replacing it"),
        }
        let _ = self.renew().await;
    }

    async fn force(&mut self, issued: Instant) -> Result<VpnCertificate, RefreshError> {
        if self.last_success.is_some_and(|done| done >= issued)
            && self.signed_key.is_some()
            && self.stored_public_key() == self.signed_key
            && let Ok(cert) = self.store.certificate()
        {
            debug!("Force refresh satisfied by a renewal that completed after it was requested");
            return Ok(cert);
        }
        info!(failures = self.failures, "Forced certificate refresh");
        self.set_state(RefreshState::Firing);
        self.renew().await
    }

    /// Sign the current public key, store the result and schedule the next
    /// firing. Generates a key pair first when none is usable.
    async fn renew(&mut self) -> Result<VpnCertificate, RefreshError> {
        match self.request_certificate().await {
            Ok((cert, public_key)) => {
                self.signed_key = Some(public_key);
                self.failures = 0;
                self.last_success = Some(Instant::now());
                let due = cert.refresh_due_at(self.settings.skew);
                // A certificate that is already due would otherwise be
                // re-requested in a tight loop.
                let floor = self.clock.now() + self.settings.backoff.base;
                info!(
                    valid_until = unix_secs(cert.valid_until()),
                    refresh_time = unix_secs(cert.refresh_time()),
                    "Client certificate refreshed"
                );
                self.schedule_at(due.max(floor));
                Ok(cert)
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                let delay = self.settings.backoff.delay_for_failures(self.failures);
                warn!(
                    error = %e,
                    failures = self.failures,
                    retry_in_secs = delay.as_secs(),
                    "Certificate refresh failed"
                );
                self.deadline = Instant::now() + delay;
                self.set_state(RefreshState::BackoffPending {
                    next_run: self.clock.now() + delay,
                    failures: self.failures,
                });
                Err(e)
            }
        }
    }

    /// Sign the stored public key. A certificate is only stored when the
    /// key pair it was issued for is still the stored one; otherwise the
    /// replacement key is signed instead.
    async fn request_certificate(&self) -> Result<(VpnCertificate, String), RefreshError> {
        for _ in 0..MAX_SIGN_ROUNDS {
            let keys = self.current_keys()?;
            let public_key = keys.public_base64();
            let cert = self.signer.sign(&public_key).await?;
            if self.stored_public_key().as_deref() != Some(public_key.as_str()) {
                info!(
                    fingerprint = %keys.fingerprint(),
                    "Key pair replaced while signing, discarding certificate"
                );
                continue;
            }
            self.store.store_certificate(&cert)?;
            return Ok((cert, public_key));
        }
        Err(RefreshError::KeysReplaced)
    }

    fn current_keys(&self) -> Result<VpnKeys, RefreshError> {
        match self.store.keys() {
            Ok(keys) => Ok(keys),
            Err(e) => {
                if !e.is_missing() {
                    warn!(error = %e, "Stored key pair unusable, generating a new one");
                }
                let keys = VpnKeys::generate();
                self.store.store_keys(&keys)?;
                info!(fingerprint = %keys.fingerprint(), "Generated new key pair");
                Ok(keys)
            }
        }
    }

    fn stored_public_key(&self) -> Option<String> {
        self.store.keys().ok().map(|keys| keys.public_base64())
    }

    fn schedule_at(&mut self, next_run: SystemTime) {
        let wait = next_run
            .duration_since(self.clock.now())
            .unwrap_or(Duration::ZERO);
        self.deadline = Instant::now() + wait;
        debug!(
            next_run = unix_secs(next_run),
            wait_secs = wait.as_secs(),
            "Certificate refresh scheduled"
        );
        self.set_state(RefreshState::Scheduled { next_run });
    }

    fn fire_now(&mut self) {
        self.deadline = Instant::now();
        self.set_state(RefreshState::Firing);
    }

    fn set_state(&self, state: RefreshState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;

    use async_trait::async_trait;
    use smartvpn_crypto::{MemorySecretStore, test_certificate};

    use super::*;
    use crate::clock::TokioClock;

    const ORIGIN_SECS: u64 = 1_000_000;

    fn origin() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(ORIGIN_SECS)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Signer replaying scripted outcomes; `true` issues a certificate due
    /// `refresh_in` after signing. Unscripted calls use `default_ok`.
    struct ScriptedSigner {
        clock: TokioClock,
        script: Mutex<VecDeque<bool>>,
        default_ok: bool,
        refresh_in: Duration,
        latency: Duration,
        calls: Mutex<Vec<Duration>>,
        keys_seen: Mutex<Vec<String>>,
    }

    impl ScriptedSigner {
        fn new(clock: TokioClock, script: &[bool], default_ok: bool) -> Self {
            Self {
                clock,
                script: Mutex::new(script.iter().copied().collect()),
                default_ok,
                refresh_in: secs(1_000),
                latency: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                keys_seen: Mutex::new(Vec::new()),
            }
        }

        /// Call times as offsets from the clock origin.
        fn calls(&self) -> Vec<u64> {
            self.calls.lock().unwrap().iter().map(Duration::as_secs).collect()
        }
    }

    #[async_trait]
    impl CertificateSigner for ScriptedSigner {
        async fn sign(&self, public_key: &str) -> Result<VpnCertificate, SignerError> {
            let now = self.clock.now();
            self.calls
                .lock()
                .unwrap()
                .push(now.duration_since(origin()).unwrap());
            self.keys_seen.lock().unwrap().push(public_key.to_string());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(self.default_ok);
            if ok {
                Ok(test_certificate(self.clock.now() + self.refresh_in, secs(3_600)))
            } else {
                Err(SignerError::Api {
                    status: 503,
                    message: "Service Unavailable".into(),
                })
            }
        }
    }

    struct Harness {
        store: Arc<MemorySecretStore>,
        signer: Arc<ScriptedSigner>,
        handle: RefreshHandle,
        task: JoinHandle<()>,
        shutdown: watch::Sender<bool>,
    }

    fn start(store: MemorySecretStore, signer: ScriptedSigner) -> Harness {
        let store = Arc::new(store);
        let signer = Arc::new(signer);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (handle, task) = CertificateRefreshScheduler::spawn(
            Arc::clone(&store) as Arc<dyn SecretStore>,
            Arc::clone(&signer) as Arc<dyn CertificateSigner>,
            Arc::new(signer.clock),
            RefreshSettings::default(),
            shutdown_rx,
        );
        Harness {
            store,
            signer,
            handle,
            task,
            shutdown,
        }
    }

    fn store_with(cert: &VpnCertificate) -> MemorySecretStore {
        let store = MemorySecretStore::new();
        store.store_keys(&VpnKeys::generate()).unwrap();
        store.store_certificate(cert).unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_certificate_fires_at_start() {
        let clock = TokioClock::new(origin());
        let overdue = test_certificate(origin() - secs(10), secs(3_600));
        let h = start(store_with(&overdue), ScriptedSigner::new(clock, &[], true));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.signer.calls(), vec![0]);
        assert_ne!(h.store.certificate().unwrap(), overdue);
        assert!(matches!(h.handle.state(), RefreshState::Scheduled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_secrets_generate_keys_then_sign() {
        let clock = TokioClock::new(origin());
        let h = start(MemorySecretStore::new(), ScriptedSigner::new(clock, &[], true));

        tokio::time::sleep(Duration::from_millis(1)).await;
        let keys = h.store.keys().unwrap();
        assert_eq!(
            h.signer.keys_seen.lock().unwrap().as_slice(),
            &[keys.public_base64()]
        );
        assert!(h.store.certificate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn no_request_before_refresh_time_minus_skew() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(600), secs(3_600));
        let h = start(store_with(&cert), ScriptedSigner::new(clock, &[], true));

        tokio::time::sleep(secs(539)).await;
        assert!(h.signer.calls().is_empty());
        assert_eq!(
            h.handle.state(),
            RefreshState::Scheduled {
                next_run: origin() + secs(540)
            }
        );

        tokio::time::sleep(secs(2)).await;
        assert_eq!(h.signer.calls(), vec![540]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_after_20_40_80_seconds() {
        let clock = TokioClock::new(origin());
        let overdue = test_certificate(origin() - secs(10), secs(3_600));
        let h = start(store_with(&overdue), ScriptedSigner::new(clock, &[], false));

        tokio::time::sleep(secs(150)).await;
        assert_eq!(h.signer.calls(), vec![0, 20, 60, 140]);
        assert_eq!(
            h.handle.state(),
            RefreshState::BackoffPending {
                next_run: origin() + secs(300),
                failures: 4
            }
        );
        // Nothing was overwritten by the failed attempts.
        assert_eq!(h.store.certificate().unwrap(), overdue);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_count_resets_after_success() {
        let clock = TokioClock::new(origin());
        let overdue = test_certificate(origin() - secs(10), secs(3_600));
        // fail, fail, succeed, then fail forever
        let h = start(
            store_with(&overdue),
            ScriptedSigner::new(clock, &[false, false, true], false),
        );

        tokio::time::sleep(secs(1_030)).await;
        // Success at 60 yields refresh time 1060, due at 1000; the next
        // failure backs off from scratch.
        assert_eq!(h.signer.calls(), vec![0, 20, 60, 1_000, 1_020]);
        assert!(matches!(
            h.handle.state(),
            RefreshState::BackoffPending { failures: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_request() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(160), secs(3_600));
        let h = start(store_with(&cert), ScriptedSigner::new(clock, &[], true));

        // Someone else renewed meanwhile.
        tokio::time::sleep(secs(50)).await;
        let renewed = test_certificate(origin() + secs(2_000), secs(3_600));
        h.store.store_certificate(&renewed).unwrap();

        tokio::time::sleep(secs(60)).await;
        assert!(h.signer.calls().is_empty());
        assert_eq!(
            h.handle.state(),
            RefreshState::Scheduled {
                next_run: origin() + secs(1_940)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_force_refreshes_share_one_request() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(5_000), secs(3_600));
        let mut signer = ScriptedSigner::new(clock, &[], true);
        signer.latency = secs(1);
        let h = start(store_with(&cert), signer);

        let (a, b) = tokio::join!(h.handle.force_refresh(), h.handle.force_refresh());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_ne!(a, cert);
        assert_eq!(h.signer.calls().len(), 1);

        // A force issued after that renewal is a new request.
        tokio::time::sleep(secs(1)).await;
        h.handle.force_refresh().await.unwrap();
        assert_eq!(h.signer.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn key_replaced_during_renewal_gets_its_own_certificate() {
        let clock = TokioClock::new(origin());
        let overdue = test_certificate(origin() - secs(10), secs(3_600));
        let mut signer = ScriptedSigner::new(clock, &[], true);
        signer.latency = secs(5);
        let h = start(store_with(&overdue), signer);
        let old_key = h.store.keys().unwrap().public_base64();

        // The startup renewal is in flight; the key pair gets replaced.
        tokio::time::sleep(secs(1)).await;
        h.store.clear().unwrap();
        let new_keys = VpnKeys::generate();
        h.store.store_keys(&new_keys).unwrap();
        let cert = h.handle.force_refresh().await.unwrap();

        assert_eq!(
            h.signer.keys_seen.lock().unwrap().as_slice(),
            &[old_key, new_keys.public_base64()]
        );
        assert_eq!(h.signer.calls(), vec![0, 5]);
        // Issued by the second request, which finished at 10.
        assert_eq!(cert.refresh_time(), origin() + secs(1_010));
        assert_eq!(h.store.certificate().unwrap(), cert);
    }

    #[tokio::test(start_paused = true)]
    async fn force_after_key_swap_is_not_coalesced() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(5_000), secs(3_600));
        let h = start(store_with(&cert), ScriptedSigner::new(clock, &[], true));

        h.handle.force_refresh().await.unwrap();
        let new_keys = VpnKeys::generate();
        h.store.store_keys(&new_keys).unwrap();
        h.handle.force_refresh().await.unwrap();

        assert_eq!(h.signer.calls().len(), 2);
        assert_eq!(
            h.signer.keys_seen.lock().unwrap().last(),
            Some(&new_keys.public_base64())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_failure_reports_error_and_backs_off() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(5_000), secs(3_600));
        let h = start(store_with(&cert), ScriptedSigner::new(clock, &[], false));

        let err = h.handle.force_refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::Signer(SignerError::Api { status: 503, .. })));
        assert_eq!(
            h.handle.state(),
            RefreshState::BackoffPending {
                next_run: origin() + secs(20),
                failures: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_task() {
        let clock = TokioClock::new(origin());
        let cert = test_certificate(origin() + secs(5_000), secs(3_600));
        let h = start(store_with(&cert), ScriptedSigner::new(clock, &[], true));

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
        assert_eq!(h.handle.state(), RefreshState::Idle);
        assert!(matches!(
            h.handle.force_refresh().await,
            Err(RefreshError::Stopped)
        ));
    }
}
