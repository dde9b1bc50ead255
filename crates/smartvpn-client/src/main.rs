//! `SmartVPN` command-line client.
//!
//! Composition root: loads configuration, wires the client core together
//! and runs one of the probe, connect or refresh commands.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use smartvpn_client::preparer::{ConnectionPreparer, ConnectionProtocol, ConnectionRequest};
use smartvpn_client::refresh::{
    ApiCertificateSigner, ApiSignerConfig, CertificateRefreshScheduler, RefreshSettings,
};
use smartvpn_client::smart::{
    FileProtocolHistory, PortSelector, ProtocolHistory, SmartProtocolNegotiator, default_checkers,
};
use smartvpn_client::{
    ContentInspection, LogAlertSink, ServerList, StaticAccount, SystemClock, Tier, VpnCredentials,
    WireguardConfigWriter,
};
use smartvpn_core::VpnProtocol;
use smartvpn_core::config::{Config, load_config};
use smartvpn_core::tracing_init::{init_tracing, workspace_filter};
use smartvpn_crypto::{FileSecretStore, SecretStore, VpnKeys};

#[derive(Parser, Debug)]
#[command(name = "smartvpn")]
#[command(version, about = "SmartVPN client - smart protocol selection and certificate refresh")]
struct Cli {
    /// Explicit settings file, layered over the global one
    #[arg(long, env = "SMARTVPN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level for SmartVPN crates (overrides the settings file)
    #[arg(long, env = "SMARTVPN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SMARTVPN_LOG_JSON")]
    log_json: bool,

    /// Directory holding the client certificate and key pair
    #[arg(long, env = "SMARTVPN_SECRETS_DIR")]
    secrets_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe a host and report which protocol and ports would be used
    Probe {
        host: IpAddr,

        /// Probe only this protocol's ports
        #[arg(long)]
        protocol: Option<VpnProtocol>,
    },

    /// Prepare a connection and write the WireGuard configuration
    Connect {
        /// Server list (JSON)
        #[arg(long, env = "SMARTVPN_SERVERS")]
        servers: PathBuf,

        /// Server name, e.g. "CH#1"
        #[arg(long)]
        server: String,

        /// Pin a protocol instead of smart selection
        #[arg(long)]
        protocol: Option<VpnProtocol>,

        /// Highest server tier the account may use
        #[arg(long, default_value_t = 0)]
        tier: u8,

        #[arg(long, default_value = "free")]
        plan: String,

        #[arg(long, default_value_t = 1)]
        max_connect: u32,

        /// Content inspection level: off, 1 or 2
        #[arg(long, default_value = "off")]
        content_inspection: ContentInspection,

        /// Where to write the configuration
        #[arg(long, default_value = "smartvpn.conf")]
        out: PathBuf,
    },

    /// Keep the client certificate fresh until interrupted
    Refresh {
        /// VPN API access token
        #[arg(long, env = "SMARTVPN_TOKEN")]
        token: String,

        #[arg(long, env = "SMARTVPN_DEVICE_NAME", default_value = "smartvpn")]
        device_name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level.clone_from(level);
    }
    init_tracing(&workspace_filter(&config.log_level), cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting smartvpn");

    let secrets_dir = cli
        .secrets_dir
        .clone()
        .unwrap_or_else(|| FileSecretStore::default_dir(dirs::home_dir().as_deref()));
    let history: Arc<dyn ProtocolHistory> = Arc::new(FileProtocolHistory::in_dir(&secrets_dir));
    let store: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(secrets_dir));
    let config = Arc::new(config);

    match cli.command {
        Command::Probe { host, protocol } => probe(&config, history, host, protocol).await,
        Command::Connect {
            servers,
            server,
            protocol,
            tier,
            plan,
            max_connect,
            content_inspection,
            out,
        } => {
            let credentials = VpnCredentials {
                plan_name: plan,
                max_tier: Tier(tier),
                max_connect,
            };
            let request = ConnectRequest {
                servers,
                server,
                protocol,
                content_inspection,
                out,
            };
            connect(config, store, history, credentials, request).await
        }
        Command::Refresh { token, device_name } => {
            refresh(&config, store, token, device_name).await
        }
    }
}

async fn probe(
    config: &Config,
    history: Arc<dyn ProtocolHistory>,
    host: IpAddr,
    protocol: Option<VpnProtocol>,
) -> anyhow::Result<()> {
    let checkers = default_checkers();
    if let Some(protocol) = protocol {
        let selector = PortSelector::new(checkers, config.smart_protocol.probe_timeout());
        let ports = selector
            .select_ports(&config.candidate_for(protocol), host)
            .await;
        info!(%host, %protocol, ?ports, "Probe finished");
        return Ok(());
    }

    let negotiator = SmartProtocolNegotiator::new(
        config.smart_candidates(),
        checkers,
        history,
        &config.smart_protocol,
    );
    let negotiated = negotiator
        .negotiate(host)
        .await
        .ok_or_else(|| anyhow::anyhow!("No protocol candidates configured"))?;
    info!(
        %host,
        protocol = %negotiated.protocol,
        ports = ?negotiated.ports,
        fallback = negotiated.fallback,
        "Probe finished"
    );
    Ok(())
}

struct ConnectRequest {
    servers: PathBuf,
    server: String,
    protocol: Option<VpnProtocol>,
    content_inspection: ContentInspection,
    out: PathBuf,
}

async fn connect(
    config: Arc<Config>,
    store: Arc<dyn SecretStore>,
    history: Arc<dyn ProtocolHistory>,
    credentials: VpnCredentials,
    request: ConnectRequest,
) -> anyhow::Result<()> {
    let list = ServerList::load(&request.servers)?;
    let server = list
        .find(&request.server)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Unknown server: {}", request.server))?;

    // The rendered configuration needs a key pair even before the first
    // certificate has been issued.
    if let Err(e) = store.keys() {
        info!(reason = %e, "Generating a new key pair");
        store.store_keys(&VpnKeys::generate())?;
    }

    let transport = Arc::new(WireguardConfigWriter::new(
        &request.out,
        Arc::clone(&store),
        config.wireguard.clone(),
    ));
    let preparer = ConnectionPreparer::new(
        Arc::clone(&config),
        default_checkers(),
        history,
        Arc::new(StaticAccount::new(credentials)),
        Arc::new(LogAlertSink),
        transport,
    );

    let protocol = request
        .protocol
        .map_or(ConnectionProtocol::Smart, ConnectionProtocol::Pinned);
    let descriptor = preparer
        .connect(&ConnectionRequest {
            server,
            protocol,
            content_inspection: request.content_inspection,
        })
        .await?;
    info!(
        attempt_id = %descriptor.attempt_id(),
        protocol = %descriptor.protocol(),
        ports = ?descriptor.ports(),
        out = %request.out.display(),
        "Connection prepared"
    );
    Ok(())
}

async fn refresh(
    config: &Config,
    store: Arc<dyn SecretStore>,
    token: String,
    device_name: String,
) -> anyhow::Result<()> {
    let signer = ApiCertificateSigner::new(&ApiSignerConfig {
        base_url: config.api.base_url.clone(),
        token,
        device_name,
        request_timeout: Duration::from_secs(config.api.request_timeout_secs),
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = CertificateRefreshScheduler::spawn(
        store,
        Arc::new(signer),
        Arc::new(SystemClock),
        RefreshSettings::from_config(&config.certificate),
        shutdown_rx,
    );

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let mut states = handle.subscribe();
    let watch_states = async {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(?state, "Certificate refresh state");
        }
    };

    tokio::select! {
        () = watch_states => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = task.await;
    info!("Certificate refresh stopped");
    Ok(())
}

