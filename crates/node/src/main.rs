//! looptap node entry point.
//!
//! `run` (the default) starts discovery, keeps a session to the daemon's
//! connect endpoint, and serves the HTTP control surface. `pair` performs
//! the one-shot pairing handshake with the code shown on the device.

mod config;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use looptap_api::{ApiConfig, ApiServer, ApiState};
use looptap_discovery::{DiscoveryClient, DiscoveryState};
use looptap_identity::Identity;
use looptap_pairing::PairingClient;
use looptap_session::SessionManager;

use crate::config::NodeConfig;

#[derive(Debug, thiserror::Error)]
enum NodeError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("identity error: {0}")]
    Identity(#[from] looptap_identity::IdentityError),

    #[error("pairing error: {0}")]
    Pairing(#[from] looptap_pairing::PairingError),

    #[error("API server error: {0}")]
    Api(#[from] looptap_api::ApiError),

    #[error("{0}")]
    Other(String),
}

#[derive(Parser)]
#[command(name = "looptap-node", version, about = "Device automation node over loopback ADB")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node (default).
    Run,
    /// Pair with the wireless-debugging daemon.
    Pair {
        /// The 6-digit code from the device's pairing dialog.
        #[arg(long)]
        code: String,
        /// Pairing host; discovered via mDNS when omitted.
        #[arg(long)]
        host: Option<IpAddr>,
        /// Pairing port; discovered via mDNS when omitted.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting looptap node");

    let config = match NodeConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            NodeConfig::default()
        }
    };

    let data_dir = config::data_dir().ok_or(config::ConfigError::NoConfigDir)?;
    let identity = Arc::new(Identity::load_or_create(&data_dir, &config.device_name)?);

    match Cli::parse().command.unwrap_or(Command::Run) {
        Command::Run => run_node(config, identity).await,
        Command::Pair { code, host, port } => pair(code, host, port, &identity).await,
    }
}

async fn run_node(config: NodeConfig, identity: Arc<Identity>) -> Result<(), NodeError> {
    let cancel = CancellationToken::new();
    let manager = Arc::new(SessionManager::new(identity));

    let (discovery, discovery_rx) = DiscoveryClient::new();
    let discovery_cancel = cancel.child_token();
    tokio::spawn(async move {
        if let Err(e) = discovery.run(discovery_cancel).await {
            warn!(error = %e, "discovery stopped");
        }
    });

    tokio::spawn(auto_connect(
        manager.clone(),
        discovery_rx.clone(),
        cancel.child_token(),
    ));

    let server = ApiServer::new(
        ApiConfig {
            port: config.api_port,
        },
        ApiState {
            manager: manager.clone(),
            discovery: discovery_rx,
        },
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run(cancel).await?;
    manager.disconnect().await;
    Ok(())
}

/// Keeps a session alive against the latest connect endpoint.
///
/// No retry storm: one attempt per discovery change or poll tick, and the
/// session manager replaces any half-dead session on reconnect.
async fn auto_connect(
    manager: Arc<SessionManager>,
    mut discovery: watch::Receiver<DiscoveryState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = discovery.changed() => {
                if changed.is_err() {
                    // Discovery is gone; keep polling the cached state.
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(3)) => {}
        }

        if manager.is_connected().await {
            continue;
        }
        let Some(endpoint) = discovery.borrow().connect.clone() else {
            continue;
        };

        match manager.connect(endpoint.host, endpoint.port, true).await {
            Ok(()) => info!(%endpoint, "connected to daemon"),
            Err(e) => warn!(%endpoint, error = %e, "connect attempt failed"),
        }
    }
}

async fn pair(
    code: String,
    host: Option<IpAddr>,
    port: Option<u16>,
    identity: &Identity,
) -> Result<(), NodeError> {
    let (host, port) = match (host, port) {
        (Some(host), Some(port)) => (host, port),
        _ => discover_pairing_endpoint().await?,
    };

    info!(%host, port, "pairing");
    PairingClient::new(host, port, code).pair(identity).await?;
    println!("Paired. The daemon now trusts this node's key.");
    Ok(())
}

/// Waits for the pairing service to show up on mDNS.
async fn discover_pairing_endpoint() -> Result<(IpAddr, u16), NodeError> {
    const DISCOVERY_WINDOW: Duration = Duration::from_secs(60);

    let cancel = CancellationToken::new();
    let (discovery, mut rx) = DiscoveryClient::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { discovery.run(task_cancel).await });

    info!("waiting for the pairing dialog to appear on the device");
    let result = tokio::time::timeout(DISCOVERY_WINDOW, async {
        loop {
            if let Some(ep) = rx.borrow_and_update().pairing.clone() {
                return Ok((ep.host, ep.port));
            }
            if rx.changed().await.is_err() {
                return Err(NodeError::Other("discovery channel closed".into()));
            }
        }
    })
    .await;

    cancel.cancel();
    let _ = task.await;

    match result {
        Ok(endpoint) => endpoint,
        Err(_) => Err(NodeError::Other(
            "no pairing endpoint discovered; is the pairing dialog open?".into(),
        )),
    }
}
