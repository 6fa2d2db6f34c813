//! Server configuration and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use looptap_discovery::DiscoveryState;
use looptap_protocol::DEFAULT_API_PORT;
use looptap_session::SessionManager;

use crate::ApiError;
use crate::handlers;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
        }
    }
}

/// Shared state handed to every route.
pub struct ApiState {
    pub manager: Arc<SessionManager>,
    pub discovery: watch::Receiver<DiscoveryState>,
}

/// The HTTP control server.
pub struct ApiServer {
    config: ApiConfig,
    state: Arc<ApiState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: ApiState) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Arc::new(state),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound address once [`run`](Self::run) has bound the
    /// socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), ApiError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("API server listening on {local_addr}");

        let router = router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Builds the `/v1` route table.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::<Arc<ApiState>>::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/system/info", get(handlers::system_info))
        .route("/v1/control/click", post(handlers::click))
        .route("/v1/control/swipe", post(handlers::swipe))
        .route("/v1/control/input", post(handlers::input))
        .route("/v1/ui/xml", post(handlers::ui_xml))
        .route("/v1/ui/screenshot", post(handlers::screenshot))
        .with_state(state)
}
