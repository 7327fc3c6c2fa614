//! Gate server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::client_addr::ClientAddressMode;
use super::handler::{GateState, gate_handler};
use crate::config::Config;
use crate::{Error, Result};

/// Build the router: every method and path goes through the gate
pub fn create_router(state: Arc<GateState>) -> Router {
    Router::new()
        .fallback(gate_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Authenticating reverse-proxy gate
pub struct Gate {
    config: Config,
    state: Arc<GateState>,
}

impl Gate {
    /// Create a new gate from validated configuration
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(GateState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Run the gate until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("CREDENTIAL GATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        if let Some(ref url) = self.config.backend.url {
            info!(backend = %redact(url), "Backend");
        }
        if let Some(ref url) = self.config.directory.url {
            info!(directory = %redact(url), "Directory");
        }
        match &self.state.client_address {
            ClientAddressMode::Direct => info!("Client address: TCP peer"),
            ClientAddressMode::ForwardedFor {
                header,
                position_from_right,
            } => info!(
                header = %header,
                position_from_right = *position_from_right,
                "Client address: forwarded header"
            ),
        }
        info!("============================================================");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let app = create_router(Arc::clone(&self.state));
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .into_future();

        let drain_timeout = self.config.server.shutdown_timeout;
        let drain_deadline = async move {
            let _ = shutdown_rx.recv().await;
            tokio::time::sleep(drain_timeout).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline => {
                warn!(timeout = ?drain_timeout, "Shutdown timeout elapsed, dropping in-flight requests");
            }
        }

        Ok(())
    }
}

/// Hide URL credentials in logs
fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
