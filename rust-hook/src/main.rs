//! rollout-hook web server.
//!
//! This binary:
//! - Loads the webhook secret and target deployment from the environment
//! - Connects to the API server of the cluster it runs in
//! - Serves `/hooks/update`, `/healthz` and `/readyz`
//!
//! It refuses to start without a non-empty secret or outside a cluster.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rollout_hook::{router, AppState, Config, KubePatcher, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration; a missing secret is fatal
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        secret_env = %config.secret_env,
        namespace = %config.workload.namespace(),
        name = %config.workload.name(),
        restart_timeout_ms = config.restart_timeout_ms,
        "config_loaded"
    );

    // Only the in-cluster service account is supported
    let kube_config = kube::Config::incluster()
        .context("This service must run inside a Kubernetes cluster")?;
    let client =
        kube::Client::try_from(kube_config).context("Failed to create Kubernetes client")?;
    info!("kube_client_created");

    let port = config.port;
    let state = AppState::new(
        config,
        Arc::new(KubePatcher::new(client)),
        Arc::new(SystemClock),
    );
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
