//! kube-resourceless - a mutating admission webhook that strips resource
//! requests and limits from pods.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Verifies that cluster credentials are available
//! - Starts the health server and the TLS webhook server
//! - Exits immediately on SIGTERM or SIGINT

use std::path::PathBuf;
use std::sync::Arc;

use axum_server::Handle;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use kube_resourceless::health::{HealthState, run_health_server};
use kube_resourceless::{
    DEFAULT_CERT_PATH, DEFAULT_KEY_PATH, RemoveResources, WebhookConfig, cluster_credentials,
    run_webhook_server,
};

/// Mutating admission webhook removing resource requests and limits from pods
#[derive(Parser, Debug)]
#[command(name = "kube-resourceless", version, about, long_about = None)]
struct Cli {
    /// Path to the TLS certificate
    #[arg(long = "tls-cert", env = "TLS_CERT", default_value = DEFAULT_CERT_PATH)]
    tls_cert: PathBuf,

    /// Path to the TLS key
    #[arg(long = "tls-key", env = "TLS_KEY", default_value = DEFAULT_KEY_PATH)]
    tls_key: PathBuf,

    /// Log request and response payloads
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("kube_resourceless={level}").parse()?),
        )
        .json()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kube-resourceless");

    // The mutation path never calls the API server, but a pod without a
    // usable service identity is misconfigured and must not start.
    let kube_config = match cluster_credentials() {
        Ok(kube_config) => kube_config,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };
    info!(cluster_url = %kube_config.cluster_url, "Loaded cluster credentials");

    let config = WebhookConfig::with_certs(cli.tls_cert, cli.tls_key);
    let health_state = Arc::new(HealthState::new());

    // Probes keep working even if the webhook listener is not up yet
    {
        let health_state = health_state.clone();
        let health_addr = config.health_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, health_addr).await {
                error!("Health server error: {}", e);
            }
        });
    }

    let handle = Handle::new();
    tokio::select! {
        result = run_webhook_server(&config, RemoveResources, health_state, handle.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "Webhook server failed");
                return Err(e.into());
            }
            info!("Webhook server stopped");
        }
        // In-flight reviews are not drained
        _ = shutdown_signal() => {
            info!("Received shutdown signal, exiting");
            handle.shutdown();
        }
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
