//! pod-guard - A Kubernetes admission webhook that applies secure pod defaults.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the policy configuration watch
//! - Starts the health server, and the webhook server when certificates exist
//!
//! Every replica serves admission requests, so there is no leader election.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use pod_guard::health::{HealthState, run_health_server};
use pod_guard::{
    AdmissionEngine, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, config_cache, run_webhook_server,
};

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pod_guard=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting pod-guard");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (liveness should work before sync)
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Start the configuration watch
    let (cache, watch) = config_cache(client);
    let watch_handle = tokio::spawn(watch);

    // Report ready once both configuration stores hold their initial list
    {
        let cache = cache.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if cache.wait_until_ready().await {
                health_state.set_ready(true).await;
                info!("Policy configuration synced, marked ready");
            } else {
                error!("Policy configuration watch stopped before syncing");
            }
        });
    }

    let engine = AdmissionEngine::new(Arc::new(cache));

    // Optionally start webhook server if certificates are available
    let webhook_handle =
        if Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists() {
            info!("TLS certificates found, starting webhook server");
            let health_state = health_state.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_webhook_server(
                    engine,
                    Some(health_state),
                    WEBHOOK_CERT_PATH,
                    WEBHOOK_KEY_PATH,
                )
                .await
                {
                    error!("Webhook server error: {}", e);
                }
            }))
        } else {
            info!("Webhook certificates not found, webhook server disabled");
            None
        };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = watch_handle => {
            if let Err(e) = result {
                error!("Configuration watch task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing new requests
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("pod-guard stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut down
/// gracefully without them.
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
