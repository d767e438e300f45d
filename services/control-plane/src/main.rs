//! skiff Control Plane
//!
//! Keeps the cluster converged: replication controllers are held at their
//! replica counts and service endpoints are republished from live tasks.

use std::time::Duration;

use anyhow::Result;
use skiff_control_plane::{
    config,
    endpoints::EndpointWorker,
    replication::{ReplicationPollWorker, ReplicationWatchWorker},
    state::ControlPlane,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // RUST_LOG wins over SKIFF_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting skiff control plane");
    info!(
        machines = ?config.machines,
        scheduler = ?config.scheduler,
        "Configuration loaded"
    );

    let control_plane = match ControlPlane::from_config(&config) {
        Ok(cp) => cp,
        Err(e) => {
            error!(error = %e, "Failed to build control plane");
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_worker =
        ReplicationPollWorker::new(control_plane.replication().clone(), config.sync_interval);
    let poll_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            poll_worker.run(shutdown_rx).await;
        }
    });

    let watch_worker = ReplicationWatchWorker::new(
        control_plane.replication().clone(),
        config.loop_restart_delay,
    );
    let watch_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            watch_worker.run(shutdown_rx).await;
        }
    });

    let endpoint_worker = EndpointWorker::new(
        control_plane.endpoints().clone(),
        config.endpoint_sync_interval,
    );
    let endpoint_handle = tokio::spawn(async move {
        endpoint_worker.run(shutdown_rx).await;
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to stop");
    let shutdown_timeout = Duration::from_secs(10);

    for (name, handle) in [
        ("replication poll", poll_handle),
        ("replication watch", watch_handle),
        ("endpoint sync", endpoint_handle),
    ] {
        match tokio::time::timeout(shutdown_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(worker = name, error = %e, "Worker task panicked"),
            Err(_) => warn!(worker = name, "Worker did not shut down in time"),
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
