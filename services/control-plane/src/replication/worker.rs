//! Background drivers for the replication manager.

use std::sync::Arc;
use std::time::Duration;

use skiff_reconcile::forever;
use tokio::sync::watch;
use tracing::{info, instrument};

use super::manager::{ReplicationError, ReplicationManager};

/// Runs a synchronization pass over every controller on a fixed period.
pub struct ReplicationPollWorker {
    manager: Arc<ReplicationManager>,
    interval: Duration,
}

impl ReplicationPollWorker {
    pub fn new(manager: Arc<ReplicationManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        forever("replication-poll", self.interval, shutdown, move || {
            self.run_synchronization()
        })
        .await;
    }

    async fn run_synchronization(&self) -> Result<(), ReplicationError> {
        let stats = self.manager.synchronize().await?;

        if stats.replicas_created > 0 || stats.replicas_deleted > 0 || stats.controllers_failed > 0
        {
            info!(
                controllers_processed = stats.controllers_processed,
                controllers_failed = stats.controllers_failed,
                replicas_created = stats.replicas_created,
                replicas_deleted = stats.replicas_deleted,
                "Replication synchronization complete"
            );
        }

        Ok(())
    }
}

/// Keeps a watch on the controllers prefix open, restarting it after
/// `restart_delay` if it ever returns or panics.
pub struct ReplicationWatchWorker {
    manager: Arc<ReplicationManager>,
    restart_delay: Duration,
}

impl ReplicationWatchWorker {
    pub fn new(manager: Arc<ReplicationManager>, restart_delay: Duration) -> Self {
        Self {
            manager,
            restart_delay,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let watch_shutdown = shutdown.clone();
        forever("replication-watch", self.restart_delay, shutdown, move || {
            self.manager.watch_controllers(watch_shutdown.clone())
        })
        .await;
    }
}
