use std::sync::Arc;
use std::time::Duration;

use skiff_reconcile::forever;
use tokio::sync::watch;
use tracing::instrument;

use super::controller::EndpointController;
use crate::registry::RegistryResult;

/// Runs the endpoint sync on a fixed period.
pub struct EndpointWorker {
    controller: Arc<EndpointController>,
    interval: Duration,
}

impl EndpointWorker {
    pub fn new(controller: Arc<EndpointController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        forever("endpoint-sync", self.interval, shutdown, move || self.sync()).await;
    }

    async fn sync(&self) -> RegistryResult<()> {
        self.controller.sync_service_endpoints().await.map(|_| ())
    }
}
