//! Replication controller manager.
//!
//! Keeps the number of live tasks matching each controller's selector at the
//! controller's replica count. Two drivers feed it controller specs:
//!
//! - [`ReplicationManager::synchronize`]: one pass over every controller
//!   record in the store
//! - [`ReplicationManager::watch_controllers`]: a long-lived watch on the
//!   controllers prefix, reconciling each controller as it is written
//!
//! The two drivers may race with a stale spec; the next pass corrects it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Error as JsonError;
use skiff_api::{ReplicationController, Task};
use skiff_reconcile::{replica_diff, ReplicaAction};
use skiff_store::{Action, KvStore, Response, StoreError, Watch};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::control::TaskControl;
use crate::registry::{RegistryError, TaskRegistry, CONTROLLERS_PREFIX};

/// Substring of a task status that marks the task as exited.
pub const EXITED_STATUS_MARKER: &str = "Exit";

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed controller record: {0}")]
    Decode(#[from] JsonError),

    #[error("watch notification is not a write ({0:?})")]
    NotAWrite(Action),

    #[error("watch notification has no node")]
    MissingNode,
}

/// Outcome of reconciling one controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Statistics from a full poll pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplicationStats {
    pub controllers_processed: usize,
    pub controllers_failed: usize,
    pub replicas_created: usize,
    pub replicas_deleted: usize,
}

pub struct ReplicationManager {
    store: Arc<dyn KvStore>,
    tasks: Arc<dyn TaskRegistry>,
    task_control: Arc<dyn TaskControl>,
    /// Held for the whole list, diff and act sequence of one controller.
    update_lock: Mutex<()>,
    watch_cooldown: Duration,
}

/// Tasks that have not exited.
pub fn active_tasks(tasks: Vec<Task>) -> Vec<Task> {
    tasks
        .into_iter()
        .filter(|t| !t.current_state.status.contains(EXITED_STATUS_MARKER))
        .collect()
}

impl ReplicationManager {
    /// Create a manager that reads controllers from `store`, counts replicas
    /// in `tasks` and acts through `task_control`.
    pub fn new(
        store: Arc<dyn KvStore>,
        tasks: Arc<dyn TaskRegistry>,
        task_control: Arc<dyn TaskControl>,
        watch_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            tasks,
            task_control,
            update_lock: Mutex::new(()),
            watch_cooldown,
        }
    }

    /// Bring one controller's live replica count to its desired count.
    ///
    /// Replicas are created from the template or the first surplus tasks in
    /// registry order are deleted. A failed create or delete is logged and
    /// counted; the remaining ones still run.
    #[instrument(skip(self, controller), fields(controller_id = %controller.id))]
    pub async fn sync_replication_controller(
        &self,
        controller: &ReplicationController,
    ) -> Result<SyncOutcome, ReplicationError> {
        let _guard = self.update_lock.lock().await;

        let tasks = self.tasks.list_tasks(controller.selector()).await?;
        let live = active_tasks(tasks);
        let desired = controller.desired_state.replicas as usize;

        let mut outcome = SyncOutcome::default();
        match replica_diff(live.len(), desired) {
            ReplicaAction::Converged => {
                debug!(replicas = desired, "Replica count converged");
            }
            ReplicaAction::Create(count) => {
                info!(live = live.len(), desired, count, "Too few replicas, creating");
                for _ in 0..count {
                    match self.task_control.create_replica(controller).await {
                        Ok(_) => outcome.created += 1,
                        Err(e) => {
                            warn!(error = %e, "Failed to create replica");
                            outcome.failed += 1;
                        }
                    }
                }
            }
            ReplicaAction::Delete(count) => {
                info!(live = live.len(), desired, count, "Too many replicas, deleting");
                for task in live.iter().take(count) {
                    match self.task_control.delete_task(&task.id).await {
                        Ok(()) => outcome.deleted += 1,
                        Err(e) => {
                            warn!(task_id = %task.id, error = %e, "Failed to delete replica");
                            outcome.failed += 1;
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// One poll pass: read every controller record from the store and
    /// reconcile each in turn.
    #[instrument(skip(self))]
    pub async fn synchronize(&self) -> Result<ReplicationStats, ReplicationError> {
        let nodes = match self.store.get(CONTROLLERS_PREFIX, false, false).await {
            Ok(response) => response.children().to_vec(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut stats = ReplicationStats::default();
        for node in nodes {
            let controller: ReplicationController = match serde_json::from_str(node.value_str()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(key = %node.key, error = %e, "Skipping malformed controller record");
                    stats.controllers_failed += 1;
                    continue;
                }
            };

            match self.sync_replication_controller(&controller).await {
                Ok(outcome) => {
                    stats.controllers_processed += 1;
                    stats.replicas_created += outcome.created;
                    stats.replicas_deleted += outcome.deleted;
                }
                Err(e) => {
                    warn!(controller_id = %controller.id, error = %e, "Failed to synchronize controller");
                    stats.controllers_failed += 1;
                }
            }
        }

        debug!(
            controllers_processed = stats.controllers_processed,
            controllers_failed = stats.controllers_failed,
            "Synchronization pass complete"
        );
        Ok(stats)
    }

    /// Decode the controller carried by a watch notification.
    pub fn handle_watch_response(
        &self,
        response: &Response,
    ) -> Result<ReplicationController, ReplicationError> {
        if !response.action.is_write() {
            return Err(ReplicationError::NotAWrite(response.action));
        }
        let node = response.node.as_ref().ok_or(ReplicationError::MissingNode)?;
        Ok(serde_json::from_str(node.value_str())?)
    }

    /// Reconcile controllers as they are written until shutdown.
    ///
    /// A reset watch pauses for the cooldown and then subscribes again.
    #[instrument(skip(self, shutdown))]
    pub async fn watch_controllers(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReplicationError> {
        let mut watch = Watch::new(self.store.clone(), CONTROLLERS_PREFIX, true);
        info!("Watching controllers");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let next = tokio::select! {
                next = watch.next() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(response) = next else {
                tokio::select! {
                    _ = tokio::time::sleep(self.watch_cooldown) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
                continue;
            };

            let controller = match self.handle_watch_response(&response) {
                Ok(controller) => controller,
                Err(e) => {
                    error!(error = %e, action = ?response.action, "Skipping watch notification");
                    continue;
                }
            };

            if let Err(e) = self.sync_replication_controller(&controller).await {
                warn!(controller_id = %controller.id, error = %e, "Failed to synchronize controller");
            }
        }
    }
}
