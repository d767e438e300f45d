use async_trait::async_trait;
use rand::Rng;
use skiff_api::{ReplicationController, Task, REPLICATION_CONTROLLER_LABEL};
use tracing::debug;

use crate::registry::{RegistryResult, TaskStorage};

/// Creates and deletes tasks on behalf of the replication manager.
#[async_trait]
pub trait TaskControl: Send + Sync {
    /// Create one replica from the controller's template. Returns its ID.
    async fn create_replica(&self, controller: &ReplicationController) -> RegistryResult<String>;

    async fn delete_task(&self, id: &str) -> RegistryResult<()>;
}

/// Build a replica of `controller`'s template with a fresh random ID.
///
/// The replica carries the template labels plus
/// `replicationController = <controller id>`.
pub fn replica_from_template(controller: &ReplicationController) -> Task {
    let template = &controller.desired_state.task_template;
    let mut labels = template.labels.clone();
    labels.insert(
        REPLICATION_CONTROLLER_LABEL.to_string(),
        controller.id.clone(),
    );

    Task {
        id: format!("{:x}", rand::rng().random::<u64>()),
        labels,
        desired_state: template.desired_state.clone(),
        ..Default::default()
    }
}

/// [`TaskControl`] that goes through the task storage, so replicas are
/// scheduled like any other task.
pub struct StorageTaskControl {
    tasks: TaskStorage,
}

impl StorageTaskControl {
    pub fn new(tasks: TaskStorage) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl TaskControl for StorageTaskControl {
    async fn create_replica(&self, controller: &ReplicationController) -> RegistryResult<String> {
        let task = replica_from_template(controller);
        let id = task.id.clone();
        let machine = self.tasks.create(task).await?;
        debug!(controller_id = %controller.id, task_id = %id, machine = %machine, "Replica created");
        Ok(id)
    }

    async fn delete_task(&self, id: &str) -> RegistryResult<()> {
        self.tasks.delete(id).await
    }
}
