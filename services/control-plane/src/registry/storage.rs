//! Entity storages: the operations exposed at the entity API boundary.
//!
//! A storage wraps a registry with the rules of that boundary: create
//! rejects an empty ID, a missing entity on get is an absent result rather
//! than an error, and tasks are scheduled before they are recorded.

use std::sync::Arc;

use skiff_api::{Endpoints, LabelQuery, ReplicationController, Service, Task};
use tracing::{info, instrument, warn};

use super::{ControllerRegistry, RegistryResult, ServiceRegistry, TaskRegistry};
use crate::container_info::ContainerInfo;
use crate::scheduler::Scheduler;

fn absent_if_not_found<T>(result: RegistryResult<T>) -> RegistryResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Clone)]
pub struct TaskStorage {
    registry: Arc<dyn TaskRegistry>,
    container_info: Arc<dyn ContainerInfo>,
    scheduler: Arc<dyn Scheduler>,
}

impl TaskStorage {
    /// Create a storage that schedules with `scheduler` and asks workers
    /// through `container_info`.
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        container_info: Arc<dyn ContainerInfo>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            registry,
            container_info,
            scheduler,
        }
    }

    /// Tasks matching `query`, without container info.
    pub async fn list(&self, query: &LabelQuery) -> RegistryResult<Vec<Task>> {
        self.registry.list_tasks(query).await
    }

    /// Get a task with the worker's live container info merged in.
    ///
    /// A worker that cannot answer fails the whole get.
    pub async fn get(&self, id: &str) -> RegistryResult<Option<Task>> {
        let Some(mut task) = absent_if_not_found(self.registry.get_task(id).await)? else {
            return Ok(None);
        };

        task.current_state.info = self
            .container_info
            .get_container_info(&task.current_state.host, id)
            .await
            .inspect_err(|e| {
                warn!(
                    task_id = %id,
                    host = %task.current_state.host,
                    error = %e,
                    "Failed to fetch container info"
                )
            })?;

        Ok(Some(task))
    }

    /// Schedule the task and record it on the chosen machine.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn create(&self, task: Task) -> RegistryResult<String> {
        task.validate()?;
        let machine = self.scheduler.schedule(&task).await?;
        self.registry.create_task(&machine, task).await?;
        info!(machine = %machine, "Task scheduled");
        Ok(machine)
    }

    /// Validate and rewrite a task in place. The task keeps its machine.
    pub async fn update(&self, task: Task) -> RegistryResult<()> {
        task.validate()?;
        self.registry.update_task(task).await
    }

    /// Remove a task and its manifest entry.
    pub async fn delete(&self, id: &str) -> RegistryResult<()> {
        self.registry.delete_task(id).await
    }
}

#[derive(Clone)]
pub struct ControllerStorage {
    registry: Arc<dyn ControllerRegistry>,
}

impl ControllerStorage {
    /// Create a storage over `registry`.
    pub fn new(registry: Arc<dyn ControllerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn list(&self) -> RegistryResult<Vec<ReplicationController>> {
        self.registry.list_controllers().await
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Option<ReplicationController>> {
        absent_if_not_found(self.registry.get_controller(id).await)
    }

    pub async fn create(&self, controller: ReplicationController) -> RegistryResult<()> {
        controller.validate()?;
        self.registry.create_controller(controller).await
    }

    pub async fn update(&self, controller: ReplicationController) -> RegistryResult<()> {
        controller.validate()?;
        self.registry.update_controller(controller).await
    }

    pub async fn delete(&self, id: &str) -> RegistryResult<()> {
        self.registry.delete_controller(id).await
    }
}

#[derive(Clone)]
pub struct ServiceStorage {
    registry: Arc<dyn ServiceRegistry>,
}

impl ServiceStorage {
    /// Create a storage over `registry`.
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub async fn list(&self) -> RegistryResult<Vec<Service>> {
        self.registry.list_services().await
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Option<Service>> {
        absent_if_not_found(self.registry.get_service(id).await)
    }

    pub async fn create(&self, service: Service) -> RegistryResult<()> {
        service.validate()?;
        self.registry.create_service(service).await
    }

    pub async fn update(&self, service: Service) -> RegistryResult<()> {
        service.validate()?;
        self.registry.update_service(service).await
    }

    pub async fn delete(&self, id: &str) -> RegistryResult<()> {
        self.registry.delete_service(id).await
    }

    /// The endpoints last published for a service, as read by the proxy.
    pub async fn endpoints(&self, name: &str) -> RegistryResult<Option<Endpoints>> {
        absent_if_not_found(self.registry.get_endpoints(name).await)
    }
}
