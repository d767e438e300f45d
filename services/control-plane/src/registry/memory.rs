//! In-memory registries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use skiff_api::{Endpoints, LabelQuery, ReplicationController, Service, Task};
use tokio::sync::RwLock;

use super::{
    ControllerRegistry, RegistryError, RegistryResult, ServiceRegistry, TaskRegistry,
};

/// Task, controller and service registry held in process memory.
///
/// Listings come back ordered by ID.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    tasks: RwLock<BTreeMap<String, Task>>,
    controllers: RwLock<BTreeMap<String, ReplicationController>>,
    services: RwLock<BTreeMap<String, Service>>,
    endpoints: RwLock<BTreeMap<String, Endpoints>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRegistry for MemoryRegistry {
    async fn list_tasks(&self, query: &LabelQuery) -> RegistryResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| query.matches(&t.labels))
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: &str) -> RegistryResult<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("task", id))
    }

    async fn create_task(&self, machine: &str, mut task: Task) -> RegistryResult<()> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&task.id) {
            return Err(RegistryError::AlreadyExists {
                id: task.id.clone(),
                machine: existing.current_state.host.clone(),
            });
        }
        task.current_state.host = machine.to_string();
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn update_task(&self, mut task: Task) -> RegistryResult<()> {
        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(&task.id)
            .ok_or_else(|| RegistryError::not_found("task", &task.id))?;
        task.current_state.host = existing.current_state.host.clone();
        *existing = task;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> RegistryResult<()> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::not_found("task", id))
    }
}

#[async_trait]
impl ControllerRegistry for MemoryRegistry {
    async fn list_controllers(&self) -> RegistryResult<Vec<ReplicationController>> {
        Ok(self.controllers.read().await.values().cloned().collect())
    }

    async fn get_controller(&self, id: &str) -> RegistryResult<ReplicationController> {
        self.controllers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("replication controller", id))
    }

    async fn create_controller(&self, controller: ReplicationController) -> RegistryResult<()> {
        self.update_controller(controller).await
    }

    async fn update_controller(&self, controller: ReplicationController) -> RegistryResult<()> {
        self.controllers
            .write()
            .await
            .insert(controller.id.clone(), controller);
        Ok(())
    }

    async fn delete_controller(&self, id: &str) -> RegistryResult<()> {
        self.controllers
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::not_found("replication controller", id))
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn list_services(&self) -> RegistryResult<Vec<Service>> {
        Ok(self.services.read().await.values().cloned().collect())
    }

    async fn get_service(&self, id: &str) -> RegistryResult<Service> {
        self.services
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("service", id))
    }

    async fn create_service(&self, service: Service) -> RegistryResult<()> {
        self.update_service(service).await
    }

    async fn update_service(&self, service: Service) -> RegistryResult<()> {
        self.services.write().await.insert(service.id.clone(), service);
        Ok(())
    }

    async fn delete_service(&self, id: &str) -> RegistryResult<()> {
        let removed = self.services.write().await.remove(id);
        self.endpoints.write().await.remove(id);
        removed
            .map(|_| ())
            .ok_or_else(|| RegistryError::not_found("service", id))
    }

    async fn update_endpoints(&self, endpoints: Endpoints) -> RegistryResult<()> {
        self.endpoints
            .write()
            .await
            .insert(endpoints.name.clone(), endpoints);
        Ok(())
    }

    async fn get_endpoints(&self, name: &str) -> RegistryResult<Endpoints> {
        self.endpoints
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("endpoints", name))
    }
}
