//! Entity registries.
//!
//! Each entity kind has a capability trait with two implementations:
//!
//! - [`MemoryRegistry`]: all three traits over in-process maps
//! - [`StoreTaskRegistry`], [`StoreControllerRegistry`],
//!   [`StoreServiceRegistry`]: persisted in the coordination store under
//!   `/registry`, tasks sharded by machine
//!
//! The storages in [`storage`] sit on top of the registries and carry the
//! entity-level rules (ID validation, scheduling on create, container info on
//! get).

mod memory;
pub mod storage;
mod store;

use async_trait::async_trait;
use skiff_api::{ApiError, Endpoints, LabelQuery, ReplicationController, Service, Task};
use skiff_store::StoreError;
use thiserror::Error;

use crate::container_info::ContainerInfoError;
use crate::scheduler::SchedulerError;

pub use memory::MemoryRegistry;
pub use storage::{ControllerStorage, ServiceStorage, TaskStorage};
pub use store::{
    StoreControllerRegistry, StoreServiceRegistry, StoreTaskRegistry, CONTROLLERS_PREFIX,
};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors returned by registries and storages.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No entity of this kind has the ID.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// A task with the ID is already recorded on `machine`.
    #[error("a task named {id} already exists on {machine}")]
    AlreadyExists { id: String, machine: String },

    /// The coordination store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No machine could be chosen for a new task.
    #[error("scheduling failed: {0}")]
    Scheduling(#[from] SchedulerError),

    /// The entity failed validation.
    #[error(transparent)]
    Invalid(#[from] ApiError),

    /// The worker running a task could not report its container info.
    #[error("container info unavailable: {0}")]
    ContainerInfo(#[from] ContainerInfoError),
}

impl RegistryError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Returns true if the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Tasks whose labels match every pair of `query`.
    async fn list_tasks(&self, query: &LabelQuery) -> RegistryResult<Vec<Task>>;

    async fn get_task(&self, id: &str) -> RegistryResult<Task>;

    /// Record a task on `machine`. Fails if the ID exists anywhere.
    async fn create_task(&self, machine: &str, task: Task) -> RegistryResult<()>;

    async fn update_task(&self, task: Task) -> RegistryResult<()>;

    async fn delete_task(&self, id: &str) -> RegistryResult<()>;
}

#[async_trait]
pub trait ControllerRegistry: Send + Sync {
    async fn list_controllers(&self) -> RegistryResult<Vec<ReplicationController>>;

    async fn get_controller(&self, id: &str) -> RegistryResult<ReplicationController>;

    async fn create_controller(&self, controller: ReplicationController) -> RegistryResult<()>;

    async fn update_controller(&self, controller: ReplicationController) -> RegistryResult<()>;

    async fn delete_controller(&self, id: &str) -> RegistryResult<()>;
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_services(&self) -> RegistryResult<Vec<Service>>;

    async fn get_service(&self, id: &str) -> RegistryResult<Service>;

    async fn create_service(&self, service: Service) -> RegistryResult<()>;

    async fn update_service(&self, service: Service) -> RegistryResult<()>;

    /// Delete a service and its endpoints record.
    async fn delete_service(&self, id: &str) -> RegistryResult<()>;

    /// Overwrite the endpoints record of a service.
    async fn update_endpoints(&self, endpoints: Endpoints) -> RegistryResult<()>;

    async fn get_endpoints(&self, name: &str) -> RegistryResult<Endpoints>;
}
