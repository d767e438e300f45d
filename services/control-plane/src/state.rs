//! Control plane components, wired together.

use std::sync::Arc;

use anyhow::Result;
use skiff_store::{EtcdClient, KvStore, MemoryStore};
use tracing::info;

use crate::config::Config;
use crate::container_info::{ContainerInfo, HttpContainerInfo};
use crate::endpoints::EndpointController;
use crate::manifest::BasicManifestFactory;
use crate::registry::{
    ControllerStorage, ServiceRegistry, ServiceStorage, StoreControllerRegistry,
    StoreServiceRegistry, StoreTaskRegistry, TaskRegistry, TaskStorage,
};
use crate::replication::{ReplicationManager, StorageTaskControl};
use crate::scheduler;

/// Shared control plane state.
///
/// Cloning is cheap; every clone refers to the same components.
#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<ControlPlaneInner>,
}

struct ControlPlaneInner {
    tasks: TaskStorage,
    controllers: ControllerStorage,
    services: ServiceStorage,
    replication: Arc<ReplicationManager>,
    endpoints: Arc<EndpointController>,
}

/// Connect to the configured store, or start an in-process one.
pub fn connect_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    if config.etcd_servers.is_empty() {
        info!("No store servers configured, using in-process store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    info!(servers = ?config.etcd_servers, "Using etcd store");
    Ok(Arc::new(EtcdClient::new(config.etcd_servers.clone())?))
}

impl ControlPlane {
    /// Build every component on top of `store`.
    pub fn new(
        config: &Config,
        store: Arc<dyn KvStore>,
        container_info: Arc<dyn ContainerInfo>,
    ) -> Self {
        let service_registry: Arc<dyn ServiceRegistry> =
            Arc::new(StoreServiceRegistry::new(store.clone()));
        let manifests = Arc::new(BasicManifestFactory::new(service_registry.clone()));
        let task_registry: Arc<dyn TaskRegistry> = Arc::new(StoreTaskRegistry::new(
            store.clone(),
            config.machines.clone(),
            manifests,
        ));
        let controller_registry = Arc::new(StoreControllerRegistry::new(store.clone()));

        let scheduler = scheduler::build(
            config.scheduler,
            config.machines.clone(),
            task_registry.clone(),
        );

        let tasks = TaskStorage::new(task_registry.clone(), container_info, scheduler);
        let controllers = ControllerStorage::new(controller_registry);
        let services = ServiceStorage::new(service_registry.clone());

        let replication = Arc::new(ReplicationManager::new(
            store,
            task_registry.clone(),
            Arc::new(StorageTaskControl::new(tasks.clone())),
            config.watch_cooldown,
        ));
        let endpoints = Arc::new(EndpointController::new(service_registry, task_registry));

        Self {
            inner: Arc::new(ControlPlaneInner {
                tasks,
                controllers,
                services,
                replication,
                endpoints,
            }),
        }
    }

    /// Build from configuration, with the HTTP container info client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = connect_store(config)?;
        let container_info = Arc::new(HttpContainerInfo::new(config.container_info_port)?);
        Ok(Self::new(config, store, container_info))
    }

    pub fn tasks(&self) -> &TaskStorage {
        &self.inner.tasks
    }

    pub fn controllers(&self) -> &ControllerStorage {
        &self.inner.controllers
    }

    pub fn services(&self) -> &ServiceStorage {
        &self.inner.services
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.inner.replication
    }

    pub fn endpoints(&self) -> &Arc<EndpointController> {
        &self.inner.endpoints
    }
}
