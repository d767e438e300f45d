//! Registries persisted in the coordination store.
//!
//! Layout:
//!
//! | entity | key |
//! |---|---|
//! | task | `/registry/hosts/{machine}/tasks/{id}` |
//! | machine manifest list | `/registry/hosts/{machine}/kubelet` |
//! | replication controller | `/registry/controllers/{id}` |
//! | service | `/registry/services/specs/{id}` |
//! | service endpoints | `/registry/services/endpoints/{id}` |
//!
//! Records are JSON. A missing directory lists as empty; a missing key is
//! [`RegistryError::NotFound`]. Concurrency control is left to the store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use skiff_api::{ContainerManifest, Endpoints, LabelQuery, ReplicationController, Service, Task};
use skiff_store::{KvStore, Node};
use tracing::{debug, info, instrument, warn};

use super::{
    ControllerRegistry, RegistryError, RegistryResult, ServiceRegistry, TaskRegistry,
};
use crate::manifest::ManifestFactory;

/// Directory holding every replication controller record.
pub const CONTROLLERS_PREFIX: &str = "/registry/controllers";

const SERVICE_SPECS_PREFIX: &str = "/registry/services/specs";
const SERVICE_ENDPOINTS_PREFIX: &str = "/registry/services/endpoints";

fn host_prefix(machine: &str) -> String {
    format!("/registry/hosts/{machine}")
}

fn tasks_key(machine: &str) -> String {
    format!("{}/tasks", host_prefix(machine))
}

fn task_key(machine: &str, id: &str) -> String {
    format!("{}/tasks/{id}", host_prefix(machine))
}

fn manifests_key(machine: &str) -> String {
    format!("{}/kubelet", host_prefix(machine))
}

fn controller_key(id: &str) -> String {
    format!("{CONTROLLERS_PREFIX}/{id}")
}

fn service_key(id: &str) -> String {
    format!("{SERVICE_SPECS_PREFIX}/{id}")
}

fn endpoints_key(name: &str) -> String {
    format!("{SERVICE_ENDPOINTS_PREFIX}/{name}")
}

fn decode<T: DeserializeOwned>(node: &Node) -> RegistryResult<T> {
    Ok(serde_json::from_str(node.value_str())?)
}

fn encode<T: Serialize>(value: &T) -> RegistryResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Children of a directory key, or nothing if the directory does not exist.
async fn list_nodes(store: &dyn KvStore, key: &str) -> RegistryResult<Vec<Node>> {
    match store.get(key, true, true).await {
        Ok(response) => Ok(response.children().to_vec()),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// The value at a leaf key, or `None` if it does not exist.
async fn get_node(store: &dyn KvStore, key: &str) -> RegistryResult<Option<Node>> {
    match store.get(key, false, false).await {
        Ok(response) => Ok(response.node),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Decode every child of a directory key.
async fn list_records<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> RegistryResult<Vec<T>> {
    list_nodes(store, key).await?.iter().map(decode::<T>).collect()
}

// =============================================================================
// Tasks
// =============================================================================

/// Task registry sharded by machine.
///
/// There is no reverse index from task to machine: lookups by ID scan the
/// machine list in order.
pub struct StoreTaskRegistry {
    store: Arc<dyn KvStore>,
    machines: Vec<String>,
    manifests: Arc<dyn ManifestFactory>,
}

impl StoreTaskRegistry {
    /// Create a registry over `machines`, building manifest entries with
    /// `manifests`.
    pub fn new(
        store: Arc<dyn KvStore>,
        machines: Vec<String>,
        manifests: Arc<dyn ManifestFactory>,
    ) -> Self {
        Self {
            store,
            machines,
            manifests,
        }
    }

    async fn list_for_machine(&self, machine: &str) -> RegistryResult<Vec<Task>> {
        let nodes = list_nodes(self.store.as_ref(), &tasks_key(machine)).await?;
        nodes
            .iter()
            .map(|node| {
                let mut task: Task = decode(node)?;
                task.current_state.host = machine.to_string();
                Ok(task)
            })
            .collect()
    }

    async fn get_on_machine(&self, machine: &str, id: &str) -> RegistryResult<Option<Task>> {
        let Some(node) = get_node(self.store.as_ref(), &task_key(machine, id)).await? else {
            return Ok(None);
        };
        let mut task: Task = decode(&node)?;
        task.current_state.host = machine.to_string();
        Ok(Some(task))
    }

    /// Locate a task and the machine holding it.
    async fn find_task(&self, id: &str) -> RegistryResult<Option<(Task, String)>> {
        for machine in &self.machines {
            if let Some(task) = self.get_on_machine(machine, id).await? {
                return Ok(Some((task, machine.clone())));
            }
        }
        Ok(None)
    }

    async fn load_manifests(&self, machine: &str) -> RegistryResult<Vec<ContainerManifest>> {
        match get_node(self.store.as_ref(), &manifests_key(machine)).await? {
            Some(node) => decode(&node),
            None => Ok(Vec::new()),
        }
    }

    async fn save_manifests(
        &self,
        machine: &str,
        manifests: &[ContainerManifest],
    ) -> RegistryResult<()> {
        self.store
            .set(&manifests_key(machine), &encode(&manifests)?, 0)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRegistry for StoreTaskRegistry {
    async fn list_tasks(&self, query: &LabelQuery) -> RegistryResult<Vec<Task>> {
        let mut tasks = Vec::new();
        for machine in &self.machines {
            let machine_tasks = self.list_for_machine(machine).await?;
            tasks.extend(machine_tasks.into_iter().filter(|t| query.matches(&t.labels)));
        }
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> RegistryResult<Task> {
        self.find_task(id)
            .await?
            .map(|(task, _)| task)
            .ok_or_else(|| RegistryError::not_found("task", id))
    }

    /// Not transactional: a failure after the record is written leaves it
    /// without a manifest entry.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn create_task(&self, machine: &str, mut task: Task) -> RegistryResult<()> {
        if let Some((_, existing)) = self.find_task(&task.id).await? {
            return Err(RegistryError::AlreadyExists {
                id: task.id,
                machine: existing,
            });
        }

        let mut manifests = self.load_manifests(machine).await?;

        task.current_state.host = machine.to_string();
        let key = task_key(machine, &task.id);
        if let Err(e) = self.store.create(&key, &encode(&task)?, 0).await {
            if e.is_node_exist() {
                return Err(RegistryError::AlreadyExists {
                    id: task.id,
                    machine: machine.to_string(),
                });
            }
            return Err(e.into());
        }

        let manifest = self.manifests.make_manifest(machine, &task).await?;
        manifests.push(manifest);
        self.save_manifests(machine, &manifests).await?;

        info!(machine = %machine, "Task recorded");
        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn update_task(&self, mut task: Task) -> RegistryResult<()> {
        let Some((_, machine)) = self.find_task(&task.id).await? else {
            return Err(RegistryError::not_found("task", task.id));
        };

        task.current_state.host = machine.clone();
        self.store
            .set(&task_key(&machine, &task.id), &encode(&task)?, 0)
            .await?;

        let manifest = self.manifests.make_manifest(&machine, &task).await?;
        let mut manifests = self.load_manifests(&machine).await?;
        match manifests.iter_mut().find(|m| m.id == task.id) {
            Some(entry) => *entry = manifest,
            None => {
                warn!(machine = %machine, "Task had no manifest entry, appending one");
                manifests.push(manifest);
            }
        }
        self.save_manifests(&machine, &manifests).await?;

        debug!(machine = %machine, "Task updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> RegistryResult<()> {
        let Some((_, machine)) = self.find_task(id).await? else {
            return Err(RegistryError::not_found("task", id));
        };

        let mut manifests = self.load_manifests(&machine).await?;
        let before = manifests.len();
        manifests.retain(|m| m.id != id);
        if manifests.len() == before {
            warn!(machine = %machine, "No manifest entry for deleted task");
        }
        self.save_manifests(&machine, &manifests).await?;

        self.store.delete(&task_key(&machine, id), true).await?;

        info!(machine = %machine, "Task deleted");
        Ok(())
    }
}

// =============================================================================
// Replication controllers
// =============================================================================

pub struct StoreControllerRegistry {
    store: Arc<dyn KvStore>,
}

impl StoreControllerRegistry {
    /// Create a registry backed by `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ControllerRegistry for StoreControllerRegistry {
    async fn list_controllers(&self) -> RegistryResult<Vec<ReplicationController>> {
        list_records(self.store.as_ref(), CONTROLLERS_PREFIX).await
    }

    async fn get_controller(&self, id: &str) -> RegistryResult<ReplicationController> {
        match get_node(self.store.as_ref(), &controller_key(id)).await? {
            Some(node) => decode(&node),
            None => Err(RegistryError::not_found("replication controller", id)),
        }
    }

    async fn create_controller(&self, controller: ReplicationController) -> RegistryResult<()> {
        self.update_controller(controller).await
    }

    async fn update_controller(&self, controller: ReplicationController) -> RegistryResult<()> {
        self.store
            .set(&controller_key(&controller.id), &encode(&controller)?, 0)
            .await?;
        Ok(())
    }

    async fn delete_controller(&self, id: &str) -> RegistryResult<()> {
        match self.store.delete(&controller_key(id), false).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(RegistryError::not_found("replication controller", id)),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Services
// =============================================================================

pub struct StoreServiceRegistry {
    store: Arc<dyn KvStore>,
}

impl StoreServiceRegistry {
    /// Create a registry backed by `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceRegistry for StoreServiceRegistry {
    async fn list_services(&self) -> RegistryResult<Vec<Service>> {
        list_records(self.store.as_ref(), SERVICE_SPECS_PREFIX).await
    }

    async fn get_service(&self, id: &str) -> RegistryResult<Service> {
        match get_node(self.store.as_ref(), &service_key(id)).await? {
            Some(node) => decode(&node),
            None => Err(RegistryError::not_found("service", id)),
        }
    }

    async fn create_service(&self, service: Service) -> RegistryResult<()> {
        self.update_service(service).await
    }

    async fn update_service(&self, service: Service) -> RegistryResult<()> {
        self.store
            .set(&service_key(&service.id), &encode(&service)?, 0)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, id: &str) -> RegistryResult<()> {
        match self.store.delete(&service_key(id), true).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Err(RegistryError::not_found("service", id)),
            Err(e) => return Err(e.into()),
        }

        // A service that was never synced has no endpoints record.
        match self.store.delete(&endpoints_key(id), true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_endpoints(&self, endpoints: Endpoints) -> RegistryResult<()> {
        self.store
            .set(&endpoints_key(&endpoints.name), &encode(&endpoints)?, 0)
            .await?;
        Ok(())
    }

    async fn get_endpoints(&self, name: &str) -> RegistryResult<Endpoints> {
        match get_node(self.store.as_ref(), &endpoints_key(name)).await? {
            Some(node) => decode(&node),
            None => Err(RegistryError::not_found("endpoints", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::BasicManifestFactory;
    use skiff_api::{Container, Port};
    use skiff_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        tasks: StoreTaskRegistry,
        services: Arc<StoreServiceRegistry>,
    }

    fn fixture(machines: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let services = Arc::new(StoreServiceRegistry::new(store.clone()));
        let factory = Arc::new(BasicManifestFactory::new(services.clone()));
        let tasks = StoreTaskRegistry::new(
            store.clone(),
            machines.iter().map(|m| m.to_string()).collect(),
            factory,
        );
        Fixture {
            store,
            tasks,
            services,
        }
    }

    fn task(id: &str, labels: &[(&str, &str)], host_port: u16) -> Task {
        let mut task = Task {
            id: id.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        task.desired_state.manifest.containers = vec![Container {
            name: "main".to_string(),
            image: "img".to_string(),
            ports: vec![Port {
                host_port,
                container_port: 80,
                ..Default::default()
            }],
            ..Default::default()
        }];
        task
    }

    async fn manifest_ids(store: &MemoryStore, machine: &str) -> Vec<String> {
        let node = store
            .get(&manifests_key(machine), false, false)
            .await
            .unwrap()
            .node
            .unwrap();
        let manifests: Vec<ContainerManifest> = serde_json::from_str(node.value_str()).unwrap();
        manifests.into_iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn test_list_empty() {
        let f = fixture(&["m1", "m2"]);
        assert!(f
            .tasks
            .list_tasks(&LabelQuery::everything())
            .await
            .unwrap()
            .is_empty());
        assert!(f.services.list_services().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_task_writes_record_and_manifest() {
        let f = fixture(&["machine"]);
        f.tasks.create_task("machine", task("foo", &[], 8080)).await.unwrap();

        let node = f
            .store
            .get("/registry/hosts/machine/tasks/foo", false, false)
            .await
            .unwrap()
            .node
            .unwrap();
        let stored: Task = serde_json::from_str(node.value_str()).unwrap();
        assert_eq!(stored.id, "foo");

        assert_eq!(manifest_ids(&f.store, "machine").await, vec!["foo"]);

        let got = f.tasks.get_task("foo").await.unwrap();
        assert_eq!(got.current_state.host, "machine");
        assert_eq!(got.desired_state, stored.desired_state);
    }

    #[tokio::test]
    async fn test_create_task_already_exists_on_other_machine() {
        let f = fixture(&["m1", "m2"]);
        f.tasks.create_task("m1", task("foo", &[], 8080)).await.unwrap();

        let err = f
            .tasks
            .create_task("m2", task("foo", &[], 8080))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { ref machine, .. } if machine == "m1"));
        assert!(f
            .store
            .get("/registry/hosts/m2/kubelet", false, false)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_list_tasks_fans_out_over_machines() {
        let f = fixture(&["m1", "m2"]);
        f.tasks
            .create_task("m1", task("a", &[("app", "web")], 8080))
            .await
            .unwrap();
        f.tasks
            .create_task("m2", task("b", &[("app", "web")], 8080))
            .await
            .unwrap();
        f.tasks
            .create_task("m2", task("c", &[("app", "db")], 5432))
            .await
            .unwrap();

        let web = f
            .tasks
            .list_tasks(&LabelQuery::from_pairs([("app", "web")]))
            .await
            .unwrap();
        let placed: Vec<_> = web
            .iter()
            .map(|t| (t.id.as_str(), t.current_state.host.as_str()))
            .collect();
        assert_eq!(placed, vec![("a", "m1"), ("b", "m2")]);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let f = fixture(&["m1"]);
        assert!(f.tasks.get_task("nope").await.unwrap_err().is_not_found());
        assert!(f.tasks.delete_task("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one_manifest() {
        let f = fixture(&["machine"]);
        f.tasks.create_task("machine", task("foo", &[], 1)).await.unwrap();
        f.tasks.create_task("machine", task("bar", &[], 2)).await.unwrap();
        assert_eq!(manifest_ids(&f.store, "machine").await, vec!["foo", "bar"]);

        f.tasks.delete_task("foo").await.unwrap();
        assert_eq!(manifest_ids(&f.store, "machine").await, vec!["bar"]);
        assert!(f.tasks.get_task("foo").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_without_manifest_entry_still_deletes() {
        let f = fixture(&["machine"]);
        f.tasks.create_task("machine", task("foo", &[], 1)).await.unwrap();
        f.store.set("/registry/hosts/machine/kubelet", "[]", 0).await.unwrap();

        f.tasks.delete_task("foo").await.unwrap();
        assert!(f.tasks.get_task("foo").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_task_replaces_manifest_entry() {
        let f = fixture(&["m1", "m2"]);
        f.tasks.create_task("m2", task("foo", &[], 8080)).await.unwrap();

        let updated = task("foo", &[("version", "2")], 9090);
        f.tasks.update_task(updated).await.unwrap();

        let got = f.tasks.get_task("foo").await.unwrap();
        assert_eq!(got.current_state.host, "m2");
        assert_eq!(got.primary_host_port(), Some(9090));

        let node = f
            .store
            .get("/registry/hosts/m2/kubelet", false, false)
            .await
            .unwrap()
            .node
            .unwrap();
        let manifests: Vec<ContainerManifest> = serde_json::from_str(node.value_str()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].containers[0].ports[0].host_port, 9090);
    }

    #[tokio::test]
    async fn test_manifest_carries_service_env() {
        let f = fixture(&["machine"]);
        f.services
            .create_service(Service {
                id: "db".to_string(),
                port: 5432,
                ..Default::default()
            })
            .await
            .unwrap();
        f.tasks.create_task("machine", task("foo", &[], 1)).await.unwrap();

        let node = f
            .store
            .get("/registry/hosts/machine/kubelet", false, false)
            .await
            .unwrap()
            .node
            .unwrap();
        let manifests: Vec<ContainerManifest> = serde_json::from_str(node.value_str()).unwrap();
        let env: Vec<_> = manifests[0].containers[0]
            .env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        assert_eq!(env, vec![("DB_SERVICE_PORT", "5432"), ("SERVICE_HOST", "machine")]);
    }

    #[tokio::test]
    async fn test_controllers_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let registry = StoreControllerRegistry::new(store.clone());
        assert!(registry.list_controllers().await.unwrap().is_empty());

        let mut controller = ReplicationController {
            id: "web".to_string(),
            ..Default::default()
        };
        controller.desired_state.replicas = 3;
        controller.desired_state.replicas_in_set = LabelQuery::from_pairs([("app", "web")]);
        registry.create_controller(controller.clone()).await.unwrap();

        assert_eq!(registry.get_controller("web").await.unwrap(), controller);
        assert_eq!(registry.list_controllers().await.unwrap(), vec![controller]);

        registry.delete_controller("web").await.unwrap();
        assert!(registry.get_controller("web").await.unwrap_err().is_not_found());
        assert!(registry
            .delete_controller("web")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_delete_service_removes_endpoints() {
        let store = Arc::new(MemoryStore::new());
        let registry = StoreServiceRegistry::new(store.clone());
        let service = Service {
            id: "web".to_string(),
            port: 80,
            ..Default::default()
        };
        registry.create_service(service.clone()).await.unwrap();
        assert_eq!(registry.get_service("web").await.unwrap(), service);

        let endpoints = Endpoints {
            name: "web".to_string(),
            endpoints: vec!["h1:80".to_string(), "h2:80".to_string()],
        };
        registry.update_endpoints(endpoints.clone()).await.unwrap();
        assert_eq!(registry.get_endpoints("web").await.unwrap(), endpoints);

        registry.delete_service("web").await.unwrap();
        assert!(registry.get_service("web").await.unwrap_err().is_not_found());
        assert!(registry.get_endpoints("web").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_service_without_endpoints() {
        let store = Arc::new(MemoryStore::new());
        let registry = StoreServiceRegistry::new(store);
        registry
            .create_service(Service {
                id: "lonely".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        registry.delete_service("lonely").await.unwrap();
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let store = Arc::new(MemoryStore::new());
        // A leaf where the services directory should be.
        store.set("/registry/services", "oops", 0).await.unwrap();
        let registry = StoreServiceRegistry::new(store);

        let err = registry
            .create_service(Service {
                id: "web".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
    }
}
