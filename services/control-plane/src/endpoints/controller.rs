use std::sync::Arc;

use skiff_api::{Endpoints, Service, Task};
use tracing::{debug, info, instrument, warn};

use crate::registry::{RegistryError, RegistryResult, ServiceRegistry, TaskRegistry};

/// Statistics from one endpoint sync pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointSyncStats {
    pub services_published: usize,
    pub services_failed: usize,
    pub tasks_skipped: usize,
}

/// Republishes each service's live backend addresses.
pub struct EndpointController {
    services: Arc<dyn ServiceRegistry>,
    tasks: Arc<dyn TaskRegistry>,
}

/// `{host}:{host port}` of a task's first container's first port.
pub fn task_endpoint(task: &Task) -> Option<String> {
    let port = task.primary_host_port()?;
    Some(format!("{}:{}", task.current_state.host, port))
}

impl EndpointController {
    pub fn new(services: Arc<dyn ServiceRegistry>, tasks: Arc<dyn TaskRegistry>) -> Self {
        Self { services, tasks }
    }

    /// Recompute and overwrite the endpoints record of every service.
    ///
    /// A service whose tasks cannot be listed is skipped and the first such
    /// error is returned once every other service has been published. A
    /// failed endpoints write is logged only.
    #[instrument(skip(self))]
    pub async fn sync_service_endpoints(&self) -> RegistryResult<EndpointSyncStats> {
        let services = self.services.list_services().await?;

        let mut stats = EndpointSyncStats::default();
        let mut first_error: Option<RegistryError> = None;

        for service in &services {
            let tasks = match self.tasks.list_tasks(&service.selector()).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(service = %service.id, error = %e, "Failed to list tasks for service, skipping");
                    stats.services_failed += 1;
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            let endpoints = self.endpoints_for(service, &tasks, &mut stats);
            let count = endpoints.endpoints.len();
            match self.services.update_endpoints(endpoints).await {
                Ok(()) => {
                    stats.services_published += 1;
                    debug!(service = %service.id, endpoints = count, "Endpoints published");
                }
                Err(e) => {
                    warn!(service = %service.id, error = %e, "Failed to update endpoints");
                    stats.services_failed += 1;
                }
            }
        }

        info!(
            services_published = stats.services_published,
            services_failed = stats.services_failed,
            tasks_skipped = stats.tasks_skipped,
            "Endpoint sync complete"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn endpoints_for(
        &self,
        service: &Service,
        tasks: &[Task],
        stats: &mut EndpointSyncStats,
    ) -> Endpoints {
        let mut endpoints = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task_endpoint(task) {
                Some(endpoint) => endpoints.push(endpoint),
                None => {
                    warn!(service = %service.id, task_id = %task.id, "Task declares no port, skipping");
                    stats.tasks_skipped += 1;
                }
            }
        }
        Endpoints {
            name: service.id.clone(),
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skiff_api::{Container, LabelQuery, Port};

    use crate::registry::MemoryRegistry;

    fn task(id: &str, labels: &[(&str, &str)], host_port: Option<u16>) -> Task {
        let mut task = Task {
            id: id.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        task.desired_state.manifest.containers = vec![Container {
            ports: host_port
                .map(|host_port| Port {
                    host_port,
                    ..Default::default()
                })
                .into_iter()
                .collect(),
            ..Default::default()
        }];
        task
    }

    async fn service(registry: &MemoryRegistry, id: &str, labels: &[(&str, &str)]) {
        registry
            .create_service(Service {
                id: id.to_string(),
                port: 80,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_services() {
        let registry = Arc::new(MemoryRegistry::new());
        let controller = EndpointController::new(registry.clone(), registry);
        let stats = controller.sync_service_endpoints().await.unwrap();
        assert_eq!(stats.services_published, 0);
    }

    #[tokio::test]
    async fn test_publishes_host_and_port() {
        let registry = Arc::new(MemoryRegistry::new());
        service(&registry, "foo", &[("foo", "bar")]).await;
        registry
            .create_task("machine", task("t1", &[("foo", "bar")], Some(8080)))
            .await
            .unwrap();
        registry
            .create_task("machine", task("t2", &[("foo", "baz")], Some(9090)))
            .await
            .unwrap();

        let controller = EndpointController::new(registry.clone(), registry.clone());
        controller.sync_service_endpoints().await.unwrap();

        assert_eq!(
            registry.get_endpoints("foo").await.unwrap(),
            Endpoints {
                name: "foo".to_string(),
                endpoints: vec!["machine:8080".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_task_without_port_is_skipped() {
        let registry = Arc::new(MemoryRegistry::new());
        service(&registry, "foo", &[]).await;
        registry
            .create_task("m", task("t1", &[], None))
            .await
            .unwrap();

        let controller = EndpointController::new(registry.clone(), registry.clone());
        let stats = controller.sync_service_endpoints().await.unwrap();
        assert_eq!(stats.tasks_skipped, 1);
        assert!(registry.get_endpoints("foo").await.unwrap().endpoints.is_empty());
    }

    /// Fails to list tasks for one specific selector.
    struct FlakyTasks {
        inner: MemoryRegistry,
        broken: LabelQuery,
    }

    #[async_trait]
    impl TaskRegistry for FlakyTasks {
        async fn list_tasks(&self, query: &LabelQuery) -> RegistryResult<Vec<Task>> {
            if *query == self.broken {
                return Err(RegistryError::not_found("task list", query.to_string()));
            }
            self.inner.list_tasks(query).await
        }

        async fn get_task(&self, id: &str) -> RegistryResult<Task> {
            self.inner.get_task(id).await
        }

        async fn create_task(&self, machine: &str, task: Task) -> RegistryResult<()> {
            self.inner.create_task(machine, task).await
        }

        async fn update_task(&self, task: Task) -> RegistryResult<()> {
            self.inner.update_task(task).await
        }

        async fn delete_task(&self, id: &str) -> RegistryResult<()> {
            self.inner.delete_task(id).await
        }
    }

    #[tokio::test]
    async fn test_failed_service_does_not_stop_the_pass() {
        let services = Arc::new(MemoryRegistry::new());
        service(&services, "a", &[("app", "a")]).await;
        service(&services, "b", &[("app", "b")]).await;

        let tasks = FlakyTasks {
            inner: MemoryRegistry::new(),
            broken: LabelQuery::from_pairs([("app", "a")]),
        };
        tasks
            .create_task("h", task("t", &[("app", "b")], Some(80)))
            .await
            .unwrap();

        let controller = EndpointController::new(services.clone(), Arc::new(tasks));
        assert!(controller.sync_service_endpoints().await.is_err());

        assert!(services.get_endpoints("a").await.unwrap_err().is_not_found());
        assert_eq!(
            services.get_endpoints("b").await.unwrap().endpoints,
            vec!["h:80"]
        );
    }
}
