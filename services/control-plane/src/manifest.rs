//! Execution manifests handed to worker machines.

use std::sync::Arc;

use async_trait::async_trait;
use skiff_api::{ContainerManifest, EnvVar, Task, SERVICE_HOST_ENV};
use tracing::debug;

use crate::registry::{RegistryResult, ServiceRegistry};

/// Builds the manifest a machine runs for a task.
#[async_trait]
pub trait ManifestFactory: Send + Sync {
    async fn make_manifest(&self, machine: &str, task: &Task) -> RegistryResult<ContainerManifest>;
}

/// Stamps the task ID on the manifest and injects service discovery
/// variables into every container.
///
/// Each container gets, after its own variables, one `{NAME}_SERVICE_PORT`
/// per known service in registry order, then `SERVICE_HOST` set to the
/// machine.
pub struct BasicManifestFactory {
    services: Arc<dyn ServiceRegistry>,
}

impl BasicManifestFactory {
    pub fn new(services: Arc<dyn ServiceRegistry>) -> Self {
        Self { services }
    }

    async fn service_env(&self, machine: &str) -> RegistryResult<Vec<EnvVar>> {
        let services = self.services.list_services().await?;
        let mut env: Vec<EnvVar> = services
            .iter()
            .map(|s| EnvVar::new(s.port_env_name(), s.port.to_string()))
            .collect();
        env.push(EnvVar::new(SERVICE_HOST_ENV, machine));
        Ok(env)
    }
}

#[async_trait]
impl ManifestFactory for BasicManifestFactory {
    async fn make_manifest(&self, machine: &str, task: &Task) -> RegistryResult<ContainerManifest> {
        let env = self.service_env(machine).await?;

        let mut manifest = task.desired_state.manifest.clone();
        manifest.id = task.id.clone();
        for container in &mut manifest.containers {
            container.env.extend(env.iter().cloned());
        }

        debug!(task_id = %task.id, machine = %machine, env_count = env.len(), "Built manifest");
        Ok(manifest)
    }
}
