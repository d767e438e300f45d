//! Entity type definitions.
//!
//! Field names serialize in camelCase. Optional and empty fields are omitted
//! so records stay small in the store; defaults fill them back in on read.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::labels::{LabelQuery, Labels};

// =============================================================================
// Constants
// =============================================================================

/// Label stamped onto every replica, naming the controller that created it.
pub const REPLICATION_CONTROLLER_LABEL: &str = "replicationController";

/// Environment variable carrying the machine a container runs on.
pub const SERVICE_HOST_ENV: &str = "SERVICE_HOST";

/// Suffix of the per-service port environment variable.
pub const SERVICE_PORT_ENV_SUFFIX: &str = "_SERVICE_PORT";

// =============================================================================
// Manifests
// =============================================================================

/// A port exposed by a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub host_port: u16,
    #[serde(default)]
    pub container_port: u16,
}

/// A single environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A container to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl Container {
    /// Host ports claimed by this container.
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().map(|p| p.host_port)
    }
}

/// The execution spec a worker machine runs. The worker agent consumes a JSON
/// array of these per machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerManifest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

// =============================================================================
// Tasks
// =============================================================================

/// Desired or observed state of a task.
///
/// The desired state carries the manifest; the current state carries the
/// host, a free-form status string and the worker-reported info blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    #[serde(default)]
    pub manifest: ContainerManifest,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Worker-reported container info. `Null` until a worker has been asked.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub info: serde_json::Value,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default)]
    pub desired_state: TaskState,
    #[serde(default)]
    pub current_state: TaskState,
}

impl Task {
    /// Every host port declared by any container of the task.
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.desired_state
            .manifest
            .containers
            .iter()
            .flat_map(Container::host_ports)
    }

    /// Returns true if any of this task's host ports is also claimed by `other`.
    pub fn conflicts_with(&self, other: &Task) -> bool {
        self.host_ports()
            .any(|port| other.host_ports().any(|taken| taken == port))
    }

    /// The host port of the first declared port on the first container.
    pub fn primary_host_port(&self) -> Option<u16> {
        self.desired_state
            .manifest
            .containers
            .first()
            .and_then(|c| c.ports.first())
            .map(|p| p.host_port)
    }

    /// A task must have an ID.
    pub fn validate(&self) -> Result<(), ApiError> {
        require_id("task", &self.id)
    }
}

// =============================================================================
// Replication controllers
// =============================================================================

/// Template used to stamp out new replicas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    #[serde(default)]
    pub desired_state: TaskState,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Desired state of a replication controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationControllerState {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub replicas_in_set: LabelQuery,
    #[serde(default)]
    pub task_template: TaskTemplate,
}

/// A desired replica count over the tasks matching a selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationController {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default)]
    pub desired_state: ReplicationControllerState,
}

impl ReplicationController {
    /// The selector identifying tasks owned by this controller.
    pub fn selector(&self) -> &LabelQuery {
        &self.desired_state.replicas_in_set
    }

    /// A controller must have an ID.
    pub fn validate(&self) -> Result<(), ApiError> {
        require_id("replication controller", &self.id)
    }
}

// =============================================================================
// Services
// =============================================================================

/// A named logical backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub port: u16,
    /// Selector for member tasks.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl Service {
    /// The selector identifying the service's member tasks.
    pub fn selector(&self) -> LabelQuery {
        LabelQuery::from(&self.labels)
    }

    /// Name of the environment variable advertising this service's port.
    pub fn port_env_name(&self) -> String {
        format!("{}{}", self.id.to_uppercase(), SERVICE_PORT_ENV_SUFFIX)
    }

    /// A service must have an ID.
    pub fn validate(&self) -> Result<(), ApiError> {
        require_id("service", &self.id)
    }
}

/// Live backend addresses published for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn require_id(kind: &'static str, id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::MissingId { kind });
    }
    Ok(())
}
