//! Task placement.
//!
//! A [`Scheduler`] picks the machine a new task runs on. Three policies:
//!
//! - [`RandomScheduler`]: uniform choice, no state
//! - [`RoundRobinScheduler`]: cycles through the machine list
//! - [`FirstFitScheduler`]: first machine with no host port conflict

mod first_fit;
mod random;
mod round_robin;

use std::sync::Arc;

use async_trait::async_trait;
use skiff_api::Task;
use thiserror::Error;

use crate::config::SchedulerKind;
use crate::registry::{RegistryError, TaskRegistry};

pub use first_fit::FirstFitScheduler;
pub use random::RandomScheduler;
pub use round_robin::RoundRobinScheduler;

/// Result type for scheduling.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no machines to schedule onto")]
    NoMachines,

    /// Every machine already has a task claiming one of the task's host ports.
    #[error("failed to find a machine for task {}", .task.id)]
    NoFit { task: Box<Task> },

    #[error("listing scheduled tasks failed: {0}")]
    TaskList(#[source] Box<RegistryError>),
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Choose a machine for `task`.
    async fn schedule(&self, task: &Task) -> SchedulerResult<String>;
}

/// Build the scheduler selected by configuration.
pub fn build(
    kind: SchedulerKind,
    machines: Vec<String>,
    tasks: Arc<dyn TaskRegistry>,
) -> Arc<dyn Scheduler> {
    match kind {
        SchedulerKind::Random => Arc::new(RandomScheduler::new(machines)),
        SchedulerKind::RoundRobin => Arc::new(RoundRobinScheduler::new(machines)),
        SchedulerKind::FirstFit => Arc::new(FirstFitScheduler::new(machines, tasks)),
    }
}
