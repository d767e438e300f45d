use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use skiff_api::{LabelQuery, Task};
use tracing::debug;

use super::{Scheduler, SchedulerError, SchedulerResult};
use crate::registry::TaskRegistry;

/// Places a task on the first machine, in configured order, where no
/// scheduled task already claims one of its host ports.
///
/// Greedy: no backtracking, and only host ports are considered.
pub struct FirstFitScheduler {
    machines: Vec<String>,
    tasks: Arc<dyn TaskRegistry>,
}

impl FirstFitScheduler {
    pub fn new(machines: Vec<String>, tasks: Arc<dyn TaskRegistry>) -> Self {
        Self { machines, tasks }
    }
}

#[async_trait]
impl Scheduler for FirstFitScheduler {
    async fn schedule(&self, task: &Task) -> SchedulerResult<String> {
        let scheduled = self
            .tasks
            .list_tasks(&LabelQuery::everything())
            .await
            .map_err(|e| SchedulerError::TaskList(Box::new(e)))?;

        let mut by_host: HashMap<&str, Vec<&Task>> = HashMap::new();
        for existing in &scheduled {
            by_host
                .entry(existing.current_state.host.as_str())
                .or_default()
                .push(existing);
        }

        for machine in &self.machines {
            let fits = by_host
                .get(machine.as_str())
                .is_none_or(|on_machine| !on_machine.iter().any(|t| task.conflicts_with(t)));
            if fits {
                debug!(task_id = %task.id, machine = %machine, "First fit");
                return Ok(machine.clone());
            }
        }

        Err(SchedulerError::NoFit {
            task: Box::new(task.clone()),
        })
    }
}
