use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use skiff_api::Task;

use super::{Scheduler, SchedulerError, SchedulerResult};

/// Visits machines in configured order, wrapping around.
///
/// The cursor is shared by all callers and advanced atomically, so concurrent
/// calls never return the same slot twice in one lap.
pub struct RoundRobinScheduler {
    machines: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinScheduler {
    pub fn new(machines: Vec<String>) -> Self {
        Self {
            machines,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scheduler for RoundRobinScheduler {
    async fn schedule(&self, _task: &Task) -> SchedulerResult<String> {
        if self.machines.is_empty() {
            return Err(SchedulerError::NoMachines);
        }
        let ix = self.next.fetch_add(1, Ordering::Relaxed) % self.machines.len();
        Ok(self.machines[ix].clone())
    }
}
