use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skiff_api::Task;

use super::{Scheduler, SchedulerError, SchedulerResult};

/// Picks a machine uniformly at random on every call.
pub struct RandomScheduler {
    machines: Vec<String>,
    rng: Mutex<StdRng>,
}

impl RandomScheduler {
    pub fn new(machines: Vec<String>) -> Self {
        Self {
            machines,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic choices, for tests.
    pub fn with_seed(machines: Vec<String>, seed: u64) -> Self {
        Self {
            machines,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl Scheduler for RandomScheduler {
    async fn schedule(&self, _task: &Task) -> SchedulerResult<String> {
        if self.machines.is_empty() {
            return Err(SchedulerError::NoMachines);
        }
        let ix = {
            // A poisoned lock still holds a usable generator.
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.random_range(0..self.machines.len())
        };
        Ok(self.machines[ix].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machines() -> Vec<String> {
        ["m1", "m2", "m3", "m4"].iter().map(|m| m.to_string()).collect()
    }

    #[tokio::test]
    async fn test_picks_a_known_machine() {
        let scheduler = RandomScheduler::new(machines());
        for _ in 0..20 {
            let machine = scheduler.schedule(&Task::default()).await.unwrap();
            assert!(machines().contains(&machine));
        }
    }

    #[tokio::test]
    async fn test_seeded_is_deterministic() {
        let a = RandomScheduler::with_seed(machines(), 7);
        let b = RandomScheduler::with_seed(machines(), 7);
        for _ in 0..10 {
            assert_eq!(
                a.schedule(&Task::default()).await.unwrap(),
                b.schedule(&Task::default()).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_no_machines() {
        let scheduler = RandomScheduler::new(vec![]);
        assert!(matches!(
            scheduler.schedule(&Task::default()).await,
            Err(SchedulerError::NoMachines)
        ));
    }
}
