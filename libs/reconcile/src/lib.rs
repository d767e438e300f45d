//! Loop driving and replica arithmetic shared by the control plane's
//! reconciliation loops.
//!
//! A loop lists what is live, compares it with what a spec asks for, and acts
//! on the difference. [`forever`] runs such a pass on a period until shutdown;
//! [`replica_diff`] is the comparison for replica counts.
//!
//! A failed or panicking pass never stops its loop: the next period retries.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Default period of the controller poll driver.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Default period of the endpoint sync loop.
pub const DEFAULT_ENDPOINT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Default pause after a watch subscription resets.
pub const DEFAULT_WATCH_COOLDOWN: Duration = Duration::from_secs(10);

/// Default delay before a long-running loop that returned is started again.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(20);

/// What a replica reconciliation pass has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaAction {
    /// Create this many new replicas.
    Create(usize),

    /// Delete this many live replicas.
    Delete(usize),

    /// Live count already matches.
    Converged,
}

impl ReplicaAction {
    /// Returns true if no action is needed.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Compare the live replica count against the desired count.
pub fn replica_diff(live: usize, desired: usize) -> ReplicaAction {
    if live < desired {
        ReplicaAction::Create(desired - live)
    } else if live > desired {
        ReplicaAction::Delete(live - desired)
    } else {
        ReplicaAction::Converged
    }
}

/// Run `work` every `period` until shutdown is signaled.
///
/// Errors returned by an iteration are logged. A panic inside an iteration is
/// caught at the iteration boundary and logged; the loop then waits for the
/// next period as usual.
pub async fn forever<F, Fut, E>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut work: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    info!(
        task = name,
        period_ms = period.as_millis() as u64,
        "Starting periodic task"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        match AssertUnwindSafe(work()).catch_unwind().await {
            Ok(Ok(())) => debug!(task = name, "Iteration complete"),
            Ok(Err(e)) => error!(task = name, error = %e, "Iteration failed"),
            Err(panic) => error!(
                task = name,
                panic = %panic_message(panic.as_ref()),
                "Recovered from panic in periodic task"
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(task = name, "Periodic task shutting down");
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
