//! Replication: keep each controller's replica count live.

mod control;
mod manager;
mod worker;

pub use control::{replica_from_template, StorageTaskControl, TaskControl};
pub use manager::{
    active_tasks, ReplicationError, ReplicationManager, ReplicationStats, SyncOutcome,
    EXITED_STATUS_MARKER,
};
pub use worker::{ReplicationPollWorker, ReplicationWatchWorker};
