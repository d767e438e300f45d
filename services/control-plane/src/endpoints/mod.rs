//! Service endpoint publication.
//!
//! Every period each service's endpoints record is overwritten with the
//! `host:port` of every task its selector matches. The port is the host port
//! of the task's first container's first port.

mod controller;
mod worker;

pub use controller::{task_endpoint, EndpointController, EndpointSyncStats};
pub use worker::EndpointWorker;
