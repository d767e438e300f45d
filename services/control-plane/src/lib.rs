//! skiff control plane.
//!
//! Registries, placement, manifests and the two reconciliation loops. The
//! `control-plane` binary wires these together; integration tests drive them
//! directly.

pub mod config;
pub mod container_info;
pub mod endpoints;
pub mod manifest;
pub mod registry;
pub mod replication;
pub mod scheduler;
pub mod state;
