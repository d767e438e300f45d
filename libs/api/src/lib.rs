//! # skiff-api
//!
//! Entity types and label queries shared by every skiff component.
//!
//! ## Design Principles
//!
//! - Every persisted entity has an opaque string ID and a label map
//! - Labels are used for selection, never for ownership
//! - Records round-trip losslessly through JSON (what the store holds)
//!
//! ## Entities
//!
//! - [`Task`]: a schedulable unit of work bound to one machine once created
//! - [`ReplicationController`]: a desired replica count over a label selector
//! - [`Service`]: a named port over a label selector
//! - [`Endpoints`]: the derived `host:port` list published for a service
//! - [`ContainerManifest`]: the execution spec handed to a worker machine

mod error;
mod labels;
mod types;

pub use error::ApiError;
pub use labels::{LabelQuery, Labels};
pub use types::*;
