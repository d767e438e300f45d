//! # skiff-store
//!
//! Client side of the coordination store every skiff component persists to.
//!
//! The protocol follows the etcd v2 keys API: a hierarchy of keys where
//! directories are implicit, every write bumps a store-wide modified index,
//! and a watch long-polls for the first change at or after a given index.
//!
//! ## Implementations
//!
//! - [`EtcdClient`]: talks to etcd over HTTP (production)
//! - [`MemoryStore`]: in-process store with the same semantics (tests and
//!   single-node mode)
//!
//! ## Errors
//!
//! Store-level failures carry the etcd error code. "Key not found" (code
//! 100) is distinguished from every other failure via
//! [`StoreError::is_not_found`], so callers can treat it as an empty result.

mod error;
mod etcd;
mod memory;
mod types;
mod watch;

use async_trait::async_trait;

pub use error::{codes, StoreError, StoreResult};
pub use etcd::EtcdClient;
pub use memory::MemoryStore;
pub use types::{Action, Node, Response};
pub use watch::Watch;

/// Hierarchical key-value store with existence-checked writes and watches.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key, or the children of a directory key.
    async fn get(&self, key: &str, sorted: bool, recursive: bool) -> StoreResult<Response>;

    /// Write a value unconditionally. A `ttl` of 0 means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response>;

    /// Write a value only if the key does not exist yet.
    async fn create(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response>;

    /// Delete a key, or with `recursive` a whole directory.
    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<Response>;

    /// Block until the first change under `prefix` whose modified index is at
    /// least `wait_index`. A `wait_index` of 0 waits for the next change.
    async fn watch(&self, prefix: &str, wait_index: u64, recursive: bool) -> StoreResult<Response>;
}

/// Canonical form of a key: one leading slash, no trailing slash.
pub(crate) fn normalize_key(key: &str) -> String {
    let trimmed = key.trim_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push('/');
    out.push_str(trimmed);
    out
}
