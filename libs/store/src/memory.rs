//! In-process coordination store.
//!
//! Keeps the etcd v2 semantics the control plane relies on: implicit
//! directories, a store-wide modified index, create-if-absent, recursive
//! delete, TTL expiry and watches that can resume from a recent index.
//! Nothing is persisted.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::{codes, StoreError, StoreResult};
use crate::types::{Action, Node, Response};
use crate::{normalize_key, KvStore};

/// Number of past events kept for watches that resume from an index.
const HISTORY_LIMIT: usize = 1000;

/// Capacity of the live notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_index: u64,
    modified_index: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn to_node(&self, key: &str) -> Node {
        Node {
            key: key.to_string(),
            value: Some(self.value.clone()),
            created_index: self.created_index,
            modified_index: self.modified_index,
            ttl: self
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    index: u64,
    entries: BTreeMap<String, Entry>,
    history: VecDeque<Response>,
}

/// In-memory [`KvStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Response>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn record(&self, inner: &mut Inner, response: Response) {
        inner.history.push_back(response.clone());
        if inner.history.len() > HISTORY_LIMIT {
            inner.history.pop_front();
        }
        // No receivers simply means nobody is watching.
        let _ = self.events.send(response);
    }

    fn expire(&self, inner: &mut Inner) {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.index += 1;
                debug!(key = %key, "Key expired");
                let response = Response {
                    action: Action::Expire,
                    node: Some(Node {
                        key: key.clone(),
                        created_index: entry.created_index,
                        modified_index: inner.index,
                        ..Default::default()
                    }),
                    prev_node: Some(entry.to_node(&key)),
                };
                self.record(inner, response);
            }
        }
    }

    fn write(
        &self,
        inner: &mut Inner,
        key: &str,
        value: &str,
        ttl: u64,
        action: Action,
    ) -> StoreResult<Response> {
        if has_children(&inner.entries, key) {
            return Err(StoreError::etcd(
                codes::NOT_FILE,
                "Not a file",
                key,
                inner.index,
            ));
        }
        if let Some(parent) = leaf_ancestor(&inner.entries, key) {
            return Err(StoreError::etcd(
                codes::NOT_DIR,
                "Not a directory",
                &parent,
                inner.index,
            ));
        }

        inner.index += 1;
        let prev = inner.entries.get(key).cloned();
        let entry = Entry {
            value: value.to_string(),
            created_index: prev.as_ref().map_or(inner.index, |p| p.created_index),
            modified_index: inner.index,
            expires_at: (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl)),
        };
        let response = Response {
            action,
            node: Some(entry.to_node(key)),
            prev_node: prev.map(|p| p.to_node(key)),
        };
        inner.entries.insert(key.to_string(), entry);
        self.record(inner, response.clone());
        Ok(response)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_prefix(key: &str) -> String {
    if key == "/" {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

fn has_children(entries: &BTreeMap<String, Entry>, key: &str) -> bool {
    let prefix = dir_prefix(key);
    entries
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&prefix))
}

fn leaf_ancestor(entries: &BTreeMap<String, Entry>, key: &str) -> Option<String> {
    let mut end = key.len();
    while let Some(pos) = key[..end].rfind('/') {
        if pos == 0 {
            break;
        }
        let ancestor = &key[..pos];
        if entries.contains_key(ancestor) {
            return Some(ancestor.to_string());
        }
        end = pos;
    }
    None
}

/// Build the directory node for `key` from every entry below it.
fn dir_node(entries: &BTreeMap<String, Entry>, key: &str, recursive: bool) -> Option<Node> {
    let prefix = dir_prefix(key);
    let mut children: BTreeMap<String, Node> = BTreeMap::new();
    let mut created_index = u64::MAX;
    let mut modified_index = 0;

    for (child_key, entry) in entries
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
    {
        created_index = created_index.min(entry.created_index);
        modified_index = modified_index.max(entry.modified_index);

        let rest = &child_key[prefix.len()..];
        match rest.split_once('/') {
            None => {
                children.insert(child_key.clone(), entry.to_node(child_key));
            }
            Some((segment, _)) => {
                let sub_key = format!("{prefix}{segment}");
                if !children.contains_key(&sub_key) {
                    let node = if recursive {
                        dir_node(entries, &sub_key, true)
                    } else {
                        None
                    };
                    children.insert(
                        sub_key.clone(),
                        node.unwrap_or_else(|| Node {
                            key: sub_key.clone(),
                            dir: true,
                            ..Default::default()
                        }),
                    );
                }
            }
        }
    }

    if children.is_empty() {
        return None;
    }

    Some(Node {
        key: key.to_string(),
        dir: true,
        nodes: children.into_values().collect(),
        created_index,
        modified_index,
        ..Default::default()
    })
}

fn watch_matches(prefix: &str, recursive: bool, response: &Response) -> bool {
    let Some(node) = &response.node else {
        return false;
    };
    if node.key == prefix {
        return true;
    }
    if recursive && node.key.starts_with(&dir_prefix(prefix)) {
        return true;
    }
    // A recursive delete of an ancestor removes the watched keys too.
    node.dir && prefix.starts_with(&dir_prefix(&node.key))
}

fn event_index(response: &Response) -> u64 {
    response.modified_index().unwrap_or_default()
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, _sorted: bool, recursive: bool) -> StoreResult<Response> {
        let key = normalize_key(key);
        let mut inner = self.inner.lock().await;
        self.expire(&mut inner);

        // Keys are held in a BTreeMap, so listings are always sorted.
        let node = match inner.entries.get(&key) {
            Some(entry) => entry.to_node(&key),
            None => dir_node(&inner.entries, &key, recursive)
                .ok_or_else(|| StoreError::key_not_found(&key, inner.index))?,
        };

        Ok(Response {
            action: Action::Get,
            node: Some(node),
            prev_node: None,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response> {
        let key = normalize_key(key);
        let mut inner = self.inner.lock().await;
        self.expire(&mut inner);
        self.write(&mut inner, &key, value, ttl, Action::Set)
    }

    async fn create(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response> {
        let key = normalize_key(key);
        let mut inner = self.inner.lock().await;
        self.expire(&mut inner);

        if inner.entries.contains_key(&key) || has_children(&inner.entries, &key) {
            return Err(StoreError::node_exist(&key, inner.index));
        }
        self.write(&mut inner, &key, value, ttl, Action::Create)
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<Response> {
        let key = normalize_key(key);
        let mut inner = self.inner.lock().await;
        self.expire(&mut inner);

        if let Some(prev) = inner.entries.remove(&key) {
            inner.index += 1;
            let response = Response {
                action: Action::Delete,
                node: Some(Node {
                    key: key.clone(),
                    created_index: prev.created_index,
                    modified_index: inner.index,
                    ..Default::default()
                }),
                prev_node: Some(prev.to_node(&key)),
            };
            self.record(&mut inner, response.clone());
            return Ok(response);
        }

        if !has_children(&inner.entries, &key) {
            return Err(StoreError::key_not_found(&key, inner.index));
        }
        if !recursive {
            return Err(StoreError::etcd(
                codes::NOT_FILE,
                "Not a file",
                &key,
                inner.index,
            ));
        }

        let prefix = dir_prefix(&key);
        inner.entries.retain(|k, _| !k.starts_with(&prefix));
        inner.index += 1;
        let response = Response {
            action: Action::Delete,
            node: Some(Node {
                key: key.clone(),
                dir: true,
                modified_index: inner.index,
                ..Default::default()
            }),
            prev_node: None,
        };
        self.record(&mut inner, response.clone());
        Ok(response)
    }

    async fn watch(&self, prefix: &str, wait_index: u64, recursive: bool) -> StoreResult<Response> {
        let prefix = normalize_key(prefix);

        let (mut events, wait_index) = {
            let inner = self.inner.lock().await;
            let wait_index = if wait_index == 0 {
                inner.index + 1
            } else {
                wait_index
            };

            if let Some(oldest) = inner.history.front() {
                if inner.history.len() >= HISTORY_LIMIT && wait_index < event_index(oldest) {
                    return Err(StoreError::etcd(
                        codes::EVENT_INDEX_CLEARED,
                        "The event in requested index is outdated and cleared",
                        &format!("the requested history has been cleared [{wait_index}]"),
                        inner.index,
                    ));
                }
            }

            if let Some(past) = inner
                .history
                .iter()
                .find(|r| event_index(r) >= wait_index && watch_matches(&prefix, recursive, r))
            {
                return Ok(past.clone());
            }

            // Subscribe while still holding the lock so no write slips between
            // the history scan and the live channel.
            (self.events.subscribe(), wait_index)
        };

        loop {
            match events.recv().await {
                Ok(response) => {
                    if event_index(&response) >= wait_index
                        && watch_matches(&prefix, recursive, &response)
                    {
                        return Ok(response);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(StoreError::WatchReset(format!(
                        "watcher fell behind by {skipped} events"
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StoreError::WatchReset("store closed".to_string()));
                }
            }
        }
    }
}
