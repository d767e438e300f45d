//! Resumable watch over a key prefix.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::types::Response;
use crate::KvStore;

/// A watch subscription that remembers where it left off.
///
/// Each call to [`Watch::next`] long-polls the store for the first change
/// after the last one delivered. A store error ends the current subscription:
/// `next` returns `None` and the following call starts again from "now".
pub struct Watch {
    store: Arc<dyn KvStore>,
    prefix: String,
    recursive: bool,
    next_index: u64,
}

impl Watch {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, recursive: bool) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            recursive,
            next_index: 0,
        }
    }

    /// Start from a specific store index instead of the next change.
    pub fn from_index(mut self, index: u64) -> Self {
        self.next_index = index;
        self
    }

    /// Wait for the next notification, or `None` if the subscription reset.
    pub async fn next(&mut self) -> Option<Response> {
        match self
            .store
            .watch(&self.prefix, self.next_index, self.recursive)
            .await
        {
            Ok(response) => {
                if let Some(index) = response.modified_index() {
                    self.next_index = index + 1;
                }
                debug!(prefix = %self.prefix, next_index = self.next_index, "Watch notification");
                Some(response)
            }
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Watch reset");
                self.next_index = 0;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_watch_delivers_changes_in_order() {
        let store = Arc::new(MemoryStore::new());
        store.set("/registry/controllers/a", "1", 0).await.unwrap();
        store.set("/registry/controllers/b", "2", 0).await.unwrap();

        let mut watch = Watch::new(store.clone(), "/registry/controllers", true).from_index(1);
        let first = watch.next().await.unwrap();
        let second = watch.next().await.unwrap();
        assert_eq!(first.node.unwrap().key, "/registry/controllers/a");
        assert_eq!(second.node.unwrap().key, "/registry/controllers/b");
    }

    #[tokio::test]
    async fn test_watch_returns_none_on_error() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..1100 {
            store.set("/registry/noise", &i.to_string(), 0).await.unwrap();
        }

        // Index 1 has been pushed out of the retained history.
        let mut watch = Watch::new(store, "/registry", true).from_index(1);
        assert!(watch.next().await.is_none());
    }
}
