//! Wire types of the store protocol.

use serde::{Deserialize, Serialize};

/// The kind of operation a response or watch notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Get,
    Set,
    Create,
    Update,
    Delete,
    Expire,
    CompareAndSwap,
    CompareAndDelete,
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Returns true for actions that leave a new value at the key.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Action::Set | Action::Create | Action::Update | Action::CompareAndSwap
        )
    }
}

/// A key, or a directory with its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub created_index: u64,
    #[serde(default)]
    pub modified_index: u64,
    /// Remaining time to live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl Node {
    /// The value of a leaf node, or an empty string.
    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

/// Result of a store operation, and the payload of a watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub action: Action,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,
}

impl Response {
    /// Children of the returned directory node (empty for a leaf).
    pub fn children(&self) -> &[Node] {
        self.node.as_ref().map(|n| n.nodes.as_slice()).unwrap_or_default()
    }

    /// Modified index of the node this response describes.
    pub fn modified_index(&self) -> Option<u64> {
        self.node.as_ref().map(|n| n.modified_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_watch_notification() {
        let resp: Response = serde_json::from_str(
            r#"{"action":"set","node":{"key":"/registry/controllers/web","value":"{}","modifiedIndex":9,"createdIndex":9}}"#,
        )
        .unwrap();
        assert_eq!(resp.action, Action::Set);
        assert!(resp.action.is_write());
        assert_eq!(resp.modified_index(), Some(9));
        assert_eq!(resp.node.unwrap().value_str(), "{}");
    }

    #[test]
    fn test_decode_directory_listing() {
        let resp: Response = serde_json::from_str(
            r#"{"action":"get","node":{"key":"/registry/controllers","dir":true,"nodes":[
                {"key":"/registry/controllers/a","value":"1","modifiedIndex":3,"createdIndex":3},
                {"key":"/registry/controllers/b","value":"2","modifiedIndex":4,"createdIndex":4}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(resp.children().len(), 2);
        assert_eq!(resp.children()[1].value_str(), "2");
    }

    #[test]
    fn test_unknown_and_non_write_actions() {
        let resp: Response = serde_json::from_str(r#"{"action":"frobnicate"}"#).unwrap();
        assert_eq!(resp.action, Action::Unknown);
        assert!(resp.node.is_none());
        assert!(!Action::Delete.is_write());
        assert!(!Action::Expire.is_write());
        assert!(Action::CompareAndSwap.is_write());
    }
}
