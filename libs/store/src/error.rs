//! Store error types.

use serde::Deserialize;
use thiserror::Error;

/// etcd v2 error codes used by the control plane.
pub mod codes {
    pub const KEY_NOT_FOUND: u32 = 100;
    pub const NOT_FILE: u32 = 102;
    pub const NOT_DIR: u32 = 104;
    pub const NODE_EXIST: u32 = 105;
    pub const EVENT_INDEX_CLEARED: u32 = 401;
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the operation.
    #[error("{message}: {cause} (code {code}, index {index})")]
    Etcd {
        code: u32,
        message: String,
        cause: String,
        index: u64,
    },

    /// The request never produced a response.
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a status and body we cannot interpret.
    #[error("unexpected store response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// A response body could not be decoded.
    #[error("malformed store response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A watch was interrupted before delivering a notification.
    #[error("watch reset: {0}")]
    WatchReset(String),

    /// No store servers were configured.
    #[error("no store servers configured")]
    NoServers,
}

impl StoreError {
    pub(crate) fn etcd(code: u32, message: &str, cause: &str, index: u64) -> Self {
        StoreError::Etcd {
            code,
            message: message.to_string(),
            cause: cause.to_string(),
            index,
        }
    }

    pub(crate) fn key_not_found(key: &str, index: u64) -> Self {
        Self::etcd(codes::KEY_NOT_FOUND, "Key not found", key, index)
    }

    pub(crate) fn node_exist(key: &str, index: u64) -> Self {
        Self::etcd(codes::NODE_EXIST, "Key already exists", key, index)
    }

    /// The store error code, if the store itself rejected the operation.
    pub fn code(&self) -> Option<u32> {
        match self {
            StoreError::Etcd { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the key does not exist.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(codes::KEY_NOT_FOUND)
    }

    /// Returns true if a create hit an existing key.
    pub fn is_node_exist(&self) -> bool {
        self.code() == Some(codes::NODE_EXIST)
    }
}

/// Error body returned by etcd on a failed request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EtcdErrorBody {
    pub error_code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub index: u64,
}

impl From<EtcdErrorBody> for StoreError {
    fn from(body: EtcdErrorBody) -> Self {
        StoreError::Etcd {
            code: body.error_code,
            message: body.message,
            cause: body.cause,
            index: body.index,
        }
    }
}
