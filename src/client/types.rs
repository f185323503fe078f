//! Types exchanged with the storage bridge

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a [`StorageClient`](super::StorageClient) call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct ClientError {
    /// Bridge operation that failed
    pub operation: String,
    /// Message returned by the bridge or transport
    pub message: String,
    /// HTTP-like status code, when the bridge returned one
    pub status: Option<u16>,
}

impl ClientError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Single-use write authorization for one storage attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageToken {
    /// Opaque token value
    pub token: String,
    /// Bucket the token is scoped to
    pub bucket: String,
    /// Operation the token grants, `PUSH` for uploads
    #[serde(default = "default_operation")]
    pub operation: String,
}

fn default_operation() -> String {
    "PUSH".to_string()
}

impl StorageToken {
    pub fn new(token: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            bucket: bucket.into(),
            operation: default_operation(),
        }
    }
}

/// Record returned by the bridge once a file has been accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileRecord {
    /// Durable file identifier, the key under which the secret is stored
    pub id: String,
    /// Name the bridge recorded for the file
    #[serde(rename = "filename", default)]
    pub name: String,
    /// Size in bytes of the stored ciphertext
    pub size: u64,
    /// MIME type reported by the bridge, if any
    #[serde(default)]
    pub mimetype: String,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            mimetype: String::new(),
        }
    }

    /// Set the mimetype
    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    /// Get a human-readable size string
    pub fn size_string(&self) -> String {
        bytesize::ByteSize::b(self.size).to_string()
    }
}

/// Mirror status of one shard after a replication request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReplication {
    /// Shard hash
    pub hash: String,
    /// Bridge status string, e.g. `established`
    pub status: String,
    /// Number of nodes mirroring the shard
    pub mirrors: u32,
}
