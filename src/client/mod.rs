//! Storage bridge client interface
//!
//! The uploader never talks to the network itself. Hosts plug in a
//! [`StorageClient`] that issues write tokens, transfers ciphertext files and
//! requests shard mirrors against a bucket.

pub mod types;

pub use types::{ClientError, FileRecord, ShardReplication, StorageToken};

use async_trait::async_trait;
use std::path::Path;

/// Operations the upload pipeline needs from the storage bridge
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Request a single-use write token for `bucket`
    async fn create_write_token(&self, bucket: &str) -> Result<StorageToken, ClientError>;

    /// Transfer the file at `path` into `bucket` under `token`
    ///
    /// `shard_concurrency` caps how many shards of the file are in transit
    /// at once.
    async fn store_file(
        &self,
        bucket: &str,
        token: &StorageToken,
        path: &Path,
        shard_concurrency: u32,
    ) -> Result<FileRecord, ClientError>;

    /// Ask the network for `mirrors` extra copies of every shard of `file_id`
    async fn replicate(
        &self,
        bucket: &str,
        file_id: &str,
        mirrors: u32,
    ) -> Result<Vec<ShardReplication>, ClientError>;
}
