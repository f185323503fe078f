//! Error handling for the storage uploader
//!
//! This module defines the error types used throughout the library. Session
//! level failures (configuration, discovery, resource exhaustion) stop a whole
//! run; every other variant is scoped to a single upload job.

use crate::client::ClientError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, UploaderError>;

/// Failures raised while expanding the file selectors of a session
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No selector was supplied at all
    #[error("No file selector supplied")]
    EmptySelector,

    /// The selector is not a valid glob pattern
    #[error("Invalid file pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The selector matched nothing on disk
    #[error("{selector} could not be found")]
    NotFound { selector: String },

    /// A matched path exists but cannot be read
    #[error("{path} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Selectors expanded to directories only
    #[error("0 files specified to be uploaded")]
    NoFiles,
}

/// Error types that can occur while running an upload session
#[derive(Error, Debug)]
pub enum UploaderError {
    /// Invalid session configuration
    #[error("Configuration error: {parameter} - {message}")]
    Config { parameter: String, message: String },

    /// File discovery failed
    #[error("File discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Local workspace could not be prepared or written
    #[error("Workspace error: {message}")]
    Workspace {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The cipher stream rejected its input
    #[error("Cipher error: {message}")]
    Cipher { message: String },

    /// Token creation kept failing until the attempt cap was hit
    #[error("Could not obtain a storage token after {attempts} attempt(s): {source}")]
    Authorization {
        attempts: u32,
        #[source]
        source: ClientError,
    },

    /// The storage network rejected the file
    #[error("Storing {file} failed: {source}")]
    Storage {
        file: String,
        #[source]
        source: ClientError,
    },

    /// Mirror request failed; never fatal for a job
    #[error("Mirroring {file_id} failed: {source}")]
    Replication {
        file_id: String,
        #[source]
        source: ClientError,
    },

    /// Key store refused the decryption secret
    #[error("Key store error for {file_id}: {message}")]
    KeyStore { file_id: String, message: String },

    /// The resource watchdog fired
    #[error("Not enough free memory to continue! ({available_bytes} bytes available, threshold {threshold_bytes})")]
    ResourceExhausted {
        available_bytes: u64,
        threshold_bytes: u64,
    },

    /// A job stopped because the session was aborted
    #[error("Job aborted during {stage}")]
    Aborted { stage: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An upload job panicked
    #[error("Upload job panicked: {message}")]
    Panic { message: String },
}

impl UploaderError {
    /// Create a new configuration error
    pub fn config_error(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        UploaderError::Config {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a new workspace error
    pub fn workspace_error(message: impl Into<String>, source: std::io::Error) -> Self {
        UploaderError::Workspace {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a new cipher error
    pub fn cipher_error(message: impl Into<String>) -> Self {
        UploaderError::Cipher {
            message: message.into(),
        }
    }

    /// Create a new authorization error
    pub fn authorization_error(attempts: u32, source: ClientError) -> Self {
        UploaderError::Authorization { attempts, source }
    }

    /// Create a new storage error
    pub fn storage_error(file: impl Into<String>, source: ClientError) -> Self {
        UploaderError::Storage {
            file: file.into(),
            source,
        }
    }

    /// Create a new replication error
    pub fn replication_error(file_id: impl Into<String>, source: ClientError) -> Self {
        UploaderError::Replication {
            file_id: file_id.into(),
            source,
        }
    }

    /// Create a new key store error
    pub fn key_store_error(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        UploaderError::KeyStore {
            file_id: file_id.into(),
            message: message.into(),
        }
    }

    /// Create a new resource exhaustion error
    pub fn resource_exhausted_error(available_bytes: u64, threshold_bytes: u64) -> Self {
        UploaderError::ResourceExhausted {
            available_bytes,
            threshold_bytes,
        }
    }

    /// Create a new aborted error
    pub fn aborted_error(stage: impl std::fmt::Display) -> Self {
        UploaderError::Aborted {
            stage: stage.to_string(),
        }
    }

    /// Wrap the payload of a caught panic
    pub fn panic_error(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        UploaderError::Panic { message }
    }

    /// Whether this error ends the whole session rather than a single job
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            UploaderError::Config { .. }
                | UploaderError::Discovery(_)
                | UploaderError::ResourceExhausted { .. }
        )
    }
}
