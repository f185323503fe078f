//! Encrypted multi-file uploads to a bucket-based storage network
//!
//! An [`UploadSession`] expands file selectors, encrypts every file into its
//! own temporary workspace, obtains a write token, stores the ciphertext and
//! optionally asks the network to mirror it. A resource watchdog can abort
//! the whole session when free memory runs low.

pub mod client;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod keystore;
pub mod session;
pub mod upload;
pub mod watchdog;
pub mod workspace;

pub use client::{ClientError, FileRecord, ShardReplication, StorageClient, StorageToken};

pub use crypto::{ChaChaFrameCipher, CipherFactory, CipherSecret, StreamEncryptor};

pub use discovery::discover_files;

pub use error::{DiscoveryError, Result, UploaderError};

pub use keystore::{KeyStore, MemoryKeyStore};

pub use session::{JobSummary, SessionConfig, SessionReport, UploadSession};

pub use upload::{JobId, JobStage, SessionEvent, SessionEventKind};

pub use watchdog::{
    AbortSignal, LowResourceEvent, ManualSignal, PollingSignal, ResourceSignal, SignalTrigger,
    WatchdogSettings,
};

pub use workspace::Workspace;
