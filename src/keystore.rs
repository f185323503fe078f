//! Decryption key store
//!
//! The pipeline only ever writes to the store, and only after the storage
//! network has returned a durable file id. Persistent keyrings live with the
//! host; [`MemoryKeyStore`] covers embedding and tests.

use crate::crypto::CipherSecret;
use crate::error::{Result, UploaderError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Maps stored file ids to the secret that decrypts them
pub trait KeyStore: Send + Sync {
    fn set(&self, file_id: &str, secret: &CipherSecret) -> Result<()>;
}

/// In-process key store
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, CipherSecret>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_id: &str) -> Option<CipherSecret> {
        self.lock().get(file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stored file ids, sorted
    pub fn file_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Export all entries as a JSON object of `file id -> hex secret`
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&*self.lock()).map_err(UploaderError::from)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CipherSecret>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl KeyStore for MemoryKeyStore {
    fn set(&self, file_id: &str, secret: &CipherSecret) -> Result<()> {
        if file_id.is_empty() {
            return Err(UploaderError::key_store_error(file_id, "File id cannot be empty"));
        }
        self.lock().insert(file_id.to_string(), secret.clone());
        Ok(())
    }
}
