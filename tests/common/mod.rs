//! Scripted storage client shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage_uploader::{ClientError, FileRecord, ShardReplication, StorageClient, StorageToken};
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Token(String),
    Store {
        bucket: String,
        path: PathBuf,
        shard_concurrency: u32,
    },
    Replicate { file_id: String, mirrors: u32 },
}

#[derive(Default)]
struct Script {
    token_failures: VecDeque<bool>,
    always_fail_tokens: bool,
    fail_store_for: Vec<String>,
    panic_store_for: Vec<String>,
    fail_replication: bool,
}

/// Storage client whose answers are set up by the test
#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
    next_id: AtomicUsize,
    store_delay: Mutex<Option<Duration>>,
    keep_copies: Mutex<Option<PathBuf>>,
    token_gate: Mutex<Option<Arc<Semaphore>>>,
    tokens_waiting: AtomicUsize,
    storing: AtomicUsize,
    max_storing: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `count` token requests fail before one succeeds
    pub fn fail_tokens(&self, count: usize) {
        let mut script = self.script.lock().unwrap();
        script.token_failures.extend(std::iter::repeat(true).take(count));
    }

    pub fn always_fail_tokens(&self) {
        self.script.lock().unwrap().always_fail_tokens = true;
    }

    /// Reject the upload of every file whose ciphertext name starts with `name`
    pub fn fail_store_for(&self, name: &str) {
        self.script
            .lock()
            .unwrap()
            .fail_store_for
            .push(name.to_string());
    }

    /// Panic inside the upload of files whose ciphertext name starts with `name`
    pub fn panic_store_for(&self, name: &str) {
        self.script
            .lock()
            .unwrap()
            .panic_store_for
            .push(name.to_string());
    }

    pub fn fail_replication(&self) {
        self.script.lock().unwrap().fail_replication = true;
    }

    pub fn store_delay(&self, delay: Duration) {
        *self.store_delay.lock().unwrap() = Some(delay);
    }

    /// Copy every stored ciphertext into `dir`
    pub fn keep_copies(&self, dir: &Path) {
        *self.keep_copies.lock().unwrap() = Some(dir.to_path_buf());
    }

    /// Hold every token request until the returned semaphore gets permits
    pub fn gate_tokens(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.token_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn tokens_waiting(&self) -> usize {
        self.tokens_waiting.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_stores(&self) -> usize {
        self.max_storing.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn token_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Token(_)))
            .count()
    }

    pub fn store_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Store { .. }))
            .count()
    }
}

#[async_trait]
impl StorageClient for ScriptedClient {
    async fn create_write_token(&self, bucket: &str) -> Result<StorageToken, ClientError> {
        self.calls.lock().unwrap().push(Call::Token(bucket.to_string()));

        let gate = self.token_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.tokens_waiting.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await.unwrap();
            permit.forget();
            self.tokens_waiting.fetch_sub(1, Ordering::SeqCst);
        }

        let fail = {
            let mut script = self.script.lock().unwrap();
            script.always_fail_tokens || script.token_failures.pop_front().unwrap_or(false)
        };
        if fail {
            return Err(ClientError::new("create_token", "bridge busy").status(503));
        }
        Ok(StorageToken::new("tok", bucket))
    }

    async fn store_file(
        &self,
        bucket: &str,
        _token: &StorageToken,
        path: &Path,
        shard_concurrency: u32,
    ) -> Result<FileRecord, ClientError> {
        self.calls.lock().unwrap().push(Call::Store {
            bucket: bucket.to_string(),
            path: path.to_path_buf(),
            shard_concurrency,
        });

        let now = self.storing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_storing.fetch_max(now, Ordering::SeqCst);
        let delay = *self.store_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.storing.fetch_sub(1, Ordering::SeqCst);

        let size = std::fs::metadata(path)
            .map_err(|e| ClientError::new("store_file", e.to_string()))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let (rejected, panics) = {
            let script = self.script.lock().unwrap();
            let matches = |prefixes: &[String]| {
                prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            };
            (
                matches(&script.fail_store_for),
                matches(&script.panic_store_for),
            )
        };
        if panics {
            panic!("transport crashed while storing {name}");
        }
        if rejected {
            return Err(ClientError::new("store_file", "shard transfer failed").status(500));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let keep = self.keep_copies.lock().unwrap().clone();
        if let Some(dir) = keep {
            std::fs::copy(path, dir.join(format!("file-{id}"))).unwrap();
        }
        Ok(FileRecord::new(format!("file-{id}"), name, size))
    }

    async fn replicate(
        &self,
        _bucket: &str,
        file_id: &str,
        mirrors: u32,
    ) -> Result<Vec<ShardReplication>, ClientError> {
        self.calls.lock().unwrap().push(Call::Replicate {
            file_id: file_id.to_string(),
            mirrors,
        });

        if self.script.lock().unwrap().fail_replication {
            return Err(ClientError::new("replicate", "no mirrors available"));
        }
        Ok(vec![ShardReplication {
            hash: format!("{file_id}-shard-0"),
            status: "established".to_string(),
            mirrors,
        }])
    }
}

/// Source files plus an empty directory for workspaces
pub struct Fixture {
    pub source: TempDir,
    pub temp_root: TempDir,
    pub files: Vec<PathBuf>,
}

impl Fixture {
    pub fn with_files(names: &[&str]) -> Self {
        let source = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let files = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let path = source.path().join(name);
                std::fs::write(&path, vec![i as u8; 4096 + i * 100]).unwrap();
                path
            })
            .collect();
        Self {
            source,
            temp_root,
            files,
        }
    }

    pub fn glob(&self) -> String {
        format!("{}/*", self.source.path().display())
    }

    pub fn workspaces_left(&self) -> usize {
        std::fs::read_dir(self.temp_root.path()).unwrap().count()
    }
}

/// Poll `cond` until it holds or five seconds pass
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
