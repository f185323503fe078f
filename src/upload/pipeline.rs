//! Per-job upload pipeline
//!
//! Each stage consumes the job's state from the previous stage and returns
//! the next one, so a job cannot skip ahead and its workspace travels with
//! it. When a stage fails the state is dropped and the workspace with it,
//! which removes the temporary files.

use crate::client::{FileRecord, ShardReplication, StorageClient, StorageToken};
use crate::crypto::{encrypt_file, CipherFactory, CipherSecret, EncryptedFile};
use crate::error::{Result, UploaderError};
use crate::keystore::KeyStore;
use crate::upload::job::{JobUpdate, JobUpdateKind};
use crate::upload::types::{JobId, JobStage};
use crate::watchdog::AbortSignal;
use crate::workspace::{ReleaseHook, Workspace};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Shared, read-only inputs of every job in a session
pub struct PipelineContext {
    pub bucket: String,
    pub client: Arc<dyn StorageClient>,
    pub cipher: Arc<dyn CipherFactory>,
    pub key_store: Arc<dyn KeyStore>,
    pub token_attempts: u32,
    pub token_backoff: Duration,
    pub redundancy: u32,
    /// Parallel shard transfers the client may use per file
    pub shard_concurrency: u32,
    pub chunk_size: usize,
    pub temp_root: Option<PathBuf>,
}

/// The file a job is about to upload
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub id: JobId,
    pub path: PathBuf,
    pub name: String,
}

/// Result of a job that reached `Stored`
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub record: FileRecord,
    pub token_retries: u32,
    pub replicas: Option<Vec<ShardReplication>>,
}

#[derive(Clone)]
struct Reporter {
    job: JobId,
    tx: UnboundedSender<JobUpdate>,
}

impl Reporter {
    fn send(&self, kind: JobUpdateKind) {
        // The coordinator outlives every task; a closed channel only happens
        // while the session is tearing down.
        let _ = self.tx.send(JobUpdate {
            job: self.job,
            kind,
        });
    }

    fn stage(&self, stage: JobStage) {
        self.send(JobUpdateKind::Stage(stage));
    }
}

struct Prepared {
    ticket: JobTicket,
    workspace: Workspace,
    secret: CipherSecret,
}

struct Encrypted {
    ticket: JobTicket,
    workspace: Workspace,
    secret: CipherSecret,
    file: EncryptedFile,
}

struct Authorized {
    ticket: JobTicket,
    workspace: Workspace,
    secret: CipherSecret,
    file: EncryptedFile,
    token: StorageToken,
    retries: u32,
}

struct Stored {
    ticket: JobTicket,
    record: FileRecord,
    retries: u32,
}

/// Drive one file from workspace allocation to storage and mirroring
pub async fn run_job(
    ctx: Arc<PipelineContext>,
    ticket: JobTicket,
    updates: UnboundedSender<JobUpdate>,
    mut abort: AbortSignal,
) -> Result<StoredFile> {
    let reporter = Reporter {
        job: ticket.id,
        tx: updates,
    };

    let prepared = prepare(&ctx, ticket, &reporter, &abort)?;
    let encrypted = encrypt(&ctx, prepared, &reporter, &abort).await?;
    let authorized = authorize(&ctx, encrypted, &reporter, &mut abort).await?;
    let stored = store(&ctx, authorized, &reporter, &abort).await?;
    ensure_running(&abort, JobStage::Stored)?;

    let replicas = if ctx.redundancy > 0 {
        replicate(&ctx, &stored, &reporter).await
    } else {
        None
    };

    Ok(StoredFile {
        record: stored.record,
        token_retries: stored.retries,
        replicas,
    })
}

fn ensure_running(abort: &AbortSignal, stage: JobStage) -> Result<()> {
    if abort.is_raised() {
        return Err(UploaderError::aborted_error(stage));
    }
    Ok(())
}

fn prepare(
    ctx: &PipelineContext,
    ticket: JobTicket,
    reporter: &Reporter,
    abort: &AbortSignal,
) -> Result<Prepared> {
    ensure_running(abort, JobStage::Queued)?;

    let hook_reporter = reporter.clone();
    let hook: ReleaseHook = Arc::new(move |path| {
        hook_reporter.send(JobUpdateKind::WorkspaceReleased(path.to_path_buf()));
    });

    let workspace = Workspace::create(ctx.temp_root.as_deref(), &ticket.name)
        .map_err(|e| {
            error!("Unable to create temp directory for file {}", ticket.path.display());
            e
        })?
        .on_release(hook);

    reporter.stage(JobStage::Prepared);
    reporter.send(JobUpdateKind::WorkspaceOpened(workspace.path().to_path_buf()));

    Ok(Prepared {
        ticket,
        workspace,
        secret: ctx.cipher.generate_secret(),
    })
}

async fn encrypt(
    ctx: &PipelineContext,
    prepared: Prepared,
    reporter: &Reporter,
    abort: &AbortSignal,
) -> Result<Encrypted> {
    ensure_running(abort, JobStage::Prepared)?;
    let Prepared {
        ticket,
        workspace,
        secret,
    } = prepared;

    info!("Encrypting file \"{}\"", ticket.path.display());

    let file = encrypt_file(
        ctx.cipher.clone(),
        secret.clone(),
        &ticket.path,
        workspace.encrypted_path(),
        ctx.chunk_size,
        abort.clone(),
    )
    .await?;

    info!(
        "[ {} ] Encryption complete ({})",
        ticket.name,
        bytesize::ByteSize::b(file.ciphertext_bytes)
    );
    debug!("[ {} ] Ciphertext sha256 {}", ticket.name, file.sha256);
    reporter.stage(JobStage::Encrypted);

    Ok(Encrypted {
        ticket,
        workspace,
        secret,
        file,
    })
}

async fn authorize(
    ctx: &PipelineContext,
    encrypted: Encrypted,
    reporter: &Reporter,
    abort: &mut AbortSignal,
) -> Result<Authorized> {
    let Encrypted {
        ticket,
        workspace,
        secret,
        file,
    } = encrypted;

    let mut retries = 0u32;
    loop {
        ensure_running(abort, JobStage::Encrypted)?;
        info!(
            "[ {} ] Creating storage token... (retry: {})",
            ticket.name, retries
        );

        match ctx.client.create_write_token(&ctx.bucket).await {
            Ok(token) => {
                reporter.stage(JobStage::Authorized);
                return Ok(Authorized {
                    ticket,
                    workspace,
                    secret,
                    file,
                    token,
                    retries,
                });
            }
            Err(e) => {
                let attempts = retries + 1;
                if attempts >= ctx.token_attempts {
                    error!(
                        "[ {} ] Giving up on storage token after {} attempt(s): {}",
                        ticket.name, attempts, e
                    );
                    return Err(UploaderError::authorization_error(attempts, e));
                }

                retries = attempts;
                warn!("[ {} ] Storage token request failed: {}", ticket.name, e);
                reporter.send(JobUpdateKind::TokenRetry {
                    retry: retries,
                    message: e.to_string(),
                });

                if !ctx.token_backoff.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.token_backoff) => {}
                        _ = abort.raised() => {
                            return Err(UploaderError::aborted_error(JobStage::Encrypted));
                        }
                    }
                }
            }
        }
    }
}

async fn store(
    ctx: &PipelineContext,
    authorized: Authorized,
    reporter: &Reporter,
    abort: &AbortSignal,
) -> Result<Stored> {
    ensure_running(abort, JobStage::Authorized)?;
    let Authorized {
        ticket,
        workspace,
        secret,
        file,
        token,
        retries,
    } = authorized;

    info!("[ {} ] Storing file, hang tight!", ticket.name);

    let record = match ctx
        .client
        .store_file(&ctx.bucket, &token, &file.path, ctx.shard_concurrency)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            warn!("[ {} ] Error occurred. Triggering cleanup...", ticket.name);
            return Err(UploaderError::storage_error(&ticket.name, e));
        }
    };

    ctx.key_store.set(&record.id, &secret)?;
    info!("[ {} ] Encryption key saved to keyring.", ticket.name);

    reporter.send(JobUpdateKind::Stored(record.clone()));
    reporter.stage(JobStage::Stored);

    // Free the disk before any mirroring round trip.
    if let Err(e) = workspace.release() {
        warn!("[ {} ] {}", ticket.name, e);
    }

    info!("[ {} ] File successfully stored in bucket.", ticket.name);
    info!(
        "Name: {}, Type: {}, Size: {} bytes, ID: {}",
        record.name, record.mimetype, record.size, record.id
    );

    Ok(Stored {
        ticket,
        record,
        retries,
    })
}

async fn replicate(
    ctx: &PipelineContext,
    stored: &Stored,
    reporter: &Reporter,
) -> Option<Vec<ShardReplication>> {
    info!(
        "Establishing {} mirrors per shard for redundancy",
        ctx.redundancy
    );

    match ctx
        .client
        .replicate(&ctx.bucket, &stored.record.id, ctx.redundancy)
        .await
    {
        Ok(replicas) => {
            for shard in &replicas {
                info!(
                    "Shard {} {} mirroring by {} nodes",
                    shard.hash, shard.status, shard.mirrors
                );
            }
            reporter.send(JobUpdateKind::Replicas(replicas.clone()));
            reporter.stage(JobStage::Replicated);
            Some(replicas)
        }
        Err(e) => {
            let err = UploaderError::replication_error(&stored.record.id, e);
            warn!("[ {} ] {}", stored.ticket.name, err);
            reporter.send(JobUpdateKind::ReplicationFailed(err.to_string()));
            None
        }
    }
}
