//! Session coordinator
//!
//! Validates the configuration, discovers the files, admits jobs up to the
//! file concurrency, applies their updates to the job registry and turns a
//! watchdog event into a session-wide abort.

use crate::client::StorageClient;
use crate::crypto::{ChaChaFrameCipher, CipherFactory};
use crate::discovery::discover_files;
use crate::error::{Result, UploaderError};
use crate::keystore::KeyStore;
use crate::session::config::SessionConfig;
use crate::session::report::{JobSummary, SessionReport};
use crate::upload::admission::AdmissionController;
use crate::upload::job::{JobRegistry, JobUpdate, JobUpdateKind};
use crate::upload::pipeline::{run_job, JobTicket, PipelineContext, StoredFile};
use crate::upload::types::{EventCallback, JobId, JobStage, SessionEvent, SessionEventKind};
use crate::watchdog::{
    AbortHandle, LowResourceEvent, PollingSignal, ResourceSignal, WatchdogSettings,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};

/// One invocation of the multi-file uploader
pub struct UploadSession {
    config: SessionConfig,
    client: Arc<dyn StorageClient>,
    key_store: Arc<dyn KeyStore>,
    cipher: Arc<dyn CipherFactory>,
    signal: Box<dyn ResourceSignal>,
    on_event: Option<EventCallback>,
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("config", &self.config)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Mutable state of a running session, owned by the coordinator loop
struct RunState {
    registry: JobRegistry,
    queue: VecDeque<JobId>,
    admission: AdmissionController,
    tasks: JoinSet<Result<StoredFile>>,
    task_jobs: HashMap<task::Id, JobId>,
    uploaded: usize,
    last_processed: Option<PathBuf>,
    first_error: Option<UploaderError>,
    aborted: bool,
}

impl UploadSession {
    /// Create a session with the default cipher and free memory watchdog
    pub fn new(
        config: SessionConfig,
        client: Arc<dyn StorageClient>,
        key_store: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            config,
            client,
            key_store,
            cipher: Arc::new(ChaChaFrameCipher::new()),
            signal: Box::new(PollingSignal::free_memory()),
            on_event: None,
        }
    }

    /// Use a different cipher stream factory
    pub fn cipher(mut self, cipher: Arc<dyn CipherFactory>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Use a different low-resource signal
    pub fn resource_signal<S>(mut self, signal: S) -> Self
    where
        S: ResourceSignal + 'static,
    {
        self.signal = Box::new(signal);
        self
    }

    /// Receive structured progress events
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn emit(&self, kind: SessionEventKind) {
        if let Some(callback) = &self.on_event {
            callback(SessionEvent::new(kind));
        }
    }

    /// Run the session to completion
    ///
    /// Configuration and discovery failures return `Err` before any job is
    /// created. Once jobs exist the session always returns a report; a
    /// watchdog abort is carried in [`SessionReport::first_error`].
    pub async fn run(mut self) -> Result<SessionReport> {
        let started_at = Utc::now();

        self.config.validate()?;
        for caution in self.config.cautions() {
            warn!("{}", caution);
            self.emit(SessionEventKind::Caution { message: caution });
        }

        let paths = discover_files(&self.config.selectors)?;
        info!("{} file(s) to upload.", paths.len());
        self.emit(SessionEventKind::Discovered { count: paths.len() });

        let mut low_resource = Some(self.signal.start(WatchdogSettings {
            poll_interval: self.config.memory_poll_interval(),
            low_threshold_bytes: self.config.low_memory_threshold_bytes,
        })?);

        let registry = JobRegistry::from_paths(paths);
        let mut state = RunState {
            queue: registry.ids().collect(),
            admission: AdmissionController::new(self.config.file_concurrency as usize),
            registry,
            tasks: JoinSet::new(),
            task_jobs: HashMap::new(),
            uploaded: 0,
            last_processed: None,
            first_error: None,
            aborted: false,
        };

        let ctx = Arc::new(PipelineContext {
            bucket: self.config.bucket.clone(),
            client: self.client.clone(),
            cipher: self.cipher.clone(),
            key_store: self.key_store.clone(),
            token_attempts: self.config.token_attempts,
            token_backoff: self.config.token_backoff(),
            redundancy: self.config.redundancy,
            shard_concurrency: self.config.shard_concurrency,
            chunk_size: self.config.chunk_size,
            temp_root: self.config.temp_root.clone(),
        });
        let abort = AbortHandle::new();
        let (tx, mut updates) = mpsc::unbounded_channel();

        self.admit(&mut state, &ctx, &tx, &abort);

        loop {
            if state.tasks.is_empty() && (state.queue.is_empty() || state.aborted) {
                break;
            }

            tokio::select! {
                biased;

                Some(update) = updates.recv() => self.apply_update(&mut state, update),

                event = next_low_resource(&mut low_resource), if !state.aborted => {
                    match event {
                        Some(event) => self.abort_session(&mut state, &abort, event),
                        None => low_resource = None,
                    }
                }

                Some(joined) = state.tasks.join_next_with_id() => {
                    state.admission.release();
                    let (task, outcome) = match joined {
                        Ok((task, outcome)) => (task, outcome),
                        Err(e) => (e.id(), Err(join_failure(e))),
                    };
                    match state.task_jobs.remove(&task) {
                        Some(id) => self.finish_job(&mut state, id, outcome),
                        None => error!("Upload task {} finished without a job", task),
                    }
                    if !state.aborted {
                        self.admit(&mut state, &ctx, &tx, &abort);
                    }
                }

                else => break,
            }
        }

        drop(tx);
        while let Ok(update) = updates.try_recv() {
            self.apply_update(&mut state, update);
        }

        self.signal.stop();

        let open = state.registry.open_workspaces();
        if !open.is_empty() {
            error!("{} workspace(s) still open after the session ended", open.len());
        }

        let aborted = state.registry.count(JobStage::Aborted);
        let discovered = state.registry.len();
        debug!(
            "{} of {} job(s) admitted, at most {} at once",
            state.admission.admitted(),
            discovered,
            state.admission.peak()
        );
        if !state.registry.is_empty() && state.uploaded == discovered {
            info!("Done.");
        }

        Ok(SessionReport {
            discovered,
            uploaded: state.uploaded,
            aborted,
            peak_in_flight: state.admission.peak(),
            last_processed: state.last_processed,
            first_error: state.first_error,
            jobs: state
                .registry
                .into_jobs()
                .into_iter()
                .map(JobSummary::from)
                .collect(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn admit(
        &self,
        state: &mut RunState,
        ctx: &Arc<PipelineContext>,
        tx: &mpsc::UnboundedSender<JobUpdate>,
        abort: &AbortHandle,
    ) {
        while state.admission.has_capacity() {
            let Some(id) = state.queue.pop_front() else {
                return;
            };
            let Some(job) = state.registry.get(id) else {
                continue;
            };
            if !state.admission.try_admit() {
                state.queue.push_front(id);
                return;
            }

            let ticket = JobTicket {
                id,
                path: job.path.clone(),
                name: job.name.clone(),
            };
            let ctx = ctx.clone();
            let tx = tx.clone();
            let signal = abort.subscribe();

            let handle = state.tasks.spawn(run_job(ctx, ticket, tx, signal));
            state.task_jobs.insert(handle.id(), id);
        }
    }

    fn apply_update(&self, state: &mut RunState, update: JobUpdate) {
        if let Err(e) = state.registry.apply(&update) {
            warn!("Ignoring job update: {}", e);
            return;
        }
        debug_assert!(state.registry.in_flight() <= state.admission.limit());

        let job = update.job;
        let name = state
            .registry
            .get(job)
            .map(|j| j.name.clone())
            .unwrap_or_default();

        match update.kind {
            JobUpdateKind::Stage(stage) => {
                self.emit(SessionEventKind::StageChanged { job, name, stage })
            }
            JobUpdateKind::TokenRetry { retry, message } => {
                self.emit(SessionEventKind::TokenRetry {
                    job,
                    name,
                    retry,
                    message,
                })
            }
            JobUpdateKind::Stored(record) => {
                self.emit(SessionEventKind::Stored { job, name, record })
            }
            JobUpdateKind::Replicas(replicas) => {
                for shard in replicas {
                    self.emit(SessionEventKind::ShardMirrored { job, shard });
                }
            }
            JobUpdateKind::ReplicationFailed(message) => {
                self.emit(SessionEventKind::ReplicationFailed { job, message })
            }
            JobUpdateKind::WorkspaceReleased(path) => {
                self.emit(SessionEventKind::WorkspaceReleased { job, path })
            }
            JobUpdateKind::WorkspaceOpened(_) => {}
        }
    }

    fn finish_job(&self, state: &mut RunState, id: JobId, outcome: Result<StoredFile>) {
        let total = state.registry.len();
        let Some(job) = state.registry.get_mut(id) else {
            return;
        };
        state.last_processed = Some(job.path.clone());
        let name = job.name.clone();

        match outcome {
            Ok(stored) => {
                job.token_retries = stored.token_retries;
                if let Err(e) = state.registry.transition(id, JobStage::Done) {
                    warn!("{}", e);
                    return;
                }
                state.uploaded += 1;
                info!("{} of {} files uploaded", state.uploaded, total);
                self.emit(SessionEventKind::Progress {
                    uploaded: state.uploaded,
                    total,
                });
            }
            Err(e) => {
                error!("[ {} ] {}", name, e);
                let message = e.to_string();
                if let Err(e) = state.registry.abort(id, e) {
                    warn!("{}", e);
                    return;
                }
                self.emit(SessionEventKind::JobAborted {
                    job: id,
                    name,
                    message,
                });
            }
        }
    }

    fn abort_session(&self, state: &mut RunState, abort: &AbortHandle, event: LowResourceEvent) {
        let err =
            UploaderError::resource_exhausted_error(event.available_bytes, event.threshold_bytes);
        error!("{}", err);

        state.aborted = true;
        abort.raise();
        self.emit(SessionEventKind::SessionAborted {
            message: err.to_string(),
        });

        // Admitted jobs may still read Queued until their first update lands.
        let admitted: Vec<JobId> = state.task_jobs.values().copied().collect();
        state.queue.clear();
        for id in state.registry.queued() {
            if admitted.contains(&id) {
                continue;
            }
            let err = UploaderError::aborted_error(JobStage::Queued);
            if let Err(e) = state.registry.abort(id, err) {
                warn!("{}", e);
            }
        }

        if state.first_error.is_none() {
            state.first_error = Some(err);
        }
    }
}

fn join_failure(e: JoinError) -> UploaderError {
    if e.is_panic() {
        UploaderError::panic_error(e.into_panic())
    } else {
        UploaderError::Join(e)
    }
}

async fn next_low_resource(
    rx: &mut Option<mpsc::Receiver<LowResourceEvent>>,
) -> Option<LowResourceEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}
