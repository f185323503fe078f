//! Terminal result of an upload session

use crate::client::{FileRecord, ShardReplication};
use crate::error::{Result, UploaderError};
use crate::upload::job::UploadJob;
use crate::upload::types::{JobId, JobStage};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Final state of one job
#[derive(Debug)]
pub struct JobSummary {
    pub id: JobId,
    pub path: PathBuf,
    pub name: String,
    pub stage: JobStage,
    pub token_retries: u32,
    pub workspace_releases: usize,
    pub record: Option<FileRecord>,
    pub replicas: Option<Vec<ShardReplication>>,
    pub error: Option<UploaderError>,
}

impl From<UploadJob> for JobSummary {
    fn from(job: UploadJob) -> Self {
        Self {
            id: job.id,
            path: job.path,
            name: job.name,
            stage: job.stage,
            token_retries: job.token_retries,
            workspace_releases: job.workspace_releases,
            record: job.record,
            replicas: job.replicas,
            error: job.error,
        }
    }
}

impl JobSummary {
    pub fn is_uploaded(&self) -> bool {
        self.stage == JobStage::Done
    }
}

/// What the session hands back once every job is terminal
#[derive(Debug)]
pub struct SessionReport {
    pub discovered: usize,
    pub uploaded: usize,
    pub aborted: usize,
    /// Highest number of jobs in flight at once
    pub peak_in_flight: usize,
    /// Path of the last job that reached a terminal state
    pub last_processed: Option<PathBuf>,
    /// First condition that stopped the whole session
    pub first_error: Option<UploaderError>,
    pub jobs: Vec<JobSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    /// Every discovered file was uploaded and nothing stopped the session
    pub fn is_success(&self) -> bool {
        self.first_error.is_none() && self.uploaded == self.discovered
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn job(&self, id: JobId) -> Option<&JobSummary> {
        self.jobs.get(id.0)
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobSummary> {
        self.jobs.iter().filter(|job| job.stage == JobStage::Aborted)
    }

    /// Turn a session-level failure into an `Err`
    pub fn into_result(mut self) -> Result<Self> {
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
