//! Upload jobs and the registry that owns them
//!
//! The registry is owned by the session coordinator alone. Pipeline tasks
//! never touch it; they report [`JobUpdate`]s over a channel and the
//! coordinator applies them in arrival order.

use crate::client::{FileRecord, ShardReplication};
use crate::error::UploaderError;
use crate::upload::types::{JobId, JobStage};
use std::path::{Path, PathBuf};

/// Bookkeeping for one discovered file
#[derive(Debug)]
pub struct UploadJob {
    pub id: JobId,
    pub path: PathBuf,
    /// File name used in log lines
    pub name: String,
    pub stage: JobStage,
    /// Failed token attempts before the job got a token or gave up
    pub token_retries: u32,
    pub workspace: Option<PathBuf>,
    pub workspace_releases: usize,
    pub record: Option<FileRecord>,
    pub replicas: Option<Vec<ShardReplication>>,
    pub error: Option<UploaderError>,
}

impl UploadJob {
    pub fn new(id: JobId, path: PathBuf) -> Self {
        let name = display_name(&path);
        Self {
            id,
            path,
            name,
            stage: JobStage::Queued,
            token_retries: 0,
            workspace: None,
            workspace_releases: 0,
            record: None,
            replicas: None,
            error: None,
        }
    }

    /// Workspace allocated and not yet released
    pub fn has_open_workspace(&self) -> bool {
        self.workspace.is_some() && self.workspace_releases == 0
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Progress reported by a pipeline task
#[derive(Debug)]
pub struct JobUpdate {
    pub job: JobId,
    pub kind: JobUpdateKind,
}

#[derive(Debug)]
pub enum JobUpdateKind {
    Stage(JobStage),
    WorkspaceOpened(PathBuf),
    WorkspaceReleased(PathBuf),
    TokenRetry { retry: u32, message: String },
    Stored(FileRecord),
    Replicas(Vec<ShardReplication>),
    ReplicationFailed(String),
}

/// Arena of jobs indexed by [`JobId`]
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<UploadJob>,
}

impl JobRegistry {
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        let jobs = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| UploadJob::new(JobId(index), path))
            .collect();
        Self { jobs }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs.iter().map(|job| job.id)
    }

    pub fn get(&self, id: JobId) -> Option<&UploadJob> {
        self.jobs.get(id.0)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut UploadJob> {
        self.jobs.get_mut(id.0)
    }

    pub fn into_jobs(self) -> Vec<UploadJob> {
        self.jobs
    }

    /// Move a job to `stage`, refusing illegal transitions
    pub fn transition(&mut self, id: JobId, stage: JobStage) -> Result<(), String> {
        let job = self
            .get_mut(id)
            .ok_or_else(|| format!("unknown job {}", id))?;
        if !job.stage.can_advance_to(stage) {
            return Err(format!(
                "job {} cannot move from {} to {}",
                id, job.stage, stage
            ));
        }
        job.stage = stage;
        Ok(())
    }

    /// Mark a job aborted and keep the error that stopped it
    pub fn abort(&mut self, id: JobId, error: UploaderError) -> Result<(), String> {
        self.transition(id, JobStage::Aborted)?;
        if let Some(job) = self.get_mut(id) {
            job.error = Some(error);
        }
        Ok(())
    }

    /// Record a task's update
    pub fn apply(&mut self, update: &JobUpdate) -> Result<(), String> {
        match &update.kind {
            JobUpdateKind::Stage(stage) => self.transition(update.job, *stage),
            other => {
                let job = self
                    .get_mut(update.job)
                    .ok_or_else(|| format!("unknown job {}", update.job))?;
                match other {
                    JobUpdateKind::WorkspaceOpened(path) => job.workspace = Some(path.clone()),
                    JobUpdateKind::WorkspaceReleased(_) => job.workspace_releases += 1,
                    JobUpdateKind::TokenRetry { retry, .. } => job.token_retries = *retry,
                    JobUpdateKind::Stored(record) => job.record = Some(record.clone()),
                    JobUpdateKind::Replicas(replicas) => job.replicas = Some(replicas.clone()),
                    JobUpdateKind::ReplicationFailed(_) | JobUpdateKind::Stage(_) => {}
                }
                Ok(())
            }
        }
    }

    pub fn count(&self, stage: JobStage) -> usize {
        self.jobs.iter().filter(|job| job.stage == stage).count()
    }

    pub fn in_flight(&self) -> usize {
        self.jobs.iter().filter(|job| job.stage.is_in_flight()).count()
    }

    /// Jobs still waiting for admission
    pub fn queued(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|job| job.stage == JobStage::Queued)
            .map(|job| job.id)
            .collect()
    }

    pub fn open_workspaces(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|job| job.has_open_workspace())
            .map(|job| job.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::from_paths(vec![
            PathBuf::from("/data/a.txt"),
            PathBuf::from("/data/b.txt"),
        ])
    }

    fn update(job: usize, kind: JobUpdateKind) -> JobUpdate {
        JobUpdate {
            job: JobId(job),
            kind,
        }
    }

    #[test]
    fn test_jobs_start_queued() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count(JobStage::Queued), 2);
        assert_eq!(registry.get(JobId(1)).unwrap().name, "b.txt");
        assert_eq!(registry.queued(), vec![JobId(0), JobId(1)]);
    }

    #[test]
    fn test_apply_updates() {
        let mut registry = registry();
        registry
            .apply(&update(0, JobUpdateKind::Stage(JobStage::Prepared)))
            .unwrap();
        registry
            .apply(&update(
                0,
                JobUpdateKind::WorkspaceOpened(PathBuf::from("/tmp/ws")),
            ))
            .unwrap();
        assert_eq!(registry.in_flight(), 1);
        assert_eq!(registry.open_workspaces(), vec![JobId(0)]);

        registry
            .apply(&update(
                0,
                JobUpdateKind::TokenRetry {
                    retry: 2,
                    message: "busy".into(),
                },
            ))
            .unwrap();
        registry
            .apply(&update(
                0,
                JobUpdateKind::WorkspaceReleased(PathBuf::from("/tmp/ws")),
            ))
            .unwrap();

        let job = registry.get(JobId(0)).unwrap();
        assert_eq!(job.token_retries, 2);
        assert_eq!(job.workspace_releases, 1);
        assert!(registry.open_workspaces().is_empty());
    }

    #[test]
    fn test_illegal_stage_update_rejected() {
        let mut registry = registry();
        assert!(registry
            .apply(&update(0, JobUpdateKind::Stage(JobStage::Stored)))
            .is_err());
        assert!(registry
            .apply(&update(9, JobUpdateKind::Stage(JobStage::Prepared)))
            .is_err());
    }

    #[test]
    fn test_abort_keeps_error() {
        let mut registry = registry();
        registry
            .abort(JobId(1), UploaderError::aborted_error(JobStage::Queued))
            .unwrap();
        let job = registry.get(JobId(1)).unwrap();
        assert_eq!(job.stage, JobStage::Aborted);
        assert!(job.error.is_some());
        assert!(registry
            .abort(JobId(1), UploaderError::aborted_error(JobStage::Queued))
            .is_err());
    }
}
