use crate::client::{FileRecord, ShardReplication};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Index of a job in the session's registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline state of an upload job
///
/// Jobs move forward through `Queued -> Prepared -> Encrypted -> Authorized
/// -> Stored -> [Replicated] -> Done`; `Aborted` is reachable from every
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    /// Discovered, waiting for an admission slot
    Queued,
    Prepared,
    Encrypted,
    Authorized,
    Stored,
    Replicated,
    Done,
    Aborted,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Done | JobStage::Aborted)
    }

    /// Admitted and not yet terminal
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal() && self != JobStage::Queued
    }

    fn rank(self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::Prepared => 1,
            JobStage::Encrypted => 2,
            JobStage::Authorized => 3,
            JobStage::Stored => 4,
            JobStage::Replicated => 5,
            JobStage::Done => 6,
            JobStage::Aborted => 7,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_advance_to(self, next: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStage::Aborted => true,
            JobStage::Done => matches!(self, JobStage::Stored | JobStage::Replicated),
            JobStage::Replicated => self == JobStage::Stored,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStage::Queued => "queued",
            JobStage::Prepared => "prepared",
            JobStage::Encrypted => "encrypted",
            JobStage::Authorized => "authorized",
            JobStage::Stored => "stored",
            JobStage::Replicated => "replicated",
            JobStage::Done => "done",
            JobStage::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Informational event emitted while a session runs
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    /// File discovery finished
    Discovered { count: usize },
    /// Non-fatal configuration warning
    Caution { message: String },
    /// A job entered a new stage
    StageChanged {
        job: JobId,
        name: String,
        stage: JobStage,
    },
    /// A token attempt failed and will be retried
    TokenRetry {
        job: JobId,
        name: String,
        retry: u32,
        message: String,
    },
    /// The network accepted a file
    Stored {
        job: JobId,
        name: String,
        record: FileRecord,
    },
    /// Mirror status reported for one shard
    ShardMirrored {
        job: JobId,
        shard: ShardReplication,
    },
    /// Mirror request failed; the job still counts as uploaded
    ReplicationFailed {
        job: JobId,
        message: String,
    },
    /// A job's workspace was removed
    WorkspaceReleased { job: JobId, path: PathBuf },
    /// A job ended without being stored
    JobAborted {
        job: JobId,
        name: String,
        message: String,
    },
    /// Completion count changed
    Progress { uploaded: usize, total: usize },
    /// The resource watchdog fired
    SessionAborted { message: String },
}

/// Receives session events; must not block
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;
