//! Upload jobs
//!
//! This module holds the per-file pipeline, the registry that tracks every
//! job of a session and the admission control that bounds how many run at
//! once.

pub mod admission;
pub mod job;
pub mod pipeline;
pub mod types;

pub use admission::AdmissionController;
pub use job::{JobRegistry, JobUpdate, JobUpdateKind, UploadJob};
pub use pipeline::{run_job, JobTicket, PipelineContext, StoredFile};
pub use types::{EventCallback, JobId, JobStage, SessionEvent, SessionEventKind};
