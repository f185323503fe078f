//! Upload sessions
//!
//! Configuration, the coordinator that runs a session and the report it
//! hands back.

pub mod config;
pub mod coordinator;
pub mod report;

pub use config::SessionConfig;
pub use coordinator::UploadSession;
pub use report::{JobSummary, SessionReport};
