//! Scoped temporary workspaces for upload jobs
//!
//! Each job encrypts into its own temporary directory. A [`Workspace`] is
//! released exactly once: explicitly through [`Workspace::release`] on the
//! normal path, or by `Drop` when a job unwinds early.

use crate::error::{Result, UploaderError};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Called once with the workspace directory when it is released
pub type ReleaseHook = Arc<dyn Fn(&Path) + Send + Sync>;

const DIR_PREFIX: &str = "storage-upload-";
const CRYPT_SUFFIX: &str = ".crypt";

/// Temporary directory plus the ciphertext path inside it
pub struct Workspace {
    dir: Option<TempDir>,
    dir_path: PathBuf,
    encrypted_path: PathBuf,
    label: String,
    on_release: Option<ReleaseHook>,
}

impl Workspace {
    /// Allocate a workspace for `file_name` under `root` (system temp dir when `None`)
    pub fn create(root: Option<&Path>, file_name: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);

        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| UploaderError::workspace_error("Unable to create temp directory", e))?;

        let dir_path = dir.path().to_path_buf();
        let encrypted_path = dir_path.join(format!("{}{}", file_name, CRYPT_SUFFIX));

        Ok(Self {
            dir: Some(dir),
            dir_path,
            encrypted_path,
            label: file_name.to_string(),
            on_release: None,
        })
    }

    /// Register a hook fired when the workspace is released
    pub fn on_release(mut self, hook: ReleaseHook) -> Self {
        self.on_release = Some(hook);
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir_path
    }

    /// Where the ciphertext for this job is written
    pub fn encrypted_path(&self) -> &Path {
        &self.encrypted_path
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the directory and everything in it
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        info!("[ {} ] Cleaning up...", self.label);
        let result = dir.close();

        if let Some(hook) = &self.on_release {
            hook(&self.dir_path);
        }

        match result {
            Ok(()) => {
                info!("[ {} ] Finished cleaning!", self.label);
                Ok(())
            }
            Err(e) => Err(UploaderError::workspace_error(
                format!("Unable to remove {}", self.dir_path.display()),
                e,
            )),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        if let Err(e) = self.release_inner() {
            warn!("[ {} ] {}", self.label, e);
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("dir", &self.dir_path)
            .field("encrypted_path", &self.encrypted_path)
            .field("released", &self.is_released())
            .finish()
    }
}
