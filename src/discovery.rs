//! File discovery
//!
//! Expands the session's selectors (plain paths or glob patterns) into an
//! order-stable list of absolute, readable file paths. Discovery runs once,
//! before any job exists, and reports failures as a [`DiscoveryError`] value.

use crate::error::DiscoveryError;
use log::debug;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

const GLOB_CHARS: &[char] = &['*', '?', '['];

/// Expand `selectors` into the files to upload
///
/// Selectors are processed in order; glob matches come back sorted.
/// Directories are skipped and duplicate paths keep their first position.
pub fn discover_files<S: AsRef<str>>(selectors: &[S]) -> Result<Vec<PathBuf>, DiscoveryError> {
    if selectors.is_empty() {
        return Err(DiscoveryError::EmptySelector);
    }

    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for selector in selectors {
        let selector = selector.as_ref();
        for candidate in expand_selector(selector)? {
            let Some(path) = readable_file(&candidate)? else {
                debug!("Skipping directory {}", candidate.display());
                continue;
            };
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    if files.is_empty() {
        return Err(DiscoveryError::NoFiles);
    }
    Ok(files)
}

fn is_pattern(selector: &str) -> bool {
    selector.contains(GLOB_CHARS)
}

fn expand_selector(selector: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    if selector.is_empty() {
        return Err(DiscoveryError::EmptySelector);
    }

    if !is_pattern(selector) {
        let path = PathBuf::from(selector);
        // A dangling link still exists as an entry and fails later as unreadable.
        if std::fs::symlink_metadata(&path).is_err() {
            return Err(DiscoveryError::NotFound {
                selector: selector.to_string(),
            });
        }
        return Ok(vec![path]);
    }

    let entries = glob::glob(selector).map_err(|e| DiscoveryError::InvalidPattern {
        pattern: selector.to_string(),
        message: e.to_string(),
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => matches.push(path),
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(DiscoveryError::Unreadable {
                    path,
                    source: e.into(),
                });
            }
        }
    }

    if matches.is_empty() {
        return Err(DiscoveryError::NotFound {
            selector: selector.to_string(),
        });
    }
    Ok(matches)
}

/// Canonical path of a readable regular file, `None` for directories
fn readable_file(path: &Path) -> Result<Option<PathBuf>, DiscoveryError> {
    let unreadable = |source| DiscoveryError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(path).map_err(unreadable)?;
    if metadata.is_dir() {
        return Ok(None);
    }

    File::open(path).map_err(unreadable)?;
    let absolute = std::fs::canonicalize(path).map_err(unreadable)?;
    Ok(Some(absolute))
}
