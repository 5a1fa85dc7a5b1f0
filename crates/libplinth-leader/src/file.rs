//! Shared-file leadership
//!
//! The leader file holds the identity of the current leader. Whoever's
//! identity matches the trimmed file content is the leader.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::detector::Probe;
use crate::error::LeaderError;

/// Probe comparing the leader file against this instance's identity
#[derive(Debug, Clone)]
pub struct FileProbe {
    path: PathBuf,
    identity: String,
}

impl FileProbe {
    pub fn new(path: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            identity: identity.into().trim().to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Probe for FileProbe {
    fn is_leader(&self) -> Result<bool, LeaderError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| LeaderError::Read {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(contents.trim() == self.identity)
    }
}

/// Identity currently recorded in the leader file, `None` if there is no file
pub fn current_leader(path: &Path) -> Result<Option<String>, LeaderError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LeaderError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Record `identity` as the leader
///
/// Written to a hidden temp file beside `path` and renamed over it, so a
/// concurrent probe sees the old identity or the new one, never a torn write.
pub fn claim(path: &Path, identity: &str) -> Result<(), LeaderError> {
    let write_error = |e: std::io::Error| LeaderError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LeaderError::Write {
            path: path.to_path_buf(),
            message: "path has no file name".to_string(),
        })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    let tmp = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp, format!("{}\n", identity.trim())).map_err(write_error)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(write_error(e));
    }

    info!(path = %path.display(), identity = %identity.trim(), "Claimed leadership");
    Ok(())
}
