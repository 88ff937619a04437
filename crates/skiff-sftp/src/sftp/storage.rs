//! Local staging and final storage for downloads.
//!
//! Downloads land in the staging directory and are only renamed into the
//! final directory after their digest matched.

use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::types::SftpClientConfig;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_DIR: &str = "skiff";
const STAGING_SUBDIR: &str = "staging";

#[derive(Debug, Clone)]
pub struct LocalStore {
    staging_dir: PathBuf,
    final_dir: PathBuf,
}

impl LocalStore {
    pub fn new(staging_dir: impl Into<PathBuf>, final_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            final_dir: final_dir.into(),
        }
    }

    /// Configured directories, falling back to the platform cache and
    /// document directories.
    pub fn from_config(config: &SftpClientConfig) -> Self {
        let staging_dir = config
            .staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_staging_dir);
        let final_dir = config
            .final_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_final_dir);
        Self::new(staging_dir, final_dir)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.staging_dir.join(file_name)
    }

    pub fn final_path(&self, file_name: &str) -> PathBuf {
        self.final_dir.join(file_name)
    }

    /// Create (or truncate) the staging file for `file_name`.
    pub fn create_staging(&self, file_name: &str) -> SftpResult<(PathBuf, File)> {
        fs::create_dir_all(&self.staging_dir).map_err(|e| {
            SftpError::local_io(format!(
                "Cannot create staging dir '{}': {}",
                self.staging_dir.display(),
                e
            ))
        })?;
        let path = self.staging_path(file_name);
        let file = File::create(&path).map_err(|e| {
            SftpError::local_io(format!("Cannot create '{}': {}", path.display(), e))
        })?;
        Ok((path, file))
    }

    /// Remove a staging file. A file that is already gone is not an error.
    pub fn discard_staging(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "staging file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove staging file"),
        }
    }

    /// Move a verified staging file over its final location.
    pub fn promote(&self, staging: &Path, file_name: &str) -> SftpResult<PathBuf> {
        fs::create_dir_all(&self.final_dir).map_err(|e| {
            SftpError::promote(format!(
                "Cannot create final dir '{}': {}",
                self.final_dir.display(),
                e
            ))
        })?;
        let target = self.final_path(file_name);

        clear_target(&target)?;
        fs::rename(staging, &target).map_err(|e| {
            SftpError::promote(format!(
                "Cannot move '{}' to '{}': {}",
                staging.display(),
                target.display(),
                e
            ))
        })?;
        Ok(target)
    }
}

// rename does not replace an existing file on Windows
#[cfg(windows)]
fn clear_target(target: &Path) -> SftpResult<()> {
    if target.exists() {
        fs::remove_file(target).map_err(|e| {
            SftpError::promote(format!("Cannot replace '{}': {}", target.display(), e))
        })?;
    }
    Ok(())
}

#[cfg(not(windows))]
fn clear_target(_target: &Path) -> SftpResult<()> {
    Ok(())
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(STAGING_SUBDIR)
}

fn default_final_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Last component of a remote path, used as the local file name.
pub fn file_name_from_remote(remote_path: &str) -> SftpResult<String> {
    let name = remote_path
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Err(SftpError::invalid_path(format!(
            "'{}' does not name a file",
            remote_path
        )));
    }
    Ok(name.to_string())
}
