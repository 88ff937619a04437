// ── Transfer engine ───────────────────────────────────────────────────────────
//
// Whole-file download and upload over one session per call. Downloads are
// streamed into a staging file, digested after the session is gone, and only
// then moved into the final directory.

use crate::sftp::digest::{digest_file, DigestAlgorithm, DEFAULT_DIGEST_CHUNK};
use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::session::{Connector, MkdirOutcome, RemoteFile, RemoteFs};
use crate::sftp::storage::{file_name_from_remote, LocalStore};
use crate::sftp::types::{
    CancelFlag, DownloadRequest, SessionCredentials, UploadRequest, DEFAULT_CHUNK_SIZE,
};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consecutive zero-byte writes tolerated before an upload gives up.
pub const MAX_ZERO_WRITES: u32 = 3;

/// Result of a finished transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub bytes_transferred: u64,
    /// Final local path of a promoted download.
    pub local_path: Option<PathBuf>,
    /// Verified digest of a download.
    pub digest: Option<String>,
    /// Full remote path of an upload.
    pub remote_path: String,
}

// ── Remote directories ───────────────────────────────────────────────

/// Normalized remote directory: trailing and repeated slashes dropped,
/// absoluteness remembered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDir {
    absolute: bool,
    components: Vec<String>,
}

impl RemoteDir {
    pub fn parse(path: &str) -> Self {
        Self {
            absolute: path.starts_with('/'),
            components: path
                .split('/')
                .filter(|c| !c.is_empty() && *c != ".")
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    fn render(&self, parts: &[String]) -> String {
        let joined = parts.join("/");
        if self.absolute {
            format!("/{}", joined)
        } else {
            joined
        }
    }

    /// Every ancestor including the directory itself, shortest first.
    /// The root is never included.
    pub fn prefixes(&self) -> Vec<String> {
        (1..=self.components.len())
            .map(|n| self.render(&self.components[..n]))
            .collect()
    }

    pub fn path(&self) -> String {
        self.render(&self.components)
    }

    pub fn join(&self, name: &str) -> String {
        let mut parts = self.components.clone();
        parts.push(name.to_string());
        self.render(&parts)
    }
}

// ── Engine ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TransferEngine {
    connector: Arc<dyn Connector>,
    store: LocalStore,
    chunk_size: usize,
    digest_algorithm: DigestAlgorithm,
}

impl TransferEngine {
    pub fn new(connector: Arc<dyn Connector>, store: LocalStore) -> Self {
        Self {
            connector,
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            digest_algorithm: DigestAlgorithm::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    // ── Download ─────────────────────────────────────────────────────

    /// Download `request.remote_path`, verify it against
    /// `request.expected_digest` and move it into the final directory.
    ///
    /// The session is torn down before this returns, on every path.
    pub fn download(
        &self,
        credentials: &SessionCredentials,
        request: &DownloadRequest,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<TransferOutcome> {
        let file_name = file_name_from_remote(&request.remote_path)?;
        info!(host = %credentials.hostname, remote = %request.remote_path, "download started");

        let mut fs = self.connector.connect(credentials)?;
        let received = self.receive(
            fs.as_mut(),
            &request.remote_path,
            &file_name,
            cancel,
            on_progress,
        );
        fs.teardown();
        drop(fs);
        let (staging, bytes) = received?;

        let actual = match digest_file(&staging, self.digest_algorithm, DEFAULT_DIGEST_CHUNK, None)
        {
            Ok(d) => d,
            Err(e) => {
                self.store.discard_staging(&staging);
                return Err(e);
            }
        };
        if actual != request.expected_digest {
            warn!(
                remote = %request.remote_path,
                staging = %staging.display(),
                expected = %request.expected_digest,
                actual = %actual,
                "digest mismatch, download not promoted"
            );
            return Err(SftpError::checksum_mismatch(
                self.digest_algorithm,
                &request.expected_digest,
                &actual,
            ));
        }

        let target = self.store.promote(&staging, &file_name)?;
        info!(
            remote = %request.remote_path,
            local = %target.display(),
            bytes,
            "download verified and promoted"
        );
        Ok(TransferOutcome {
            bytes_transferred: bytes,
            local_path: Some(target),
            digest: Some(actual),
            remote_path: request.remote_path.clone(),
        })
    }

    /// Stream the remote file into staging. The staging file is removed on
    /// any failure, cancellation included.
    fn receive(
        &self,
        fs: &mut dyn RemoteFs,
        remote_path: &str,
        file_name: &str,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<(PathBuf, u64)> {
        let total = fs.file_size(remote_path)?;
        let mut remote = fs.open_read(remote_path)?;
        let (staging, mut local) = match self.store.create_staging(file_name) {
            Ok(v) => v,
            Err(e) => {
                let _ = remote.close();
                return Err(e);
            }
        };

        let pumped = self.pump_download(remote.as_mut(), &mut local, total, cancel, on_progress);
        if let Err(e) = remote.close() {
            debug!(remote = remote_path, error = %e, "closing remote file failed");
        }
        drop(local);

        match pumped {
            Ok(bytes) => Ok((staging, bytes)),
            Err(e) => {
                if e.is_cancelled() {
                    info!(remote = remote_path, "download cancelled");
                }
                self.store.discard_staging(&staging);
                Err(e)
            }
        }
    }

    fn pump_download(
        &self,
        remote: &mut dyn RemoteFile,
        local: &mut File,
        total: u64,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut done: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SftpError::cancelled());
            }
            let n = remote.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            local
                .write_all(&buf[..n])
                .map_err(|e| SftpError::local_io(format!("Staging write failed: {}", e)))?;
            done += n as u64;
            on_progress(done, total);
        }
        local
            .flush()
            .map_err(|e| SftpError::local_io(format!("Staging flush failed: {}", e)))?;
        Ok(done)
    }

    // ── Upload ───────────────────────────────────────────────────────

    /// Upload `request.data` to `remote_directory/remote_filename`, creating
    /// missing directories along the way.
    pub fn upload(
        &self,
        credentials: &SessionCredentials,
        request: &UploadRequest,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<TransferOutcome> {
        let name = request.remote_filename.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(SftpError::invalid_path(format!(
                "'{}' is not a valid remote file name",
                name
            )));
        }
        let dir = RemoteDir::parse(&request.remote_directory);
        let target = dir.join(name);
        info!(
            host = %credentials.hostname,
            remote = %target,
            bytes = request.data.len(),
            "upload started"
        );

        let mut fs = self.connector.connect(credentials)?;
        let sent = self.send(fs.as_mut(), &dir, &target, &request.data, cancel, on_progress);
        fs.teardown();
        drop(fs);

        let bytes = sent?;
        info!(remote = %target, bytes, "upload finished");
        Ok(TransferOutcome {
            bytes_transferred: bytes,
            local_path: None,
            digest: None,
            remote_path: target,
        })
    }

    fn send(
        &self,
        fs: &mut dyn RemoteFs,
        dir: &RemoteDir,
        target: &str,
        data: &[u8],
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<u64> {
        for prefix in dir.prefixes() {
            match fs.mkdir(&prefix)? {
                MkdirOutcome::Created => debug!(dir = %prefix, "remote directory created"),
                MkdirOutcome::AlreadyExists => debug!(dir = %prefix, "remote directory exists"),
            }
        }

        let mut remote = fs.open_write(target)?;
        let pumped = self.pump_upload(remote.as_mut(), data, cancel, on_progress);
        let closed = remote.close();
        let bytes = pumped?;
        closed.map_err(|e| SftpError::write(format!("Closing {} failed: {}", target, e.message)))?;
        Ok(bytes)
    }

    fn pump_upload(
        &self,
        remote: &mut dyn RemoteFile,
        data: &[u8],
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<u64> {
        let total = data.len() as u64;
        let mut sent = 0usize;
        let mut stalls = 0u32;
        while sent < data.len() {
            if cancel.is_cancelled() {
                return Err(SftpError::cancelled());
            }
            let end = (sent + self.chunk_size).min(data.len());
            let accepted = remote.write_chunk(&data[sent..end])?;
            if accepted == 0 {
                stalls += 1;
                if stalls > MAX_ZERO_WRITES {
                    return Err(SftpError::write_stalled(format!(
                        "Server accepted no data {} times in a row at offset {}",
                        stalls, sent
                    )));
                }
                debug!(offset = sent, stalls, "zero-byte write, retrying");
                continue;
            }
            stalls = 0;
            sent += accepted.min(end - sent);
            on_progress(sent as u64, total);
        }
        Ok(total)
    }
}
