// ── Types ─────────────────────────────────────────────────────────────────────

use crate::sftp::digest::DigestAlgorithm;
use crate::sftp::error::{SftpError, SftpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bytes moved per read/write call in the transfer loops.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Environment variable that overrides the configured password.
pub const PASSWORD_ENV: &str = "SKIFF_PASSWORD";

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_sftp_port() -> u16 {
    skiff_core::DEFAULT_SSH_PORT
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

// ── Credentials ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl SessionCredentials {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KnownHostsPolicy {
    /// Trust unknown hosts on first use and record them; reject mismatches.
    #[default]
    AcceptNew,
    /// Reject unknown and mismatched host keys.
    Strict,
    /// Trust whatever the handshake presents.
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpClientConfig {
    #[serde(default)]
    pub credentials: Option<SessionCredentials>,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    /// Per-address TCP connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
    #[serde(default)]
    pub host_key_policy: KnownHostsPolicy,
    #[serde(default)]
    pub known_hosts_path: Option<String>,
    #[serde(default)]
    pub staging_dir: Option<String>,
    #[serde(default)]
    pub final_dir: Option<String>,
}

impl Default for SftpClientConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            port: default_sftp_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            chunk_size: default_chunk_size(),
            digest_algorithm: DigestAlgorithm::default(),
            host_key_policy: KnownHostsPolicy::default(),
            known_hosts_path: None,
            staging_dir: None,
            final_dir: None,
        }
    }
}

impl SftpClientConfig {
    /// Load a JSON config file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> SftpResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SftpError::invalid_config(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let mut config: SftpClientConfig = serde_json::from_str(&raw).map_err(|e| {
            SftpError::invalid_config(format!("Invalid config '{}': {}", path.display(), e))
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if let Some(creds) = self.credentials.as_mut() {
                creds.password = password;
            }
        }
    }

    pub fn validate(&self) -> SftpResult<()> {
        if self.chunk_size == 0 {
            return Err(SftpError::invalid_config("chunkSize must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SftpError::invalid_config(
                "connectTimeoutMs must be greater than zero",
            ));
        }
        if self.port == 0 {
            return Err(SftpError::invalid_config("port must be non-zero"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn credentials(&self) -> SftpResult<SessionCredentials> {
        self.credentials
            .clone()
            .ok_or_else(|| SftpError::invalid_config("no credentials configured"))
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Shared cancel request, polled once per chunk by the transfer loops.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Transfer requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub remote_path: String,
    /// Lowercase hex digest the received file must match.
    pub expected_digest: String,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: Vec<u8>,
    pub remote_directory: String,
    pub remote_filename: String,
}

impl UploadRequest {
    /// Read a local file fully into an upload request.
    pub fn from_file(
        local_path: impl AsRef<Path>,
        remote_directory: impl Into<String>,
        remote_filename: Option<String>,
    ) -> SftpResult<Self> {
        let local_path = local_path.as_ref();
        let data = std::fs::read(local_path).map_err(|e| {
            SftpError::local_io(format!("Cannot read '{}': {}", local_path.display(), e))
        })?;
        let remote_filename = match remote_filename {
            Some(name) => name,
            None => local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    SftpError::invalid_path(format!(
                        "'{}' has no file name",
                        local_path.display()
                    ))
                })?,
        };
        Ok(Self {
            data,
            remote_directory: remote_directory.into(),
            remote_filename,
        })
    }
}

// ── Transfer tracking ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub direction: TransferDirection,
    pub remote_path: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub percent: f64,
    pub status: TransferStatus,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub transfer_id: String,
    pub direction: TransferDirection,
    pub remote_path: String,
    pub local_path: Option<String>,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub digest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_empty_json() {
        let config: SftpClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert_eq!(config.chunk_size, 32 * 1024);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Md5);
        assert_eq!(config.host_key_policy, KnownHostsPolicy::AcceptNew);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_parses_camel_case_fields() {
        let json = r#"{
            "credentials": {"hostname": "files.example", "username": "ops", "password": "pw"},
            "connectTimeoutMs": 250,
            "digestAlgorithm": "sha256",
            "hostKeyPolicy": "strict",
            "stagingDir": "/tmp/stage"
        }"#;
        let config: SftpClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.host_key_policy, KnownHostsPolicy::Strict);
        assert_eq!(config.staging_dir.as_deref(), Some("/tmp/stage"));
        assert_eq!(config.credentials().unwrap().username, "ops");
    }

    #[test]
    fn config_rejects_zero_chunk() {
        let config = SftpClientConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().kind,
            crate::sftp::SftpErrorKind::InvalidConfig
        );
    }

    #[test]
    fn config_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiff.json");
        std::fs::write(&path, r#"{"port": 2222}"#).unwrap();
        let config = SftpClientConfig::load(&path).unwrap();
        assert_eq!(config.port, 2222);
        assert!(SftpClientConfig::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = SessionCredentials::new("h", "u", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn upload_request_from_file_uses_local_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, [7u8; 12]).unwrap();
        let req = UploadRequest::from_file(&path, "/in", None).unwrap();
        assert_eq!(req.remote_filename, "payload.bin");
        assert_eq!(req.data.len(), 12);
    }

    #[test]
    fn transfer_status_serialization() {
        let json = serde_json::to_string(&TransferStatus::InProgress).unwrap();
        assert_eq!(json, "\"inProgress\"");
    }
}
