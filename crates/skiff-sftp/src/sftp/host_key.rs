//! Host-key verification run right after the SSH handshake.

use crate::sftp::error::{SftpError, SftpErrorKind, SftpResult};
use crate::sftp::types::{KnownHostsPolicy, SftpClientConfig};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use skiff_core::DEFAULT_SSH_PORT;
use ssh2::{CheckResult, HashType, HostKeyType, KnownHostFileKind, KnownHosts, Session};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether the key presented during the handshake is trusted.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, session: &Session, host: &str, port: u16) -> SftpResult<()>;
}

/// Build the verifier for the configured policy.
pub fn verifier_for(config: &SftpClientConfig) -> SftpResult<Arc<dyn HostKeyVerifier>> {
    let accept_new = match config.host_key_policy {
        KnownHostsPolicy::Ignore => return Ok(Arc::new(AcceptAnyHostKey)),
        KnownHostsPolicy::AcceptNew => true,
        KnownHostsPolicy::Strict => false,
    };
    let path = match &config.known_hosts_path {
        Some(p) => PathBuf::from(p),
        None => default_known_hosts_path().ok_or_else(|| {
            SftpError::invalid_config("Cannot locate ~/.ssh/known_hosts; set knownHostsPath")
        })?,
    };
    Ok(Arc::new(KnownHostsVerifier::new(path, accept_new)))
}

pub fn default_known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts"))
}

/// Host pattern as OpenSSH writes it into known_hosts.
pub fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// OpenSSH-style `SHA256:...` fingerprint of the server key.
pub fn sha256_fingerprint(session: &Session) -> Option<String> {
    session
        .host_key_hash(HashType::Sha256)
        .map(|hash| format!("SHA256:{}", STANDARD_NO_PAD.encode(hash)))
}

// ── known_hosts ──────────────────────────────────────────────────────

pub struct KnownHostsVerifier {
    path: PathBuf,
    accept_new: bool,
}

impl KnownHostsVerifier {
    pub fn new(path: impl Into<PathBuf>, accept_new: bool) -> Self {
        Self {
            path: path.into(),
            accept_new,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the known_hosts file into `known_hosts`. A missing file loads
    /// nothing; an unreadable or unparsable one is a host-key failure.
    fn load(&self, known_hosts: &mut KnownHosts) -> SftpResult<bool> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "known_hosts does not exist yet");
            return Ok(false);
        }
        known_hosts
            .read_file(&self.path, KnownHostFileKind::OpenSSH)
            .map(|_| true)
            .map_err(|e| {
                SftpError::host_key(format!(
                    "Cannot read {}: {}",
                    self.path.display(),
                    e.message()
                ))
            })
    }

    fn record(&self, host: &str, port: u16, key: &[u8], key_type: HostKeyType) -> SftpResult<()> {
        let entry = known_hosts_entry(host, port);
        let type_name = key_type_name(key_type).ok_or_else(|| {
            SftpError::host_key(format!("Cannot record key for {}: unknown key type", entry))
        })?;
        match append_known_host(&self.path, &entry, type_name, key) {
            Ok(()) => info!(host = %entry, path = %self.path.display(), "recorded new host key"),
            Err(e) => warn!(
                host = %entry,
                path = %self.path.display(),
                error = %e,
                "could not persist host key"
            ),
        }
        Ok(())
    }
}

/// OpenSSH name for a host key type.
pub fn key_type_name(key_type: HostKeyType) -> Option<&'static str> {
    match key_type {
        HostKeyType::Rsa => Some("ssh-rsa"),
        HostKeyType::Dss => Some("ssh-dss"),
        HostKeyType::Ecdsa256 => Some("ecdsa-sha2-nistp256"),
        HostKeyType::Ecdsa384 => Some("ecdsa-sha2-nistp384"),
        HostKeyType::Ecdsa521 => Some("ecdsa-sha2-nistp521"),
        HostKeyType::Ed25519 => Some("ssh-ed25519"),
        _ => None,
    }
}

/// Append one `host keytype base64key` line, leaving existing lines alone.
pub fn append_known_host(path: &Path, entry: &str, key_type: &str, key: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_newline = match std::fs::read(path) {
        Ok(existing) => existing.last().is_some_and(|b| *b != b'\n'),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{} {} {}", entry, key_type, STANDARD.encode(key))?;
    file.flush()
}

impl HostKeyVerifier for KnownHostsVerifier {
    fn verify(&self, session: &Session, host: &str, port: u16) -> SftpResult<()> {
        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| SftpError::host_key("Server did not present a host key"))?;
        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| SftpError::ssh(SftpErrorKind::HostKey, "known_hosts", &e))?;
        let loaded = self.load(&mut known_hosts)?;

        let fingerprint = sha256_fingerprint(session).unwrap_or_else(|| "unknown".into());
        match known_hosts.check_port(host, port, key) {
            CheckResult::Match => {
                debug!(host, port, "host key matches known_hosts");
                Ok(())
            }
            CheckResult::Mismatch => Err(SftpError::host_key(format!(
                "Host key for {} changed (now {}); refusing to connect. Remove the old entry from {} if the change is expected.",
                known_hosts_entry(host, port),
                fingerprint,
                self.path.display()
            ))),
            CheckResult::NotFound if self.accept_new => {
                info!(host, port, %fingerprint, "trusting new host key");
                self.record(host, port, key, key_type)
            }
            CheckResult::NotFound => Err(SftpError::host_key(format!(
                "Host {} ({}) is not in {}",
                known_hosts_entry(host, port),
                fingerprint,
                self.path.display()
            ))),
            CheckResult::Failure => Err(SftpError::host_key(format!(
                "Host key check for {} failed (known_hosts loaded: {})",
                known_hosts_entry(host, port),
                loaded
            ))),
        }
    }
}

// ── Trust everything ─────────────────────────────────────────────────

pub struct AcceptAnyHostKey;

impl HostKeyVerifier for AcceptAnyHostKey {
    fn verify(&self, session: &Session, host: &str, port: u16) -> SftpResult<()> {
        let fingerprint = sha256_fingerprint(session).unwrap_or_else(|| "unknown".into());
        warn!(host, port, %fingerprint, "host key not verified");
        Ok(())
    }
}
