//! SFTP client error type.

use crate::sftp::digest::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use skiff_core::{NetError, NetErrorKind};
use std::fmt;

/// Categorised transfer error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpError {
    pub kind: SftpErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SftpErrorKind {
    /// Process-wide libssh2 initialisation failed.
    Init,
    /// Could not allocate an SSH session.
    SessionAlloc,
    /// DNS lookup failed or returned nothing.
    Resolve,
    /// No resolved address accepted a TCP connection.
    Connect,
    Handshake,
    /// Host key unknown or mismatched under the active policy.
    HostKey,
    Auth,
    SftpInit,
    Stat,
    Open,
    Read,
    Write,
    /// Server accepted zero bytes too many times in a row.
    WriteStalled,
    Mkdir,
    /// Local file system error (staging file, source file).
    LocalIo,
    InvalidPath,
    InvalidConfig,
    Cancelled,
    ChecksumMismatch(DigestAlgorithm),
    /// Verified staging file could not be moved into place.
    Promote,
    /// Digest context misuse.
    Digest,
    /// SSH protocol error outside a specific stage.
    Protocol,
    /// No registered transfer with the given id.
    TransferNotFound,
}

pub type SftpResult<T> = Result<T, SftpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl SftpError {
    pub fn new(kind: SftpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    /// Wrap an ssh2 error raised at a known stage.
    pub fn ssh(kind: SftpErrorKind, context: &str, err: &ssh2::Error) -> Self {
        Self::new(kind, format!("{}: {}", context, err))
    }

    pub fn init(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Init, msg)
    }

    pub fn host_key(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::HostKey, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Auth, msg)
    }

    pub fn stat(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Stat, msg)
    }

    pub fn open(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Open, msg)
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Read, msg)
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Write, msg)
    }

    pub fn write_stalled(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::WriteStalled, msg)
    }

    pub fn mkdir(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Mkdir, msg)
    }

    pub fn local_io(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::LocalIo, msg)
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::InvalidPath, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::InvalidConfig, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(SftpErrorKind::Cancelled, "Transfer cancelled by request")
    }

    pub fn checksum_mismatch(algorithm: DigestAlgorithm, expected: &str, actual: &str) -> Self {
        Self::new(
            SftpErrorKind::ChecksumMismatch(algorithm),
            format!("expected {}, got {}", expected, actual),
        )
    }

    pub fn transfer_not_found(id: &str) -> Self {
        Self::new(
            SftpErrorKind::TransferNotFound,
            format!("Transfer '{}' not found", id),
        )
    }

    pub fn promote(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Promote, msg)
    }

    pub fn digest(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Digest, msg)
    }

    /// Short machine-readable failure reason handed to `on_failure`.
    pub fn reason(&self) -> &'static str {
        self.kind.reason()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == SftpErrorKind::Cancelled
    }
}

impl SftpErrorKind {
    pub fn reason(&self) -> &'static str {
        match self {
            SftpErrorKind::Init => "libssh2_init",
            SftpErrorKind::SessionAlloc => "session_new",
            SftpErrorKind::Resolve => "resolve",
            SftpErrorKind::Connect => "connect",
            SftpErrorKind::Handshake => "handshake",
            SftpErrorKind::HostKey => "host_key",
            SftpErrorKind::Auth => "auth",
            SftpErrorKind::SftpInit => "sftp_init",
            SftpErrorKind::Stat => "stat",
            SftpErrorKind::Open => "open",
            SftpErrorKind::Read => "read",
            SftpErrorKind::Write => "write",
            SftpErrorKind::WriteStalled => "write_stalled",
            SftpErrorKind::Mkdir => "mkdir",
            SftpErrorKind::LocalIo => "local_io",
            SftpErrorKind::InvalidPath => "invalid_path",
            SftpErrorKind::InvalidConfig => "invalid_config",
            SftpErrorKind::Cancelled => "canceled",
            SftpErrorKind::ChecksumMismatch(DigestAlgorithm::Md5) => "md5sum did not match",
            SftpErrorKind::ChecksumMismatch(DigestAlgorithm::Sha256) => "sha256sum did not match",
            SftpErrorKind::Promote => "can not move",
            SftpErrorKind::Digest => "digest",
            SftpErrorKind::Protocol => "ssh",
            SftpErrorKind::TransferNotFound => "not_found",
        }
    }
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason(), self.message)
    }
}

impl std::error::Error for SftpError {}

impl From<std::io::Error> for SftpError {
    fn from(e: std::io::Error) -> Self {
        Self::local_io(e.to_string())
    }
}

impl From<ssh2::Error> for SftpError {
    fn from(e: ssh2::Error) -> Self {
        Self::new(SftpErrorKind::Protocol, e.to_string())
    }
}

impl From<NetError> for SftpError {
    fn from(e: NetError) -> Self {
        let kind = match e.kind {
            NetErrorKind::Resolution | NetErrorKind::InvalidInput => SftpErrorKind::Resolve,
            NetErrorKind::Connect => SftpErrorKind::Connect,
        };
        Self::new(kind, e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_match_callback_contract() {
        assert_eq!(SftpError::cancelled().reason(), "canceled");
        assert_eq!(
            SftpError::checksum_mismatch(DigestAlgorithm::Md5, "a", "b").reason(),
            "md5sum did not match"
        );
        assert_eq!(
            SftpError::checksum_mismatch(DigestAlgorithm::Sha256, "a", "b").reason(),
            "sha256sum did not match"
        );
        assert_eq!(SftpError::promote("x").reason(), "can not move");
        assert_eq!(SftpError::new(SftpErrorKind::Init, "x").reason(), "libssh2_init");
        assert_eq!(SftpError::new(SftpErrorKind::SessionAlloc, "x").reason(), "session_new");
    }

    #[test]
    fn display_includes_reason_and_message() {
        let e = SftpError::auth("password rejected");
        assert_eq!(e.to_string(), "[auth] password rejected");
    }

    #[test]
    fn net_errors_map_to_stage() {
        let e: SftpError = NetError::resolution("nxdomain").into();
        assert_eq!(e.kind, SftpErrorKind::Resolve);
        let e: SftpError = NetError::connect("refused").into();
        assert_eq!(e.kind, SftpErrorKind::Connect);
    }

    #[test]
    fn io_error_maps_to_local_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let e: SftpError = io.into();
        assert_eq!(e.reason(), "local_io");
        assert!(!e.is_cancelled());
    }
}
