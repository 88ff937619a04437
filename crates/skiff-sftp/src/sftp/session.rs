// ── SSH/SFTP session ──────────────────────────────────────────────────────────
//
// Staged setup of one authenticated SFTP channel and its teardown. The
// transfer engine only sees the `Connector` / `RemoteFs` / `RemoteFile`
// traits; `Ssh2Connector` is the libssh2-backed implementation.

use crate::sftp::error::{SftpError, SftpErrorKind, SftpResult};
use crate::sftp::host_key::HostKeyVerifier;
use crate::sftp::library;
use crate::sftp::types::{SessionCredentials, SftpClientConfig};
use ssh2::{ErrorCode, OpenFlags, OpenType, Session, Sftp};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// libssh2 "would block" session error code.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// An open remote file bound to one session.
pub trait RemoteFile {
    /// Read up to `buf.len()` bytes; `0` means end of file.
    fn read_chunk(&mut self, buf: &mut [u8]) -> SftpResult<usize>;
    /// Write some prefix of `data`, returning how many bytes were accepted.
    fn write_chunk(&mut self, data: &[u8]) -> SftpResult<usize>;
    fn close(&mut self) -> SftpResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkdirOutcome {
    Created,
    AlreadyExists,
}

/// Operations available once the SFTP channel is ready.
pub trait RemoteFs {
    fn file_size(&mut self, path: &str) -> SftpResult<u64>;
    fn open_read(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>>;
    /// Open for writing, creating or truncating the target.
    fn open_write(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>>;
    fn mkdir(&mut self, path: &str) -> SftpResult<MkdirOutcome>;
    /// Release every resource in reverse order of acquisition. Safe to call
    /// more than once.
    fn teardown(&mut self);
}

/// Produces a ready session for one transfer.
pub trait Connector: Send + Sync {
    fn connect(&self, credentials: &SessionCredentials) -> SftpResult<Box<dyn RemoteFs>>;
}

// ── Stages ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    Uninitialized,
    LibraryReady,
    SessionCreated,
    TransportConnected,
    Handshaken,
    Authenticated,
    SftpReady,
    Closed,
}

// ── libssh2 connector ─────────────────────────────────────────────────────────

pub struct Ssh2Connector {
    port: u16,
    connect_timeout: Duration,
    verifier: Arc<dyn HostKeyVerifier>,
}

impl Ssh2Connector {
    pub fn new(port: u16, connect_timeout: Duration, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self {
            port,
            connect_timeout,
            verifier,
        }
    }

    pub fn from_config(config: &SftpClientConfig) -> SftpResult<Self> {
        config.validate()?;
        let verifier = crate::sftp::host_key::verifier_for(config)?;
        Ok(Self::new(config.port, config.connect_timeout(), verifier))
    }
}

impl Connector for Ssh2Connector {
    fn connect(&self, credentials: &SessionCredentials) -> SftpResult<Box<dyn RemoteFs>> {
        let session = Ssh2Session::open(
            credentials,
            self.port,
            self.connect_timeout,
            self.verifier.as_ref(),
        )?;
        Ok(Box::new(session))
    }
}

pub struct Ssh2Session {
    host: String,
    stage: SessionStage,
    tcp: Option<TcpStream>,
    session: Option<Session>,
    sftp: Option<Sftp>,
}

impl Ssh2Session {
    fn empty(host: &str) -> Self {
        Self {
            host: host.to_string(),
            stage: SessionStage::Uninitialized,
            tcp: None,
            session: None,
            sftp: None,
        }
    }

    fn advance(&mut self, stage: SessionStage) {
        debug!(host = %self.host, from = ?self.stage, to = ?stage, "session stage");
        self.stage = stage;
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Run every setup stage in order. A failing stage tears down whatever
    /// the earlier stages acquired before the error is returned.
    pub fn open(
        credentials: &SessionCredentials,
        port: u16,
        connect_timeout: Duration,
        verifier: &dyn HostKeyVerifier,
    ) -> SftpResult<Self> {
        let mut this = Self::empty(&credentials.hostname);
        match this.setup(credentials, port, connect_timeout, verifier) {
            Ok(()) => Ok(this),
            Err(e) => {
                warn!(host = %credentials.hostname, stage = ?this.stage, reason = e.reason(), "session setup failed");
                this.teardown();
                Err(e)
            }
        }
    }

    fn setup(
        &mut self,
        credentials: &SessionCredentials,
        port: u16,
        connect_timeout: Duration,
        verifier: &dyn HostKeyVerifier,
    ) -> SftpResult<()> {
        library::ensure_initialized()?;
        self.advance(SessionStage::LibraryReady);

        let mut session = Session::new()
            .map_err(|e| SftpError::ssh(SftpErrorKind::SessionAlloc, "Failed to create SSH session", &e))?;
        session.set_blocking(true);
        self.session = Some(session.clone());
        self.advance(SessionStage::SessionCreated);

        let (tcp, addr) = skiff_core::connect_host(&credentials.hostname, port, connect_timeout)?;
        let tcp_for_session = tcp.try_clone()?;
        self.tcp = Some(tcp);
        session.set_tcp_stream(tcp_for_session);
        self.advance(SessionStage::TransportConnected);

        session
            .handshake()
            .map_err(|e| SftpError::ssh(SftpErrorKind::Handshake, "SSH handshake failed", &e))?;
        self.advance(SessionStage::Handshaken);
        verifier.verify(&session, &credentials.hostname, port)?;

        if let Err(e) = session.userauth_password(&credentials.username, &credentials.password) {
            // Tolerated only because the session is blocking; the check below decides.
            if e.code() != ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) {
                return Err(SftpError::ssh(SftpErrorKind::Auth, "Password authentication failed", &e));
            }
        }
        if !session.authenticated() {
            return Err(SftpError::auth(format!(
                "Server did not accept credentials for {}",
                credentials.username
            )));
        }
        self.advance(SessionStage::Authenticated);

        let sftp = session
            .sftp()
            .map_err(|e| SftpError::ssh(SftpErrorKind::SftpInit, "SFTP subsystem init failed", &e))?;
        self.sftp = Some(sftp);
        self.advance(SessionStage::SftpReady);

        info!(
            host = %credentials.hostname,
            addr = %addr,
            user = %credentials.username,
            "sftp session ready"
        );
        Ok(())
    }

    fn sftp(&self) -> SftpResult<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| SftpError::new(SftpErrorKind::SftpInit, "SFTP channel is not open"))
    }
}

impl RemoteFs for Ssh2Session {
    fn file_size(&mut self, path: &str) -> SftpResult<u64> {
        let stat = self
            .sftp()?
            .stat(Path::new(path))
            .map_err(|e| SftpError::ssh(SftpErrorKind::Stat, &format!("stat {}", path), &e))?;
        stat.size
            .ok_or_else(|| SftpError::stat(format!("Server reported no size for {}", path)))
    }

    fn open_read(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>> {
        let file = self
            .sftp()?
            .open(Path::new(path))
            .map_err(|e| SftpError::ssh(SftpErrorKind::Open, &format!("open {}", path), &e))?;
        Ok(Box::new(Ssh2File { inner: Some(file) }))
    }

    fn open_write(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>> {
        let file = self
            .sftp()?
            .open_mode(
                Path::new(path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| SftpError::ssh(SftpErrorKind::Open, &format!("create {}", path), &e))?;
        Ok(Box::new(Ssh2File { inner: Some(file) }))
    }

    fn mkdir(&mut self, path: &str) -> SftpResult<MkdirOutcome> {
        let sftp = self.sftp()?;
        match sftp.mkdir(Path::new(path), 0o755) {
            Ok(()) => Ok(MkdirOutcome::Created),
            // Servers disagree on the status code for an existing directory.
            Err(e) => match sftp.stat(Path::new(path)) {
                Ok(stat) if stat.is_dir() => Ok(MkdirOutcome::AlreadyExists),
                _ => Err(SftpError::ssh(SftpErrorKind::Mkdir, &format!("mkdir {}", path), &e)),
            },
        }
    }

    fn teardown(&mut self) {
        if self.stage == SessionStage::Closed {
            return;
        }
        if let Some(mut sftp) = self.sftp.take() {
            if let Err(e) = sftp.shutdown() {
                debug!(host = %self.host, error = %e, "sftp shutdown failed");
            }
        }
        if let Some(session) = self.session.take() {
            if self.stage >= SessionStage::Handshaken {
                let _ = session.disconnect(None, "Client disconnecting", None);
            }
        }
        if let Some(tcp) = self.tcp.take() {
            let _ = tcp.shutdown(Shutdown::Both);
        }
        self.advance(SessionStage::Closed);
    }
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct Ssh2File {
    inner: Option<ssh2::File>,
}

impl Ssh2File {
    fn file(&mut self) -> SftpResult<&mut ssh2::File> {
        self.inner
            .as_mut()
            .ok_or_else(|| SftpError::new(SftpErrorKind::Protocol, "remote file already closed"))
    }
}

impl RemoteFile for Ssh2File {
    fn read_chunk(&mut self, buf: &mut [u8]) -> SftpResult<usize> {
        let file = self.file()?;
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SftpError::read(format!("Remote read failed: {}", e))),
            }
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> SftpResult<usize> {
        let file = self.file()?;
        loop {
            match file.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SftpError::write(format!("Remote write failed: {}", e))),
            }
        }
    }

    fn close(&mut self) -> SftpResult<()> {
        match self.inner.take() {
            Some(mut file) => file
                .close()
                .map_err(|e| SftpError::new(SftpErrorKind::Protocol, format!("close failed: {}", e))),
            None => Ok(()),
        }
    }
}
