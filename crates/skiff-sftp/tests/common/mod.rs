//! In-memory SFTP server used to drive the transfer engine end to end.

#![allow(dead_code)]

use skiff_sftp::{
    Connector, LocalStore, MkdirOutcome, RemoteFile, RemoteFs, SessionCredentials, SftpClient,
    SftpClientConfig, SftpError, SftpErrorKind, SftpResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct ServerState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    /// Largest read the server hands out per call (0 = unlimited).
    pub max_read: usize,
    /// Length accepted by every successful write, in order.
    pub write_log: Vec<usize>,
    /// Number of upcoming writes that accept zero bytes.
    pub zero_writes: usize,
    /// Paths whose mkdir fails even though they do not exist.
    pub broken_dirs: HashSet<String>,
    /// Byte offset at which reads start failing, as if the link dropped.
    pub read_failure_after: Option<usize>,
    pub live_sessions: usize,
    pub sessions_opened: usize,
    pub teardowns: usize,
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
        self.state.lock().unwrap().files.insert(path.to_string(), data);
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        self
    }

    pub fn with_max_read(self, max_read: usize) -> Self {
        self.state.lock().unwrap().max_read = max_read;
        self
    }

    pub fn with_zero_writes(self, count: usize) -> Self {
        self.state.lock().unwrap().zero_writes = count;
        self
    }

    pub fn with_read_failure_after(self, offset: usize) -> Self {
        self.state.lock().unwrap().read_failure_after = Some(offset);
        self
    }

    pub fn with_broken_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().broken_dirs.insert(path.to_string());
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn live_sessions(&self) -> usize {
        self.state().live_sessions
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            server: self.clone(),
        })
    }
}

pub struct MemoryConnector {
    server: MemoryServer,
}

impl Connector for MemoryConnector {
    fn connect(&self, _credentials: &SessionCredentials) -> SftpResult<Box<dyn RemoteFs>> {
        {
            let mut state = self.server.state();
            state.live_sessions += 1;
            state.sessions_opened += 1;
        }
        Ok(Box::new(MemorySession {
            server: self.server.clone(),
            open: true,
        }))
    }
}

struct MemorySession {
    server: MemoryServer,
    open: bool,
}

impl RemoteFs for MemorySession {
    fn file_size(&mut self, path: &str) -> SftpResult<u64> {
        self.server
            .state()
            .files
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| SftpError::stat(format!("no such file: {}", path)))
    }

    fn open_read(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>> {
        let state = self.server.state();
        let data = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SftpError::open(format!("no such file: {}", path)))?;
        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            max_read: state.max_read,
            fail_after: state.read_failure_after,
        }))
    }

    fn open_write(&mut self, path: &str) -> SftpResult<Box<dyn RemoteFile>> {
        self.server.state().files.insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            server: self.server.clone(),
            path: path.to_string(),
        }))
    }

    fn mkdir(&mut self, path: &str) -> SftpResult<MkdirOutcome> {
        let mut state = self.server.state();
        if state.dirs.contains(path) {
            return Ok(MkdirOutcome::AlreadyExists);
        }
        if state.broken_dirs.contains(path) {
            return Err(SftpError::new(
                SftpErrorKind::Mkdir,
                format!("permission denied: {}", path),
            ));
        }
        state.dirs.insert(path.to_string());
        Ok(MkdirOutcome::Created)
    }

    fn teardown(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.server.state();
            state.live_sessions -= 1;
            state.teardowns += 1;
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    max_read: usize,
    fail_after: Option<usize>,
}

impl RemoteFile for MemoryReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> SftpResult<usize> {
        let mut n = buf.len().min(self.data.len() - self.pos);
        if self.max_read > 0 {
            n = n.min(self.max_read);
        }
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                return Err(SftpError::read("connection reset by peer"));
            }
            n = n.min(limit - self.pos);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write_chunk(&mut self, _data: &[u8]) -> SftpResult<usize> {
        Err(SftpError::write("file opened read-only"))
    }

    fn close(&mut self) -> SftpResult<()> {
        Ok(())
    }
}

struct MemoryWriter {
    server: MemoryServer,
    path: String,
}

impl RemoteFile for MemoryWriter {
    fn read_chunk(&mut self, _buf: &mut [u8]) -> SftpResult<usize> {
        Err(SftpError::read("file opened write-only"))
    }

    fn write_chunk(&mut self, data: &[u8]) -> SftpResult<usize> {
        let mut state = self.server.state();
        if state.zero_writes > 0 {
            state.zero_writes -= 1;
            return Ok(0);
        }
        state.write_log.push(data.len());
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self) -> SftpResult<()> {
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub server: MemoryServer,
    pub client: SftpClient,
}

impl Fixture {
    pub fn new(server: MemoryServer) -> Self {
        Self::with_config(server, SftpClientConfig::default())
    }

    pub fn with_config(server: MemoryServer, mut config: SftpClientConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config.credentials = Some(SessionCredentials::new("files.example", "ops", "secret"));
        let store = LocalStore::new(dir.path().join("staging"), dir.path().join("final"));
        let client = SftpClient::with_connector(config, server.connector(), store).unwrap();
        Self {
            dir,
            server,
            client,
        }
    }

    pub fn staging(&self, name: &str) -> std::path::PathBuf {
        self.client.store().staging_path(name)
    }

    pub fn final_file(&self, name: &str) -> std::path::PathBuf {
        self.client.store().final_path(name)
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}
