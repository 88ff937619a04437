// ── SftpClient – transfer front door ─────────────────────────────────────────

use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::registry;
use crate::sftp::session::{Connector, Ssh2Connector};
use crate::sftp::storage::LocalStore;
use crate::sftp::transfer::{TransferEngine, TransferOutcome};
use crate::sftp::types::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type SftpClientState = Arc<Mutex<SftpClient>>;

/// Caller hooks for one transfer. Exactly one of `on_success` /
/// `on_failure` runs, after the session has been torn down.
pub struct TransferCallbacks {
    pub on_progress: Box<dyn FnMut(u64, u64) + Send>,
    pub on_success: Box<dyn FnOnce(TransferReport) + Send>,
    pub on_failure: Box<dyn FnOnce(SftpError) + Send>,
}

impl TransferCallbacks {
    pub fn new(
        on_success: impl FnOnce(TransferReport) + Send + 'static,
        on_failure: impl FnOnce(SftpError) + Send + 'static,
    ) -> Self {
        Self {
            on_progress: Box::new(|_, _| {}),
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    pub fn with_progress(mut self, on_progress: impl FnMut(u64, u64) + Send + 'static) -> Self {
        self.on_progress = Box::new(on_progress);
        self
    }

    fn deliver(self, result: SftpResult<TransferReport>) {
        match result {
            Ok(report) => (self.on_success)(report),
            Err(e) => (self.on_failure)(e),
        }
    }
}

#[derive(Clone)]
pub struct SftpClient {
    config: SftpClientConfig,
    engine: TransferEngine,
}

impl SftpClient {
    /// Client backed by libssh2, with storage from the config.
    pub fn new(config: SftpClientConfig) -> SftpResult<Self> {
        let connector = Arc::new(Ssh2Connector::from_config(&config)?);
        let store = LocalStore::from_config(&config);
        Self::with_connector(config, connector, store)
    }

    /// Create a new client wrapped in the managed state type.
    pub fn new_state(config: SftpClientConfig) -> SftpResult<SftpClientState> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    pub fn with_connector(
        config: SftpClientConfig,
        connector: Arc<dyn Connector>,
        store: LocalStore,
    ) -> SftpResult<Self> {
        config.validate()?;
        let engine = TransferEngine::new(connector, store)
            .with_chunk_size(config.chunk_size)
            .with_digest_algorithm(config.digest_algorithm);
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &SftpClientConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        self.engine.store()
    }

    // ── Blocking ─────────────────────────────────────────────────────────────

    // The blocking variants hand their result straight back, so their
    // registry entry only lives while the transfer runs.

    pub fn download(&self, request: DownloadRequest) -> SftpResult<TransferReport> {
        let (id, cancel) = registry::register(TransferDirection::Download, &request.remote_path);
        let result = self.execute_download(&id, &cancel, &request, &mut |_, _| {});
        registry::remove(&id);
        result
    }

    pub fn upload(&self, request: UploadRequest) -> SftpResult<TransferReport> {
        let remote = upload_target(&request);
        let (id, cancel) = registry::register(TransferDirection::Upload, &remote);
        let result = self.execute_upload(&id, &cancel, &request, &mut |_, _| {});
        registry::remove(&id);
        result
    }

    /// Run a download on the current thread, reporting through `callbacks`.
    /// Returns the transfer id.
    pub fn download_with(&self, request: DownloadRequest, mut callbacks: TransferCallbacks) -> String {
        let (id, cancel) = registry::register(TransferDirection::Download, &request.remote_path);
        let result = self.execute_download(&id, &cancel, &request, &mut *callbacks.on_progress);
        callbacks.deliver(result);
        id
    }

    pub fn upload_with(&self, request: UploadRequest, mut callbacks: TransferCallbacks) -> String {
        let remote = upload_target(&request);
        let (id, cancel) = registry::register(TransferDirection::Upload, &remote);
        let result = self.execute_upload(&id, &cancel, &request, &mut *callbacks.on_progress);
        callbacks.deliver(result);
        id
    }

    // ── Background ───────────────────────────────────────────────────────────

    /// Run a download on the blocking pool. The id is usable with
    /// `cancel_transfer` / `get_transfer_progress` immediately.
    pub fn spawn_download(
        &self,
        request: DownloadRequest,
        mut callbacks: TransferCallbacks,
    ) -> (String, JoinHandle<()>) {
        let (id, cancel) = registry::register(TransferDirection::Download, &request.remote_path);
        let client = self.clone();
        let task_id = id.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result =
                client.execute_download(&task_id, &cancel, &request, &mut *callbacks.on_progress);
            callbacks.deliver(result);
        });
        (id, handle)
    }

    pub fn spawn_upload(
        &self,
        request: UploadRequest,
        mut callbacks: TransferCallbacks,
    ) -> (String, JoinHandle<()>) {
        let remote = upload_target(&request);
        let (id, cancel) = registry::register(TransferDirection::Upload, &remote);
        let client = self.clone();
        let task_id = id.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result =
                client.execute_upload(&task_id, &cancel, &request, &mut *callbacks.on_progress);
            callbacks.deliver(result);
        });
        (id, handle)
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn execute_download(
        &self,
        id: &str,
        cancel: &CancelFlag,
        request: &DownloadRequest,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<TransferReport> {
        let started = Instant::now();
        let result = self.config.credentials().and_then(|creds| {
            self.engine.download(&creds, request, cancel, &mut |done, total| {
                registry::update_progress(id, done, total);
                on_progress(done, total);
            })
        });
        self.conclude(id, TransferDirection::Download, &request.remote_path, started, result)
    }

    fn execute_upload(
        &self,
        id: &str,
        cancel: &CancelFlag,
        request: &UploadRequest,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SftpResult<TransferReport> {
        let started = Instant::now();
        let result = self.config.credentials().and_then(|creds| {
            self.engine.upload(&creds, request, cancel, &mut |done, total| {
                registry::update_progress(id, done, total);
                on_progress(done, total);
            })
        });
        let remote = upload_target(request);
        self.conclude(id, TransferDirection::Upload, &remote, started, result)
    }

    fn conclude(
        &self,
        id: &str,
        direction: TransferDirection,
        remote_path: &str,
        started: Instant,
        result: SftpResult<TransferOutcome>,
    ) -> SftpResult<TransferReport> {
        match result {
            Ok(outcome) => {
                registry::finish(id, Ok(()));
                let report = TransferReport {
                    transfer_id: id.to_string(),
                    direction,
                    remote_path: outcome.remote_path,
                    local_path: outcome.local_path.map(|p| p.to_string_lossy().to_string()),
                    bytes_transferred: outcome.bytes_transferred,
                    duration_ms: started.elapsed().as_millis() as u64,
                    digest: outcome.digest,
                };
                info!(transfer_id = id, ?direction, bytes = report.bytes_transferred, "transfer completed");
                Ok(report)
            }
            Err(e) => {
                registry::finish(id, Err(&e));
                warn!(transfer_id = id, ?direction, remote = remote_path, reason = e.reason(), error = %e, "transfer failed");
                Err(e)
            }
        }
    }
}

fn upload_target(request: &UploadRequest) -> String {
    crate::sftp::transfer::RemoteDir::parse(&request.remote_directory).join(&request.remote_filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::session::RemoteFs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Offline;

    impl Connector for Offline {
        fn connect(&self, _: &SessionCredentials) -> SftpResult<Box<dyn RemoteFs>> {
            Err(SftpError::new(crate::sftp::SftpErrorKind::Connect, "offline"))
        }
    }

    fn client(with_credentials: bool) -> SftpClient {
        let dir = std::env::temp_dir().join("skiff-service-tests");
        let config = SftpClientConfig {
            credentials: with_credentials.then(|| SessionCredentials::new("h", "u", "p")),
            ..Default::default()
        };
        SftpClient::with_connector(config, Arc::new(Offline), LocalStore::new(&dir, &dir)).unwrap()
    }

    fn request() -> DownloadRequest {
        DownloadRequest {
            remote_path: "/data/report.csv".into(),
            expected_digest: "d41d8cd98f00b204e9800998ecf8427e".into(),
        }
    }

    #[test]
    fn missing_credentials_fail_without_connecting() {
        let err = client(false).download(request()).unwrap_err();
        assert_eq!(err.reason(), "invalid_config");
    }

    #[test]
    fn blocking_download_leaves_no_registry_entry() {
        let req = DownloadRequest {
            remote_path: "/data/blocking-only.csv".into(),
            ..request()
        };
        assert!(client(true).download(req).is_err());
        let left = crate::sftp::TRANSFERS
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.progress.remote_path == "/data/blocking-only.csv")
            .count();
        assert_eq!(left, 0);
    }

    #[test]
    fn download_with_fires_failure_once() {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = successes.clone();
        let f = failures.clone();
        let id = client(true).download_with(
            request(),
            TransferCallbacks::new(
                move |_| {
                    s.fetch_add(1, Ordering::SeqCst);
                },
                move |e| f.lock().unwrap().push(e.reason()),
            ),
        );
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(*failures.lock().unwrap(), vec!["connect"]);
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn spawned_download_reports_failure_and_registry_state() {
        let _guard = registry::tests::serial();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx2 = tx.clone();
        let (id, handle) = client(true).spawn_download(
            request(),
            TransferCallbacks::new(
                move |_| {
                    let _ = tx.send("success");
                },
                move |e| {
                    let _ = tx2.send(e.reason());
                },
            ),
        );
        handle.await.unwrap();
        assert_eq!(rx.recv().unwrap(), "connect");
        assert!(rx.try_recv().is_err());
        let progress = crate::sftp::get_transfer_progress(&id).unwrap();
        assert_eq!(progress.status, TransferStatus::Failed);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = SftpClientConfig {
            chunk_size: 0,
            ..Default::default()
        };
        let dir = std::env::temp_dir();
        assert!(SftpClient::with_connector(config, Arc::new(Offline), LocalStore::new(&dir, &dir)).is_err());
    }

    #[test]
    fn upload_target_joins_directory() {
        let req = UploadRequest {
            data: vec![],
            remote_directory: "/remote/dir/".into(),
            remote_filename: "newfile.bin".into(),
        };
        assert_eq!(upload_target(&req), "/remote/dir/newfile.bin");
    }
}
