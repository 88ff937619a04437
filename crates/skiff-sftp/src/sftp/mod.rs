// ── skiff-sftp / sftp module ──────────────────────────────────────────────────
//
// Session/transfer engine for a password-authenticated SFTP client:
//   • Process-wide libssh2 initialisation
//   • Staged session setup and teardown over ssh2
//   • Pluggable host-key verification
//   • Chunked download / upload with progress and cancellation
//   • Streaming digests and staged promotion of downloads
//   • Transfer registry for progress queries and external cancellation

pub mod types;
pub mod error;
pub mod digest;
pub mod storage;
pub mod library;
pub mod host_key;
pub mod session;
pub mod registry;
pub mod transfer;
pub mod service;

pub use types::*;
pub use error::{SftpError, SftpErrorKind, SftpResult};
pub use digest::{digest_bytes, digest_file, digest_reader, DigestAlgorithm, DigestContext};
pub use storage::{file_name_from_remote, LocalStore};
pub use host_key::{verifier_for, HostKeyVerifier};
pub use session::{Connector, MkdirOutcome, RemoteFile, RemoteFs, SessionStage, Ssh2Connector};
pub use registry::{
    cancel_transfer, clear_completed_transfers, get_transfer_progress, list_active_transfers,
};
pub use transfer::{RemoteDir, TransferEngine, TransferOutcome};
pub use service::{SftpClient, SftpClientState, TransferCallbacks};

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

lazy_static! {
    /// Live and finished transfers (transfer_id → progress + cancel flag)
    pub static ref TRANSFERS: StdMutex<HashMap<String, registry::TransferEntry>> =
        StdMutex::new(HashMap::new());
}
