// ── Transfer registry ─────────────────────────────────────────────────────────
//
// Process-wide view of running and finished transfers, keyed by transfer id.
// Each entry carries the cancel flag its transfer loop polls, so a transfer
// can be cancelled from any thread by id.

use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::types::{CancelFlag, TransferDirection, TransferProgress, TransferStatus};
use crate::sftp::TRANSFERS;
use chrono::Utc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TransferEntry {
    pub progress: TransferProgress,
    pub cancel: CancelFlag,
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64) * 100.0
    }
}

/// Record a new in-progress transfer and hand back its id and cancel flag.
pub(crate) fn register(direction: TransferDirection, remote_path: &str) -> (String, CancelFlag) {
    let id = uuid::Uuid::new_v4().to_string();
    let cancel = CancelFlag::new();
    let entry = TransferEntry {
        progress: TransferProgress {
            transfer_id: id.clone(),
            direction,
            remote_path: remote_path.to_string(),
            total_bytes: 0,
            transferred_bytes: 0,
            percent: 0.0,
            status: TransferStatus::InProgress,
            started_at: Utc::now(),
            error: None,
        },
        cancel: cancel.clone(),
    };
    if let Ok(mut map) = TRANSFERS.lock() {
        map.insert(id.clone(), entry);
    }
    debug!(transfer_id = %id, ?direction, remote_path, "transfer registered");
    (id, cancel)
}

pub(crate) fn update_progress(id: &str, transferred: u64, total: u64) {
    if let Ok(mut map) = TRANSFERS.lock() {
        if let Some(entry) = map.get_mut(id) {
            entry.progress.transferred_bytes = transferred;
            entry.progress.total_bytes = total;
            entry.progress.percent = percent(transferred, total);
        }
    }
}

/// Mark a transfer finished with the outcome of its single terminal path.
pub(crate) fn finish(id: &str, result: Result<(), &SftpError>) {
    if let Ok(mut map) = TRANSFERS.lock() {
        if let Some(entry) = map.get_mut(id) {
            match result {
                Ok(()) => {
                    entry.progress.status = TransferStatus::Completed;
                    entry.progress.percent = 100.0;
                }
                Err(e) if e.is_cancelled() => {
                    entry.progress.status = TransferStatus::Cancelled;
                    entry.progress.error = Some(e.reason().to_string());
                }
                Err(e) => {
                    entry.progress.status = TransferStatus::Failed;
                    entry.progress.error = Some(e.reason().to_string());
                }
            }
        }
    }
}

/// Forget a transfer whose caller already holds its result.
pub(crate) fn remove(id: &str) {
    if let Ok(mut map) = TRANSFERS.lock() {
        map.remove(id);
    }
}

pub fn get_transfer_progress(transfer_id: &str) -> Option<TransferProgress> {
    TRANSFERS
        .lock()
        .ok()
        .and_then(|map| map.get(transfer_id).map(|e| e.progress.clone()))
}

pub fn list_active_transfers() -> Vec<TransferProgress> {
    TRANSFERS
        .lock()
        .ok()
        .map(|map| {
            map.values()
                .filter(|e| e.progress.status == TransferStatus::InProgress)
                .map(|e| e.progress.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Request cancellation. The transfer loop observes it before its next chunk.
pub fn cancel_transfer(transfer_id: &str) -> SftpResult<()> {
    if let Ok(map) = TRANSFERS.lock() {
        if let Some(entry) = map.get(transfer_id) {
            entry.cancel.cancel();
            info!(transfer_id, "cancellation requested");
            return Ok(());
        }
    }
    Err(SftpError::transfer_not_found(transfer_id))
}

/// Drop finished entries, returning how many were removed.
pub fn clear_completed_transfers() -> usize {
    if let Ok(mut map) = TRANSFERS.lock() {
        let before = map.len();
        map.retain(|_, e| e.progress.status == TransferStatus::InProgress);
        before - map.len()
    } else {
        0
    }
}
