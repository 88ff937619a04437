//! Process-wide libssh2 initialisation.

use crate::sftp::error::{SftpError, SftpResult};
use std::sync::OnceLock;
use tracing::{debug, error};

static LIBRARY: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialise libssh2 exactly once per process. Later calls return the
/// cached outcome.
pub fn ensure_initialized() -> SftpResult<()> {
    LIBRARY
        .get_or_init(|| match std::panic::catch_unwind(ssh2::init) {
            Ok(()) => {
                debug!("libssh2 initialised");
                Ok(())
            }
            Err(_) => {
                error!("libssh2 initialisation failed");
                Err("libssh2 initialisation failed".to_string())
            }
        })
        .clone()
        .map_err(SftpError::init)
}

pub fn is_initialized() -> bool {
    matches!(LIBRARY.get(), Some(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(ensure_initialized().is_ok());
        assert!(is_initialized());
        assert!(ensure_initialized().is_ok());
    }
}
