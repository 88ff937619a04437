//! # skiff – SFTP
//!
//! Minimal SFTP client providing:
//!   • Staged session setup (resolve, connect, handshake, host-key check,
//!     password auth, SFTP init) with ordered teardown on every exit path
//!   • Whole-file download through a staging file, promoted only after
//!     digest verification
//!   • Whole-file upload with intermediate directory creation
//!   • Per-chunk progress callbacks and cooperative cancellation
//!   • Streaming MD5 / SHA-256 digests

pub mod sftp;

pub use sftp::*;
