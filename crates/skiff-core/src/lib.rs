//! # skiff-core
//!
//! Network plumbing shared by the SFTP client:
//!   • hostname resolution into ordered IPv4/IPv6 candidates
//!   • first-success TCP connect with a per-address timeout
//!   • a pre-handshake connection probe (DNS, TCP, SSH banner)

pub mod diagnostics;
pub mod net;

pub use diagnostics::{probe, DiagnosticReport, DiagnosticStep, StepStatus};
pub use net::{
    connect_first, connect_host, resolve, AddressFamily, NetError, NetErrorKind, NetResult,
    ResolvedAddress, DEFAULT_SSH_PORT,
};
