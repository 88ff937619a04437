//! Address resolution and first-success TCP connect.
//!
//! Resolution always hits the system resolver (no caching) and keeps the
//! resolver's ordering. [`connect_first`] walks that ordering and hands the
//! first socket that connects back to the caller in blocking mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

// ─── Addresses ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// One connectable candidate produced by [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub addr: SocketAddr,
    pub family: AddressFamily,
}

impl ResolvedAddress {
    pub fn new(addr: SocketAddr) -> Self {
        let family = if addr.is_ipv4() {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        };
        Self { addr, family }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetErrorKind {
    /// DNS lookup failed or returned nothing.
    Resolution,
    /// No candidate address accepted a connection.
    Connect,
    /// Caller passed something unusable (empty host, zero timeout).
    InvalidInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetError {
    pub kind: NetErrorKind,
    pub message: String,
}

pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    pub fn new(kind: NetErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::new(NetErrorKind::Resolution, msg)
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::new(NetErrorKind::Connect, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(NetErrorKind::InvalidInput, msg)
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[net {:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for NetError {}

// ─── Resolver ───────────────────────────────────────────────────────────────

/// Resolve `host` into every candidate address for `port`.
///
/// The returned list is never empty: an empty lookup is reported as a
/// resolution error.
pub fn resolve(host: &str, port: u16) -> NetResult<Vec<ResolvedAddress>> {
    let host = host.trim();
    if host.is_empty() {
        return Err(NetError::invalid_input("hostname is empty"));
    }

    let t = Instant::now();
    let addrs: Vec<ResolvedAddress> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetError::resolution(format!("DNS lookup for {host} failed: {e}")))?
        .map(ResolvedAddress::new)
        .collect();

    if addrs.is_empty() {
        return Err(NetError::resolution(format!(
            "DNS returned no addresses for {host}"
        )));
    }

    debug!(
        host,
        count = addrs.len(),
        elapsed_ms = t.elapsed().as_millis() as u64,
        "resolved host"
    );
    Ok(addrs)
}

// ─── Connector ──────────────────────────────────────────────────────────────

/// Try each candidate in order, returning the first connected socket.
///
/// Each attempt is bounded by `timeout`. The error, if every attempt fails,
/// lists the failure of each candidate.
pub fn connect_first(
    candidates: &[ResolvedAddress],
    timeout: Duration,
) -> NetResult<(TcpStream, ResolvedAddress)> {
    if candidates.is_empty() {
        return Err(NetError::invalid_input("no candidate addresses to connect to"));
    }
    if timeout.is_zero() {
        return Err(NetError::invalid_input("connect timeout must be non-zero"));
    }

    let mut failures = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let t = Instant::now();
        match TcpStream::connect_timeout(&candidate.addr, timeout) {
            Ok(stream) => {
                stream.set_nonblocking(false).map_err(|e| {
                    NetError::connect(format!("failed to set blocking mode on {candidate}: {e}"))
                })?;
                info!(
                    addr = %candidate,
                    elapsed_ms = t.elapsed().as_millis() as u64,
                    "tcp connected"
                );
                return Ok((stream, *candidate));
            }
            Err(e) => {
                debug!(addr = %candidate, error = %e, "tcp connect attempt failed");
                failures.push(format!("{candidate}: {e}"));
            }
        }
    }

    Err(NetError::connect(format!(
        "could not connect to any of {} address(es): {}",
        candidates.len(),
        failures.join("; ")
    )))
}

/// Resolve `host` and connect to the first reachable address.
pub fn connect_host(
    host: &str,
    port: u16,
    timeout: Duration,
) -> NetResult<(TcpStream, ResolvedAddress)> {
    let candidates = resolve(host, port)?;
    connect_first(&candidates, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> ResolvedAddress {
        ResolvedAddress::new("127.0.0.1:1".parse().unwrap())
    }

    #[test]
    fn resolve_localhost_returns_candidates() {
        let addrs = resolve("localhost", DEFAULT_SSH_PORT).unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.addr.port() == DEFAULT_SSH_PORT));
    }

    #[test]
    fn resolve_ip_literal_tags_family() {
        let v4 = resolve("127.0.0.1", 22).unwrap();
        assert_eq!(v4.len(), 1);
        assert_eq!(v4[0].family, AddressFamily::Ipv4);

        let v6 = resolve("::1", 22).unwrap();
        assert_eq!(v6[0].family, AddressFamily::Ipv6);
    }

    #[test]
    fn resolve_unknown_host_fails() {
        let err = resolve("this.host.does.not.exist.invalid", 22).unwrap_err();
        assert_eq!(err.kind, NetErrorKind::Resolution);
    }

    #[test]
    fn resolve_empty_host_is_invalid() {
        let err = resolve("   ", 22).unwrap_err();
        assert_eq!(err.kind, NetErrorKind::InvalidInput);
    }

    #[test]
    fn connect_first_uses_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = ResolvedAddress::new(listener.local_addr().unwrap());
        let (_stream, used) = connect_first(&[target], Duration::from_secs(2)).unwrap();
        assert_eq!(used, target);
    }

    #[test]
    fn connect_first_skips_failing_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = ResolvedAddress::new(listener.local_addr().unwrap());
        let (_stream, used) =
            connect_first(&[closed_port(), good], Duration::from_secs(2)).unwrap();
        assert_eq!(used, good);
    }

    #[test]
    fn connect_first_reports_every_failure() {
        let err = connect_first(&[closed_port(), closed_port()], Duration::from_millis(500))
            .unwrap_err();
        assert_eq!(err.kind, NetErrorKind::Connect);
        assert!(err.message.contains("2 address(es)"));
    }

    #[test]
    fn connect_first_rejects_empty_and_zero_timeout() {
        assert_eq!(
            connect_first(&[], Duration::from_secs(1)).unwrap_err().kind,
            NetErrorKind::InvalidInput
        );
        assert_eq!(
            connect_first(&[closed_port()], Duration::ZERO).unwrap_err().kind,
            NetErrorKind::InvalidInput
        );
    }

    #[test]
    fn net_error_display_includes_kind() {
        let e = NetError::connect("refused");
        assert_eq!(e.to_string(), "[net Connect] refused");
    }
}
