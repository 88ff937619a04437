//! Connection probe for an SSH endpoint.
//!
//! Walks the same path a transfer takes before the handshake (DNS, TCP,
//! server identification banner) and records each stage as a timed
//! [`DiagnosticStep`]. Nothing here authenticates.

use crate::net::{connect_first, resolve, ResolvedAddress};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

/// Result of a single probe stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

/// Full probe report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub resolved_addresses: Vec<String>,
    pub connected_address: Option<String>,
    pub server_banner: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    pub total_duration_ms: u64,
}

impl DiagnosticReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.status != StepStatus::Fail)
    }
}

fn step(
    name: &str,
    status: StepStatus,
    message: impl Into<String>,
    started: Instant,
    detail: Option<String>,
) -> DiagnosticStep {
    DiagnosticStep {
        name: name.into(),
        status,
        message: message.into(),
        duration_ms: started.elapsed().as_millis() as u64,
        detail,
    }
}

// ─── Probe ──────────────────────────────────────────────────────────────────

/// Probe `host:port` for a reachable SSH server.
///
/// `timeout` bounds each TCP attempt and the banner read.
pub fn probe(host: &str, port: u16, timeout: Duration) -> DiagnosticReport {
    let start = Instant::now();
    let mut steps = Vec::new();
    let mut resolved_addresses = Vec::new();
    let mut connected_address = None;
    let mut server_banner = None;

    let t = Instant::now();
    let candidates: Option<Vec<ResolvedAddress>> = match resolve(host, port) {
        Ok(addrs) => {
            resolved_addresses = addrs.iter().map(|a| a.addr.ip().to_string()).collect();
            steps.push(step(
                "DNS Resolution",
                StepStatus::Pass,
                format!(
                    "{host} → {} ({} address{})",
                    resolved_addresses[0],
                    addrs.len(),
                    if addrs.len() > 1 { "es" } else { "" }
                ),
                t,
                (addrs.len() > 1)
                    .then(|| format!("All resolved addresses: {}", resolved_addresses.join(", "))),
            ));
            Some(addrs)
        }
        Err(e) => {
            steps.push(step(
                "DNS Resolution",
                StepStatus::Fail,
                e.message,
                t,
                Some("Check hostname spelling, DNS server, and network connectivity".into()),
            ));
            None
        }
    };

    if let Some(candidates) = candidates {
        let t = Instant::now();
        match connect_first(&candidates, timeout) {
            Ok((stream, used)) => {
                connected_address = Some(used.to_string());
                steps.push(step(
                    "TCP Connect",
                    StepStatus::Pass,
                    format!("Connected to {used} in {}ms", t.elapsed().as_millis()),
                    t,
                    None,
                ));
                let (banner_step, banner) = read_banner(&stream, timeout);
                steps.push(banner_step);
                server_banner = banner;
            }
            Err(e) => {
                steps.push(step(
                    "TCP Connect",
                    StepStatus::Fail,
                    e.message,
                    t,
                    Some("Check firewall rules and that sshd is listening on this port".into()),
                ));
            }
        }
    }

    let summary = match steps.iter().find(|s| s.status == StepStatus::Fail) {
        Some(fail) => format!("Probe stopped at {}: {}", fail.name, fail.message),
        None if steps.iter().any(|s| s.status == StepStatus::Warn) => {
            "Host reachable but the banner did not look like SSH.".into()
        }
        None => "SSH server reachable.".into(),
    };

    DiagnosticReport {
        host: host.to_string(),
        port,
        resolved_addresses,
        connected_address,
        server_banner,
        steps,
        summary,
        total_duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Read the server identification line sent right after connect.
fn read_banner(stream: &TcpStream, timeout: Duration) -> (DiagnosticStep, Option<String>) {
    let _ = stream.set_read_timeout(Some(timeout));
    let t = Instant::now();
    let mut buf = [0u8; 256];
    match Read::read(&mut &*stream, &mut buf) {
        Ok(0) => (
            step(
                "SSH Banner",
                StepStatus::Fail,
                "Server closed the connection without identifying itself",
                t,
                None,
            ),
            None,
        ),
        Ok(n) => {
            let banner = String::from_utf8_lossy(&buf[..n])
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            let status = if banner.starts_with("SSH-") {
                StepStatus::Pass
            } else {
                StepStatus::Warn
            };
            (
                step("SSH Banner", status, format!("Banner: {banner}"), t, None),
                Some(banner),
            )
        }
        Err(e) => (
            step(
                "SSH Banner",
                StepStatus::Fail,
                format!("Banner read error: {e}"),
                t,
                None,
            ),
            None,
        ),
    }
}
