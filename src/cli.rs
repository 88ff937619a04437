//! Command-line argument parsing.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use skiff_core::DEFAULT_SSH_PORT;

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;

/// skiff - minimal password-authenticated SFTP client.
#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    version,
    about = "skiff - minimal password-authenticated SFTP client",
    after_help = "The password can be supplied through SKIFF_PASSWORD instead of the config file.\n\
                  Set RUST_LOG to adjust log verbosity (default: info)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check name resolution, TCP reachability and the SSH banner of a server
    Probe(ProbeArgs),
    /// Download a remote file and verify its digest before promoting it
    Download(DownloadArgs),
    /// Upload a local file into a remote directory, creating it as needed
    Upload(UploadArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Server host name or address
    pub host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_SSH_PORT)]
    pub port: u16,

    /// Per-step timeout in milliseconds
    #[arg(
        long = "timeout-ms",
        value_name = "MS",
        value_parser = parse_timeout_ms,
        default_value_t = DEFAULT_PROBE_TIMEOUT_MS
    )]
    pub timeout_ms: u64,
}

impl ProbeArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// JSON client configuration
    #[arg(value_name = "CONFIG")]
    pub config: String,

    /// Absolute path of the remote file
    pub remote_path: String,

    /// Expected hex digest of the file contents
    #[arg(value_parser = parse_digest)]
    pub expected_digest: String,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// JSON client configuration
    #[arg(value_name = "CONFIG")]
    pub config: String,

    /// Local file to send
    pub local_file: String,

    /// Remote directory to place the file in
    pub remote_dir: String,

    /// Remote file name (defaults to the local file name)
    pub remote_name: Option<String>,
}

fn parse_timeout_ms(s: &str) -> Result<u64, String> {
    let ms: u64 = s.parse().map_err(|e| format!("invalid timeout: {}", e))?;
    if ms == 0 {
        return Err("timeout must be greater than 0".to_string());
    }
    Ok(ms)
}

fn parse_digest(s: &str) -> Result<String, String> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("digest must be a hex string".to_string());
    }
    Ok(s.to_ascii_lowercase())
}
