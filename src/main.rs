//! skiff command-line entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use skiff_sftp::{
    cancel_transfer, DownloadRequest, SftpClient, SftpClientConfig, SftpError, TransferCallbacks,
    TransferReport, UploadRequest,
};
use std::process::ExitCode;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    #[cfg(feature = "logs-json")]
    builder.json().init();
    #[cfg(not(feature = "logs-json"))]
    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "skiff failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Probe(args) => {
            let timeout = args.timeout();
            let report = tokio::task::spawn_blocking(move || {
                skiff_core::probe(&args.host, args.port, timeout)
            })
            .await
            .map_err(|e| format!("probe task failed: {}", e))?;
            let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            println!("{}", json);
            if report.passed() {
                Ok(())
            } else {
                Err(report.summary)
            }
        }
        Command::Download(args) => {
            let client = client_from(&args.config)?;
            let request = DownloadRequest {
                remote_path: args.remote_path,
                expected_digest: args.expected_digest,
            };
            let (callbacks, outcome) = reporting_callbacks();
            let (id, handle) = client.spawn_download(request, callbacks);
            let report = wait_for(id, handle, outcome).await?;
            println!(
                "downloaded {} bytes to {}",
                report.bytes_transferred,
                report.local_path.unwrap_or_default()
            );
            Ok(())
        }
        Command::Upload(args) => {
            let client = client_from(&args.config)?;
            let request =
                UploadRequest::from_file(&args.local_file, args.remote_dir, args.remote_name)
                    .map_err(|e| e.to_string())?;
            let (callbacks, outcome) = reporting_callbacks();
            let (id, handle) = client.spawn_upload(request, callbacks);
            let report = wait_for(id, handle, outcome).await?;
            println!(
                "uploaded {} bytes to {}",
                report.bytes_transferred, report.remote_path
            );
            Ok(())
        }
    }
}

fn client_from(path: &str) -> Result<SftpClient, String> {
    let config = SftpClientConfig::load(path).map_err(|e| e.to_string())?;
    info!(path, port = config.port, "configuration loaded");
    SftpClient::new(config).map_err(|e| e.to_string())
}

type Outcome = oneshot::Receiver<Result<TransferReport, SftpError>>;

/// Callbacks that log progress in 10% steps and forward the terminal result.
fn reporting_callbacks() -> (TransferCallbacks, Outcome) {
    let (tx, rx) = oneshot::channel();
    let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));
    let tx_fail = tx.clone();
    let mut last_step = None;

    let callbacks = TransferCallbacks::new(
        move |report| {
            if let Some(tx) = tx.lock().ok().and_then(|mut t| t.take()) {
                let _ = tx.send(Ok(report));
            }
        },
        move |err| {
            if let Some(tx) = tx_fail.lock().ok().and_then(|mut t| t.take()) {
                let _ = tx.send(Err(err));
            }
        },
    )
    .with_progress(move |done, total| {
        let step = if total == 0 { 10 } else { done * 10 / total };
        if last_step != Some(step) {
            last_step = Some(step);
            info!(done, total, "{}%", step * 10);
        }
    });
    (callbacks, rx)
}

/// Wait for a spawned transfer, cancelling it on Ctrl-C.
async fn wait_for(
    id: String,
    handle: JoinHandle<()>,
    outcome: Outcome,
) -> Result<TransferReport, String> {
    let cancel_id = id.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(transfer_id = %cancel_id, "interrupted, cancelling transfer");
            let _ = cancel_transfer(&cancel_id);
        }
    });

    let joined = handle.await;
    interrupt.abort();
    joined.map_err(|e| format!("transfer {} panicked: {}", id, e))?;

    match outcome.await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(format!("{} ({})", e.reason(), e.message)),
        Err(_) => Err(format!("transfer {} ended without a result", id)),
    }
}
