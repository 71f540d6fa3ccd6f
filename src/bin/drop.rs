//! `drop`: upload one or more files to a TFTP daemon over WRQ.
//!
//! Config-file layering re-parses the same `Cli` struct against
//! config-file-derived argv fragments so every flag stays defined in one
//! place, with real argv always taking precedence.

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use drop_tftp::client::supervisor::{self, WorkerProgress};
use drop_tftp::config;

/// Send one or more files to a TFTP server via WRQ.
#[derive(Parser, Debug, Clone)]
#[command(name = "drop", version, about)]
struct Cli {
    /// Destination host (hostname or address).
    host: String,

    /// Files to upload. Use `-` to read standard input.
    #[arg(required = true)]
    file: Vec<String>,

    /// Destination UDP port.
    #[arg(short = 'p', long, default_value_t = 69)]
    port: u16,

    /// Restrict resolution/sockets to native IPv6 (no IPv4-mapped addresses).
    #[arg(long)]
    v6only: bool,

    /// Increase log verbosity (debug level).
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Skip reading the user config file.
    #[arg(long)]
    no_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut raw_args: Vec<String> = std::env::args().collect();

    let no_config = raw_args.iter().any(|a| a == "--no-config");
    if !no_config {
        if let Some(path) = config::config_file_path("drop.conf") {
            match config::read_config_args(&path) {
                Ok(mut file_args) if !file_args.is_empty() => {
                    let mut merged = vec![raw_args.remove(0)];
                    merged.append(&mut file_args);
                    merged.extend(raw_args);
                    raw_args = merged;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("warning: failed to read {}: {e}", path.display());
                }
            }
        }
    }

    let cli = Cli::parse_from(raw_args);

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerProgress>();
    let progress_task = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            tracing::debug!(
                file = %progress.file_label,
                block = progress.block,
                sent = progress.total_sent,
                "block acked"
            );
        }
    });

    let outcomes = supervisor::upload_all(
        Some(cli.host.clone()),
        cli.port,
        cli.v6only,
        cli.file.clone(),
        tx,
    )
    .await;
    let _ = progress_task.await;

    let mut any_failed = false;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(bytes) => {
                println!("{}: sent {bytes} bytes", outcome.file_label);
            }
            Err(e) => {
                any_failed = true;
                eprintln!("{}: {e}", outcome.file_label);
            }
        }
    }

    if any_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
