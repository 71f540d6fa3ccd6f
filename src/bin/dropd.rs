//! `dropd`: accept TFTP WRQ uploads into a served directory.
//!
//! Binds `[bind[:port]]` (default any address, port 69), installs a
//! Ctrl-C-triggered shutdown via a `tokio::sync::watch` channel (the async
//! analogue of the original's `SIGINT`/`SIGTERM` handler), and runs the
//! accept loop until it completes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use drop_tftp::config;
use drop_tftp::resolve::{self, ResolveOptions};

/// Serve TFTP uploads (WRQ only) into a directory.
#[derive(Parser, Debug, Clone)]
#[command(name = "dropd", version, about)]
struct Cli {
    /// Address (and optional `:port`) to listen on. Defaults to `[::]:69`.
    bind: Option<String>,

    /// Directory to write uploaded files into.
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,

    /// Restrict the listen socket to native IPv6 (no IPv4-mapped addresses).
    #[arg(long)]
    v6only: bool,

    /// Increase log verbosity (debug level).
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Skip reading the daemon config file.
    #[arg(long)]
    no_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dropd: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// The fallible body of `main`, split out so every structural startup
/// failure (a bad bind argument, resolver failure, or socket bind failure —
/// errors that should terminate the process rather than one session) flows
/// through one `anyhow::Result` with added context, rather than matching on
/// each failure individually.
async fn run() -> Result<()> {
    let mut raw_args: Vec<String> = std::env::args().collect();

    let no_config = raw_args.iter().any(|a| a == "--no-config");
    if !no_config {
        if let Some(path) = config::config_file_path("dropd.conf") {
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

    let (host, port) = parse_bind(cli.bind.as_deref())
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let bind_addr: SocketAddr = resolve::resolve(
        host.as_deref(),
        port,
        ResolveOptions {
            passive: true,
            v6only: cli.v6only,
        },
    )
    .await
    .context("failed to resolve bind address")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    drop_tftp::server::run(bind_addr, cli.v6only, cli.dir, shutdown_rx)
        .await
        .context("dropd accept loop failed")
}

/// Split an optional `[host][:port]` argument into its parts. A bare `:1234`
/// or no argument at all means "any address"; a bare host with no `:port`
/// keeps the default TFTP port 69.
fn parse_bind(bind: Option<&str>) -> Result<(Option<String>, u16), String> {
    const DEFAULT_PORT: u16 = 69;

    let Some(spec) = bind else {
        return Ok((None, DEFAULT_PORT));
    };

    match spec.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| format!("invalid port {port_str:?}"))?;
            let host = if host.is_empty() { None } else { Some(host.to_string()) };
            Ok((host, port))
        }
        None => Ok((Some(spec.to_string()), DEFAULT_PORT)),
    }
}
