//! Client fan-out: one worker task per file, a progress channel from each
//! worker back to the supervisor, and aggregation of completion in whatever
//! order the workers finish.
//!
//! Workers are `tokio::task`s rather than forked processes: each worker owns
//! its own `UdpSocket` and file handle, and shares no mutable state with its
//! siblings. `JoinSet` demultiplexes completions without imposing an order,
//! the task-runtime equivalent of a `waitpid(-1, ...)` reap loop.

use std::net::SocketAddr;
use std::path::Path;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::TftpError;
use crate::resolve::{self, ResolveOptions};

use super::upload;

/// A progress record a worker reports back to the supervisor. The advertised
/// filename ("stdin" for `-`) identifies which file the progress belongs to.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    pub file_label: String,
    pub block: u16,
    pub total_sent: u64,
}

/// Outcome of one file's upload worker.
pub struct UploadOutcome {
    pub file_label: String,
    pub result: Result<u64, TftpError>,
}

/// Upload every path in `files` to `host:port`. `"-"` reads standard input
/// and is advertised to the peer as `"stdin"`. Returns one [`UploadOutcome`]
/// per file, in the arbitrary order workers complete in — callers that need
/// per-file exit semantics (the `drop` binary) should match outcomes back up
/// by `file_label`.
pub async fn upload_all(
    host: Option<String>,
    port: u16,
    v6only: bool,
    files: Vec<String>,
    progress_tx: mpsc::UnboundedSender<WorkerProgress>,
) -> Vec<UploadOutcome> {
    let mut workers = JoinSet::new();

    for file in files {
        let host = host.clone();
        let tx = progress_tx.clone();
        workers.spawn(async move {
            let label = advertised_name(&file);
            let result = upload_one(host.as_deref(), port, v6only, &file, &label, &tx).await;
            UploadOutcome {
                file_label: label,
                result,
            }
        });
    }
    drop(progress_tx);

    let mut outcomes = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => outcomes.push(UploadOutcome {
                file_label: "<unknown>".to_string(),
                result: Err(TftpError::Protocol(format!(
                    "worker task did not complete cleanly: {join_err}"
                ))),
            }),
        }
    }
    outcomes
}

fn advertised_name(file: &str) -> String {
    if file == "-" {
        "stdin".to_string()
    } else {
        Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string())
    }
}

async fn upload_one(
    host: Option<&str>,
    port: u16,
    v6only: bool,
    file: &str,
    label: &str,
    tx: &mpsc::UnboundedSender<WorkerProgress>,
) -> Result<u64, TftpError> {
    let dest = resolve::resolve(
        host,
        port,
        ResolveOptions {
            passive: false,
            v6only,
        },
    )
    .await?;
    let sock = connect_to(dest, v6only).await?;

    let on_progress = |block: u16, total_sent: u64| {
        let _ = tx.send(WorkerProgress {
            file_label: label.to_string(),
            block,
            total_sent,
        });
    };

    if file == "-" {
        let stdin = tokio::io::stdin();
        upload(&sock, stdin, label, "octet", on_progress).await
    } else {
        let f = tokio::fs::File::open(file).await?;
        upload(&sock, f, label, "octet", on_progress).await
    }
}

/// Build a UDP socket bound to an OS-assigned ephemeral local port and
/// `connect`ed to `dest`, mirroring the original client's `socket()` +
/// `setsockopt(IPV6_V6ONLY)` + `connect()` sequence.
async fn connect_to(dest: SocketAddr, v6only: bool) -> Result<UdpSocket, TftpError> {
    let raw = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    raw.set_only_v6(v6only)?;
    raw.set_nonblocking(true)?;
    raw.bind(&"[::]:0".parse::<SocketAddr>().unwrap().into())?;

    let std_sock: std::net::UdpSocket = raw.into();
    let sock = UdpSocket::from_std(std_sock)?;
    sock.connect(dest).await?;
    Ok(sock)
}
