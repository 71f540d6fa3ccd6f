//! Server-side per-session sink: one async task per accepted WRQ, running
//! the receive/ACK lockstep against the peer on its own handed-off socket
//! until a short final DATA, a protocol error, or a fatal I/O error closes
//! it.
//!
//! The session table degenerates to this single in-scope [`Session`] value
//! per task — one task owns exactly one session, so there's nothing left to
//! index by TID.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::codec::{self, BLOCK_SIZE, ErrorCode, MAX_PACKET, Packet};
use crate::error::TftpError;

const TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 10;

/// In-progress state for one accepted WRQ. Mutated only by the task that
/// owns it — exactly-one-writer is structural, not enforced by a lock.
struct Session {
    last_acked: u16,
    total_written: u64,
}

/// Drive one upload session to completion, logging the outcome. Errors are
/// terminal for this session only; they never propagate to the accept loop
/// or to sibling sessions.
pub async fn run(
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    v6only: bool,
    filename: String,
    mode: String,
    dir: Arc<PathBuf>,
) {
    match run_inner(peer, local, v6only, &filename, &mode, &dir).await {
        Ok(bytes) => {
            tracing::info!(session = id, %peer, filename, bytes, "upload complete");
        }
        Err(e) => {
            tracing::error!(session = id, %peer, filename, error = %e, "upload failed");
        }
    }
}

async fn run_inner(
    peer: SocketAddr,
    local: SocketAddr,
    v6only: bool,
    filename: &str,
    _mode: &str,
    dir: &Path,
) -> Result<u64, TftpError> {
    let sock = bind_handoff_socket(local, peer, v6only).await?;

    let path = match sanitize_path(dir, filename) {
        Ok(path) => path,
        Err(reason) => {
            send_error(&sock, ErrorCode::AccessViolation as u16, reason).await;
            return Err(TftpError::Protocol(format!(
                "rejected filename {filename:?}: {reason}"
            )));
        }
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = match tokio::fs::File::create(&path).await {
        Ok(f) => f,
        Err(e) => {
            send_error(&sock, ErrorCode::DiskFull as u16, &e.to_string()).await;
            return Err(e.into());
        }
    };

    let mut session = Session {
        last_acked: 0,
        total_written: 0,
    };

    send_ack(&sock, 0).await?;

    let mut recv_buf = [0u8; MAX_PACKET];
    loop {
        let (block, payload_len, data_owned) =
            match recv_next_block(&sock, &mut recv_buf, &mut session).await {
                Ok(Some(data)) => data,
                Ok(None) => continue, // duplicate of the previous block, already re-ACKed
                Err(e) => return Err(e),
            };

        if let Err(e) = file.write_all(&data_owned[..payload_len]).await {
            send_error(&sock, ErrorCode::DiskFull as u16, &e.to_string()).await;
            return Err(e.into());
        }

        session.last_acked = block;
        session.total_written += payload_len as u64;
        send_ack(&sock, block).await?;

        if payload_len < BLOCK_SIZE {
            file.flush().await?;
            return Ok(session.total_written);
        }
    }
}

/// Wait for the next in-sequence DATA block, handling retransmitted ACKs,
/// timeouts, and duplicate blocks. Returns `Ok(None)` when a duplicate of
/// the last-acked block was seen and already re-ACKed (caller should just
/// loop again).
async fn recv_next_block(
    sock: &UdpSocket,
    recv_buf: &mut [u8; MAX_PACKET],
    session: &mut Session,
) -> Result<Option<(u16, usize, Vec<u8>)>, TftpError> {
    let expected = session.last_acked.wrapping_add(1);
    let mut retries = 0u32;

    loop {
        match timeout(TIMEOUT, sock.recv(recv_buf)).await {
            Ok(Ok(n)) => match codec::decode(&recv_buf[..n]) {
                Ok(Packet::DATA { block, payload }) if block == expected => {
                    return Ok(Some((block, payload.len(), payload.to_vec())));
                }
                Ok(Packet::DATA { block, .. }) if block == session.last_acked => {
                    // Retransmit of the block we already wrote and ACKed.
                    send_ack(sock, block).await?;
                    return Ok(None);
                }
                Ok(Packet::DATA { block, .. }) => {
                    let msg = format!("block {block} out of sequence, expected {expected}");
                    send_error(sock, ErrorCode::IllegalOperation as u16, &msg).await;
                    return Err(TftpError::Protocol(msg));
                }
                Ok(Packet::ERROR { code, message }) => {
                    return Err(TftpError::PeerError {
                        code,
                        message: message.to_string(),
                    });
                }
                Ok(_) => continue, // unrelated opcode on our connected socket
                Err(e) => {
                    let msg = format!("malformed packet from peer: {e}");
                    send_error(sock, ErrorCode::IllegalOperation as u16, &msg).await;
                    return Err(TftpError::Protocol(msg));
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(TftpError::RetriesExhausted(MAX_RETRIES, expected));
                }
                send_ack(sock, session.last_acked).await?;
            }
        }
    }
}

async fn send_ack(sock: &UdpSocket, block: u16) -> Result<(), TftpError> {
    let mut buf = [0u8; 4];
    let n = codec::encode_ack(&mut buf, block);
    sock.send(&buf[..n]).await?;
    Ok(())
}

/// Best-effort ERROR send; the session is being torn down regardless of
/// whether this reaches the peer.
async fn send_error(sock: &UdpSocket, code: u16, message: &str) {
    let mut buf = [0u8; MAX_PACKET];
    if let Ok(n) = codec::encode_error(&mut buf, code, message) {
        let _ = sock.send(&buf[..n]).await;
    }
}

/// Bind a fresh UDP socket to the same local endpoint the listen socket is
/// bound to (`SO_REUSEADDR` makes sharing the port legal) and `connect` it
/// to `peer`, pinning the session's 5-tuple.
async fn bind_handoff_socket(
    local: SocketAddr,
    peer: SocketAddr,
    v6only: bool,
) -> Result<UdpSocket, TftpError> {
    let raw = Socket::new(Domain::IPV6, Type::DGRAM, Some(SockProtocol::UDP))?;
    raw.set_reuse_address(true)?;
    raw.set_only_v6(v6only)?;
    raw.set_nonblocking(true)?;
    raw.bind(&local.into())?;

    let std_sock: std::net::UdpSocket = raw.into();
    let sock = UdpSocket::from_std(std_sock)?;
    sock.connect(peer).await?;
    Ok(sock)
}

/// Ensure the advertised filename stays inside `dir`. Rejects absolute
/// paths and any `..` component, normalizes `\` to `/`, and canonicalizes
/// the deepest existing ancestor to verify containment.
pub(crate) fn sanitize_path(dir: &Path, filename: &str) -> Result<PathBuf, &'static str> {
    let normalized = filename.replace('\\', "/");

    if normalized.starts_with('/') {
        return Err("absolute paths are not allowed");
    }
    for component in normalized.split('/') {
        if component == ".." {
            return Err("path traversal is not allowed");
        }
    }

    let clean: PathBuf = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if clean.as_os_str().is_empty() {
        return Err("invalid filename");
    }

    let candidate = dir.join(&clean);
    let canonical_dir = dir.canonicalize().map_err(|_| "cannot canonicalize served directory")?;

    if candidate.exists() {
        let canonical = candidate.canonicalize().map_err(|_| "cannot canonicalize path")?;
        if !canonical.starts_with(&canonical_dir) {
            return Err("path escapes served directory");
        }
        Ok(canonical)
    } else {
        let mut ancestor = candidate.parent();
        while let Some(a) = ancestor {
            if a.exists() {
                let canonical_ancestor = a.canonicalize().map_err(|_| "cannot canonicalize ancestor")?;
                if !canonical_ancestor.starts_with(&canonical_dir) {
                    return Err("path escapes served directory");
                }
                return Ok(candidate);
            }
            ancestor = a.parent();
        }
        Err("path escapes served directory")
    }
}
