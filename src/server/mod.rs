//! Daemon accept loop: one listen socket receives WRQs, each accepted WRQ
//! hands off to a fresh socket bound to the listener's own local port and
//! connected to the peer, and a [`session`] task drives the transfer to
//! completion on that handoff socket.
//!
//! Handing a new session off to the *same* local port the listener is bound
//! to (rather than an OS-assigned ephemeral one) needs
//! [`pktinfo::recv_with_pktinfo`] to learn which local address the listener
//! itself should be treated as bound to for a given datagram.

pub mod pktinfo;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::codec::{self, MAX_PACKET, Packet};
use crate::error::TftpError;

/// Run the accept loop on `bind_addr`, serving uploads into `serve_dir`,
/// until `shutdown` is signalled. Each accepted WRQ spawns its own
/// [`session::run`] task; malformed datagrams and non-WRQ opcodes are
/// silently dropped, matching RFC 1350's "ignore it" guidance for unopened
/// transfer IDs.
pub async fn run(
    bind_addr: SocketAddr,
    v6only: bool,
    serve_dir: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TftpError> {
    let serve_dir = Arc::new(serve_dir);
    let listener = bind_listener(bind_addr, v6only)?;
    tracing::info!(%bind_addr, dir = %serve_dir.display(), "dropd listening");

    let next_id = AtomicU64::new(1);
    let mut buf = [0u8; MAX_PACKET];

    loop {
        let (n, peer, local) = tokio::select! {
            result = pktinfo::recv_with_pktinfo(&listener, &mut buf) => result?,
            _ = shutdown.changed() => {
                tracing::info!("shutdown signal received, accept loop exiting");
                return Ok(());
            }
        };

        match codec::decode(&buf[..n]) {
            Ok(Packet::WRQ { filename, mode }) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let filename = filename.to_string();
                let mode = mode.to_string();
                let dir = Arc::clone(&serve_dir);
                tracing::debug!(session = id, %peer, filename, "accepted WRQ");
                tokio::spawn(async move {
                    session::run(id, peer, local, v6only, filename, mode, dir).await;
                });
            }
            Ok(Packet::RRQ { filename, .. }) => {
                tracing::debug!(%peer, filename, "dropping RRQ: read requests are not served");
            }
            Ok(other) => {
                tracing::debug!(%peer, opcode = other.opcode(), "ignoring unexpected opcode on listen socket");
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "dropping malformed datagram");
            }
        }
    }
}

/// Build and bind the long-lived listen socket: IPv6, optionally dual-stack,
/// `SO_REUSEADDR` set so handoff sockets can rebind the same port, and
/// `IPV6_RECVPKTINFO` enabled so the accept loop can recover each datagram's
/// destination address for the handoff.
fn bind_listener(bind_addr: SocketAddr, v6only: bool) -> Result<UdpSocket, TftpError> {
    let raw = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    raw.set_only_v6(v6only)?;
    raw.set_reuse_address(true)?;
    raw.set_nonblocking(true)?;
    pktinfo::enable_recv_pktinfo(&raw)?;
    raw.bind(&bind_addr.into())?;

    let std_sock: std::net::UdpSocket = raw.into();
    Ok(UdpSocket::from_std(std_sock)?)
}
