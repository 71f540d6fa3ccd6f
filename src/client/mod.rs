//! Client upload state machine: WRQ → ACK(0) → DATA/ACK lockstep →
//! termination on a short block. One instance of `upload` drives exactly
//! one file over one already-connected socket; the fan-out across files
//! lives in [`supervisor`].

pub mod supervisor;

use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::codec::{self, BLOCK_SIZE, MAX_PACKET, Packet};
use crate::error::TftpError;

/// Per-wait budget for an ACK before retransmitting.
const TIMEOUT: Duration = Duration::from_secs(5);

/// Retransmission ceiling per block before a stalled transfer is given up on
/// (see DESIGN.md for the reasoning behind this value).
const MAX_RETRIES: u32 = 10;

/// Upload `reader`'s contents to `sock`'s connected peer as `filename`,
/// advertising `mode` (label only — no netascii translation is performed
/// regardless of the mode string).
///
/// `on_progress` is called after every ACKed block with `(block, total_sent)`.
/// Returns the total number of bytes sent.
pub async fn upload<R>(
    sock: &UdpSocket,
    mut reader: R,
    filename: &str,
    mode: &str,
    mut on_progress: impl FnMut(u16, u64),
) -> Result<u64, TftpError>
where
    R: AsyncRead + Unpin,
{
    let mut out = [0u8; MAX_PACKET];
    let mut recv_buf = [0u8; MAX_PACKET];
    let mut payload = [0u8; BLOCK_SIZE];

    // INIT --send WRQ--> AWAIT_ACK(0)
    let n = codec::encode_wrq(&mut out, filename, mode)?;
    send_and_await_ack(sock, &out[..n], 0, &mut recv_buf).await?;

    let mut block: u16 = 1;
    let mut total_sent: u64 = 0;

    loop {
        let read = read_full(&mut reader, &mut payload).await?;

        let n = codec::encode_data(&mut out, block, &payload[..read])?;
        send_and_await_ack(sock, &out[..n], block, &mut recv_buf).await?;

        total_sent += read as u64;
        on_progress(block, total_sent);

        // A block shorter than BLOCK_SIZE (including empty) signals the end
        // of the transfer. A file whose length is an exact multiple of
        // BLOCK_SIZE sends one further zero-byte DATA to terminate.
        if read < BLOCK_SIZE {
            break;
        }
        block = block.wrapping_add(1);
    }

    Ok(total_sent)
}

/// Read up to `buf.len()` bytes, looping on short reads until EOF or the
/// buffer fills. Unlike a single `read`, this never returns early just
/// because one syscall filled less than requested.
async fn read_full(reader: &mut (impl AsyncRead + Unpin), buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Send `packet` and drive the AWAIT_ACK(expected)/SEND_DATA retransmit loop
/// until an ACK for `expected` arrives, a peer ERROR arrives, the peer ACKs
/// a block ahead of `expected` (protocol violation), or retries are
/// exhausted.
async fn send_and_await_ack(
    sock: &UdpSocket,
    packet: &[u8],
    expected: u16,
    recv_buf: &mut [u8],
) -> Result<(), TftpError> {
    let mut retries = 0u32;
    loop {
        sock.send(packet).await?;

        loop {
            match timeout(TIMEOUT, sock.recv(recv_buf)).await {
                Ok(Ok(n)) => match codec::decode(&recv_buf[..n]) {
                    Ok(Packet::ACK { block }) if block == expected => return Ok(()),
                    // Duplicate ACK for a stale block (commonly b-1, after
                    // the peer retransmits its previous ACK): a retransmit
                    // trigger, not an error.
                    Ok(Packet::ACK { block }) if block < expected => break,
                    Ok(Packet::ACK { block }) => {
                        return Err(TftpError::Protocol(format!(
                            "peer ACKed block {block} ahead of expected block {expected}"
                        )));
                    }
                    Ok(Packet::ERROR { code, message }) => {
                        return Err(TftpError::PeerError {
                            code,
                            message: message.to_string(),
                        });
                    }
                    Ok(_) => continue, // unrelated opcode on our connected socket; keep waiting
                    Err(e) => {
                        return Err(TftpError::Protocol(format!("malformed reply from peer: {e}")));
                    }
                },
                Ok(Err(e)) => return Err(TftpError::Io(e)),
                Err(_elapsed) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(TftpError::RetriesExhausted(MAX_RETRIES, expected));
                    }
                    break; // resend the outer packet
                }
            }
        }
    }
}
