use thiserror::Error;

/// Errors raised while encoding or decoding a TFTP packet.
///
/// The codec's contract is exactly two-armed per packet: a caller gets a
/// size/packet back, or one of these. No partial state escapes a failed
/// encode or decode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The destination buffer was too small to hold the encoded packet.
    #[error("packet does not fit in the destination buffer")]
    Oversize,

    /// The input bytes could not be parsed as a well-formed TFTP packet.
    #[error("malformed packet: {reason}")]
    Malformed { reason: &'static str },
}

/// Errors surfaced by the transfer state machines (client and server).
#[derive(Debug, Error)]
pub enum TftpError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The peer did something the lockstep protocol doesn't allow:
    /// an out-of-range ACK, an unexpected opcode, a block gap.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer sent an ERROR packet and the session is being aborted.
    #[error("peer reported error {code}: {message}")]
    PeerError { code: u16, message: String },

    /// Hostname/service resolution failed in a way that isn't retryable.
    #[error("resolve failed: {0}")]
    Resolve(String),

    /// No response after exhausting the retransmission budget.
    #[error("timed out after {0} retries waiting for block {1}")]
    RetriesExhausted(u32, u16),
}
