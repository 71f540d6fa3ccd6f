//! TFTP wire codec (RFC 1350): five packet types, exact byte layout, a
//! reusable scratch buffer instead of per-packet heap allocation.
//!
//! `decode` borrows string fields from the input slice, so a decoded
//! `Packet` must not outlive the buffer it was decoded from.

use crate::error::CodecError;

/// Default (and, since option negotiation is out of scope, the only) DATA
/// payload size per RFC 1350.
pub const BLOCK_SIZE: usize = 512;

/// 4-byte header + 512-byte payload: the largest datagram this system ever
/// sends or expects to receive.
pub const MAX_PACKET: usize = 4 + BLOCK_SIZE;

const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

/// Wire values for the ERROR packet's `code` field (RFC 1350 §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

/// A fully parsed TFTP packet. String fields borrow from the buffer that was
/// decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Packet<'a> {
    RRQ { filename: &'a str, mode: &'a str },
    WRQ { filename: &'a str, mode: &'a str },
    DATA { block: u16, payload: &'a [u8] },
    ACK { block: u16 },
    ERROR { code: u16, message: &'a str },
}

impl<'a> Packet<'a> {
    pub fn opcode(&self) -> u16 {
        match self {
            Packet::RRQ { .. } => OPCODE_RRQ,
            Packet::WRQ { .. } => OPCODE_WRQ,
            Packet::DATA { .. } => OPCODE_DATA,
            Packet::ACK { .. } => OPCODE_ACK,
            Packet::ERROR { .. } => OPCODE_ERROR,
        }
    }
}

/// Split `buf` at the first NUL byte, returning the leading `str` slice (NUL
/// excluded) and the byte offset just past the NUL. `Malformed` if no NUL is
/// found (truncated string) or the leading bytes aren't valid UTF-8.
fn read_cstr(buf: &[u8]) -> Result<(&str, usize), CodecError> {
    let nul_at = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::Malformed {
            reason: "truncated string: no NUL terminator",
        })?;
    let s = std::str::from_utf8(&buf[..nul_at]).map_err(|_| CodecError::Malformed {
        reason: "string field is not valid UTF-8",
    })?;
    Ok((s, nul_at + 1))
}

fn write_cstr(buf: &mut [u8], offset: usize, s: &str) -> Result<usize, CodecError> {
    let needed = s.len() + 1;
    if buf.len() < offset + needed {
        return Err(CodecError::Oversize);
    }
    buf[offset..offset + s.len()].copy_from_slice(s.as_bytes());
    buf[offset + s.len()] = 0;
    Ok(offset + needed)
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<usize, CodecError> {
    if buf.len() < offset + 2 {
        return Err(CodecError::Oversize);
    }
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    Ok(offset + 2)
}

fn encode_request(buf: &mut [u8], opcode: u16, filename: &str, mode: &str) -> Result<usize, CodecError> {
    let n = write_u16(buf, 0, opcode)?;
    let n = write_cstr(buf, n, filename)?;
    let n = write_cstr(buf, n, mode)?;
    Ok(n)
}

/// Encode an RRQ packet. Kept for wire-format completeness alongside `decode`
/// (this system never issues a read request, but the data model and
/// round-trip property cover it).
pub fn encode_rrq(buf: &mut [u8], filename: &str, mode: &str) -> Result<usize, CodecError> {
    encode_request(buf, OPCODE_RRQ, filename, mode)
}

pub fn encode_wrq(buf: &mut [u8], filename: &str, mode: &str) -> Result<usize, CodecError> {
    encode_request(buf, OPCODE_WRQ, filename, mode)
}

/// Encode a DATA packet. `payload` must be at most [`BLOCK_SIZE`] bytes;
/// exceeding that is a caller bug, not a wire-level error, so it is checked
/// with a debug assertion rather than an error variant. The assertion is
/// debug-only by design: a release build that somehow gets an oversize
/// payload still can't overrun `buf` or miscompute the written length — the
/// capacity check a few lines down catches it and returns `Oversize`, it
/// just does so without the more specific panic message.
pub fn encode_data(buf: &mut [u8], block: u16, payload: &[u8]) -> Result<usize, CodecError> {
    debug_assert!(
        payload.len() <= BLOCK_SIZE,
        "DATA payload must be at most {BLOCK_SIZE} bytes, got {}",
        payload.len()
    );
    let n = write_u16(buf, 0, OPCODE_DATA)?;
    let n = write_u16(buf, n, block)?;
    if buf.len() < n + payload.len() {
        return Err(CodecError::Oversize);
    }
    buf[n..n + payload.len()].copy_from_slice(payload);
    Ok(n + payload.len())
}

/// Encode an ACK packet. An ACK is 4 bytes and the buffer passed in by every
/// caller in this codebase is at least [`MAX_PACKET`] bytes, so this never
/// fails in practice; callers that pass an undersized buffer get a panic via
/// the slice copy rather than a silently-truncated packet.
pub fn encode_ack(buf: &mut [u8], block: u16) -> usize {
    let n = write_u16(buf, 0, OPCODE_ACK).expect("ACK always fits a TFTP-sized buffer");
    write_u16(buf, n, block).expect("ACK always fits a TFTP-sized buffer")
}

pub fn encode_error(buf: &mut [u8], code: u16, message: &str) -> Result<usize, CodecError> {
    let n = write_u16(buf, 0, OPCODE_ERROR)?;
    let n = write_u16(buf, n, code)?;
    write_cstr(buf, n, message)
}

/// Decode `buf` into a `Packet`. Never panics and never reads past `buf`:
/// every code path below either returns `Ok` with offsets inside `buf` or
/// returns `Malformed` before going further.
pub fn decode(buf: &[u8]) -> Result<Packet<'_>, CodecError> {
    if buf.len() < 2 {
        return Err(CodecError::Malformed {
            reason: "buffer too short for an opcode",
        });
    }
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    let rest = &buf[2..];

    match opcode {
        OPCODE_RRQ | OPCODE_WRQ => {
            let (filename, n) = read_cstr(rest)?;
            let (mode, _) = read_cstr(&rest[n..])?;
            if opcode == OPCODE_RRQ {
                Ok(Packet::RRQ { filename, mode })
            } else {
                Ok(Packet::WRQ { filename, mode })
            }
        }
        OPCODE_DATA => {
            if rest.len() < 2 {
                return Err(CodecError::Malformed {
                    reason: "DATA packet missing block number",
                });
            }
            let block = u16::from_be_bytes([rest[0], rest[1]]);
            Ok(Packet::DATA {
                block,
                payload: &rest[2..],
            })
        }
        OPCODE_ACK => {
            if rest.len() < 2 {
                return Err(CodecError::Malformed {
                    reason: "ACK packet missing block number",
                });
            }
            let block = u16::from_be_bytes([rest[0], rest[1]]);
            Ok(Packet::ACK { block })
        }
        OPCODE_ERROR => {
            if rest.len() < 2 {
                return Err(CodecError::Malformed {
                    reason: "ERROR packet missing code",
                });
            }
            let code = u16::from_be_bytes([rest[0], rest[1]]);
            let (message, _) = read_cstr(&rest[2..])?;
            Ok(Packet::ERROR { code, message })
        }
        _ => Err(CodecError::Malformed {
            reason: "unknown opcode",
        }),
    }
}
