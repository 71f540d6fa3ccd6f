//! `drop`/`dropd`: a minimal TFTP (RFC 1350) upload-only client and daemon.
//!
//! The wire codec and transfer state machines live here as a library so the
//! `drop` and `dropd` binaries (under `src/bin/`) stay thin CLI shells.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod resolve;
pub mod server;
