//! Daemon errors.
//!
//! Everything here is connection-scoped: a protocol or flush error kills
//! one daemon connection and routes through the respawn path, never the
//! whole process.

use thiserror::Error;

/// Fatal stream error. There is no resynchronization: the supervisor
/// tears the connection down and respawns the child.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("value frame for undeclared id {id}")]
    UnknownId { id: u32 },
}

/// Write-side backpressure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlushError {
    #[error("previous flush has not drained yet")]
    Busy,
}
