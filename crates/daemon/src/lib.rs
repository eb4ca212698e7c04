//! Daemon supervision and wire protocol.
//!
//! A daemon is an external helper command that collects system values
//! and streams them back over its stdout as binary frames. This crate
//! owns the whole exchange:
//!
//! - [`protocol`]: the byte-level framing (handshake, descriptors,
//!   value/log frames, liveness byte)
//! - [`decoder`]: a resumable parser that accepts any read chunking
//! - [`writer`]: the double write buffer bounding in-flight output
//! - [`lifecycle`]: the tick-driven spawn/kill/respawn state machine
//! - [`task`]: the async task tying one child process to all of the above

pub mod decoder;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod task;
pub mod writer;

pub use decoder::{Decoder, Frame};
pub use error::{FlushError, ProtocolError};
pub use lifecycle::{Action, Lifecycle, LifecycleState};
pub use protocol::VarKind;
pub use task::{DaemonEvent, DaemonSpec, DaemonTask, DaemonValue, DaemonVarSpec};
pub use writer::WriteBuffer;
