//! Wire framing.
//!
//! All multi-byte integers are big-endian. The parent sends one
//! handshake, the variable descriptors, then a single liveness byte per
//! tick; the child streams value and log frames back.

/// Stream magic. The child echoes it at the start of its output so the
/// parent can synchronize past any early garbage.
pub const MAGIC: &[u8] = b"\nxsysguardd_init_version_1\n";

/// Value-stream id reserved for log records.
pub const LOG_ID: u32 = 0xFFFF_FFFF;

/// Descriptor terminator and per-tick liveness byte.
pub const END: u8 = 0x00;

/// Declared kind of a daemon variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Num,
    Str,
}

impl VarKind {
    /// Descriptor type byte (`0` is the END terminator).
    pub fn type_byte(self) -> u8 {
        match self {
            VarKind::Num => 1,
            VarKind::Str => 2,
        }
    }
}

/// Handshake: magic, tick interval in milliseconds, log level, liveness
/// timeout in ticks.
pub fn encode_handshake(buf: &mut Vec<u8>, interval_ms: u64, log_level: u8, timeout_ticks: u64) {
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&interval_ms.to_be_bytes());
    buf.push(log_level);
    buf.extend_from_slice(&timeout_ticks.to_be_bytes());
}

/// One variable descriptor: type, id, update divisor, config string.
pub fn encode_descriptor(buf: &mut Vec<u8>, kind: VarKind, id: u32, divisor: u64, config: &[u8]) {
    buf.push(kind.type_byte());
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&divisor.to_be_bytes());
    buf.extend_from_slice(&(config.len() as u32).to_be_bytes());
    buf.extend_from_slice(config);
}

/// Terminates the descriptor list.
pub fn encode_descriptor_end(buf: &mut Vec<u8>) {
    buf.push(END);
}

/// Numeric value frame: id plus the exact IEEE-754 bit pattern.
pub fn encode_num(buf: &mut Vec<u8>, id: u32, value: f64) {
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&value.to_bits().to_be_bytes());
}

/// String value frame: id plus NUL-terminated bytes. Interior NULs would
/// break the framing, so the payload stops at the first one.
pub fn encode_str(buf: &mut Vec<u8>, id: u32, bytes: &[u8]) {
    buf.extend_from_slice(&id.to_be_bytes());
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    buf.extend_from_slice(&bytes[..end]);
    buf.push(0);
}

/// Log frame: the reserved id, a level byte, a NUL-terminated message.
pub fn encode_log(buf: &mut Vec<u8>, level: u8, message: &[u8]) {
    buf.extend_from_slice(&LOG_ID.to_be_bytes());
    buf.push(level);
    let end = message.iter().position(|&b| b == 0).unwrap_or(message.len());
    buf.extend_from_slice(&message[..end]);
    buf.push(0);
}

/// Per-tick liveness byte written to the child's stdin.
pub fn encode_alive(buf: &mut Vec<u8>) {
    buf.push(END);
}
