//! Incremental value-stream parser.
//!
//! A resumable state machine, not a buffered-message parser: it accepts
//! any chunking of the underlying reads, down to one byte at a time, and
//! its position survives across calls. An id the parent never declared
//! is fatal to the connection; there is no resynchronization.

use crate::error::ProtocolError;
use crate::protocol::{LOG_ID, MAGIC, VarKind};

/// A decoded frame from the child.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Num { id: u32, value: f64 },
    Str { id: u32, bytes: Vec<u8> },
    Log { level: u8, message: Vec<u8> },
}

#[derive(Debug)]
enum State {
    /// Scanning for the stream magic; `matched` bytes seen so far.
    Magic { matched: usize },
    /// Assembling the 4-byte frame id.
    Id { buf: [u8; 4], filled: usize },
    /// Log record: waiting for the level byte.
    LogLevel,
    /// Log record: accumulating the NUL-terminated message.
    LogMessage { level: u8, buf: Vec<u8> },
    /// Numeric value: assembling the 8-byte double.
    Num { id: u32, buf: [u8; 8], filled: usize },
    /// String value: accumulating NUL-terminated bytes.
    Str { id: u32, buf: Vec<u8> },
}

/// Resumable decoder for one daemon connection.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    /// Log messages longer than this are truncated, bounding memory
    /// under a misbehaving producer.
    max_log_len: usize,
}

impl Decoder {
    pub fn new(max_log_len: usize) -> Self {
        Decoder {
            state: State::Magic { matched: 0 },
            max_log_len,
        }
    }

    /// Forget all progress; the next feed scans for the magic again.
    pub fn reset(&mut self) {
        self.state = State::Magic { matched: 0 };
    }

    /// Consume `bytes`, appending completed frames to `out`. `kinds` is
    /// the dense id → kind table declared in the descriptors.
    pub fn feed(
        &mut self,
        bytes: &[u8],
        kinds: &[VarKind],
        out: &mut Vec<Frame>,
    ) -> Result<(), ProtocolError> {
        for &b in bytes {
            match &mut self.state {
                State::Magic { matched } => {
                    if b == MAGIC[*matched] {
                        *matched += 1;
                        if *matched == MAGIC.len() {
                            self.state = State::Id {
                                buf: [0; 4],
                                filled: 0,
                            };
                        }
                    } else {
                        *matched = usize::from(b == MAGIC[0]);
                    }
                }
                State::Id { buf, filled } => {
                    buf[*filled] = b;
                    *filled += 1;
                    if *filled == 4 {
                        let id = u32::from_be_bytes(*buf);
                        let next = if id == LOG_ID {
                            State::LogLevel
                        } else {
                            match kinds.get(id as usize) {
                                Some(VarKind::Num) => State::Num {
                                    id,
                                    buf: [0; 8],
                                    filled: 0,
                                },
                                Some(VarKind::Str) => State::Str {
                                    id,
                                    buf: Vec::new(),
                                },
                                None => {
                                    self.state = State::Magic { matched: 0 };
                                    return Err(ProtocolError::UnknownId { id });
                                }
                            }
                        };
                        self.state = next;
                    }
                }
                State::LogLevel => {
                    self.state = State::LogMessage {
                        level: b,
                        buf: Vec::new(),
                    };
                }
                State::LogMessage { level, buf } => {
                    if b == 0 {
                        out.push(Frame::Log {
                            level: *level,
                            message: std::mem::take(buf),
                        });
                        self.state = State::Id {
                            buf: [0; 4],
                            filled: 0,
                        };
                    } else if buf.len() < self.max_log_len {
                        buf.push(b);
                    }
                }
                State::Num { id, buf, filled } => {
                    buf[*filled] = b;
                    *filled += 1;
                    if *filled == 8 {
                        out.push(Frame::Num {
                            id: *id,
                            value: f64::from_bits(u64::from_be_bytes(*buf)),
                        });
                        self.state = State::Id {
                            buf: [0; 4],
                            filled: 0,
                        };
                    }
                }
                State::Str { id, buf } => {
                    if b == 0 {
                        out.push(Frame::Str {
                            id: *id,
                            bytes: std::mem::take(buf),
                        });
                        self.state = State::Id {
                            buf: [0; 4],
                            filled: 0,
                        };
                    } else {
                        buf.push(b);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_log, encode_num, encode_str};

    fn feed_whole(stream: &[u8], kinds: &[VarKind]) -> Vec<Frame> {
        let mut decoder = Decoder::new(1024);
        let mut out = Vec::new();
        decoder.feed(stream, kinds, &mut out).unwrap();
        out
    }

    fn feed_byte_at_a_time(stream: &[u8], kinds: &[VarKind]) -> Vec<Frame> {
        let mut decoder = Decoder::new(1024);
        let mut out = Vec::new();
        for &b in stream {
            decoder.feed(&[b], kinds, &mut out).unwrap();
        }
        out
    }

    fn stream_with(frames: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut buf = MAGIC.to_vec();
        frames(&mut buf);
        buf
    }

    #[test]
    fn test_num_round_trip_preserves_bits() {
        let value = f64::from_bits(0x400921FB54442D18); // pi
        let stream = stream_with(|buf| encode_num(buf, 0, value));
        let frames = feed_whole(&stream, &[VarKind::Num]);
        assert_eq!(frames, vec![Frame::Num { id: 0, value }]);

        let nan = f64::from_bits(0x7FF8_0000_DEAD_BEEF);
        let stream = stream_with(|buf| encode_num(buf, 0, nan));
        match &feed_byte_at_a_time(&stream, &[VarKind::Num])[..] {
            [Frame::Num { value, .. }] => assert_eq!(value.to_bits(), nan.to_bits()),
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_str_round_trip_preserves_bytes() {
        let payload = b"/dev/sda1 47% \xC3\xA9";
        let stream = stream_with(|buf| encode_str(buf, 0, payload));
        let frames = feed_byte_at_a_time(&stream, &[VarKind::Str]);
        assert_eq!(
            frames,
            vec![Frame::Str {
                id: 0,
                bytes: payload.to_vec()
            }]
        );
    }

    #[test]
    fn test_arbitrary_split_points() {
        let value = 42.5f64;
        let stream = stream_with(|buf| {
            encode_num(buf, 1, value);
            encode_str(buf, 0, b"ok");
            encode_log(buf, 2, b"warning text");
        });
        let kinds = [VarKind::Str, VarKind::Num];
        let whole = feed_whole(&stream, &kinds);
        for split in 1..stream.len() {
            let mut decoder = Decoder::new(1024);
            let mut out = Vec::new();
            decoder.feed(&stream[..split], &kinds, &mut out).unwrap();
            decoder.feed(&stream[split..], &kinds, &mut out).unwrap();
            assert_eq!(out, whole, "split at {split}");
        }
        assert_eq!(whole.len(), 3);
    }

    #[test]
    fn test_garbage_before_magic_is_skipped() {
        let mut stream = b"some banner\nnoise".to_vec();
        stream.extend_from_slice(MAGIC);
        encode_num(&mut stream, 0, 1.0);
        let frames = feed_whole(&stream, &[VarKind::Num]);
        assert_eq!(frames, vec![Frame::Num { id: 0, value: 1.0 }]);
    }

    #[test]
    fn test_restart_on_partial_magic() {
        // A newline mid-garbage must restart the match, not desync it.
        let mut stream = b"\nxsysg\n".to_vec();
        stream.extend_from_slice(MAGIC);
        encode_num(&mut stream, 0, 2.0);
        let frames = feed_byte_at_a_time(&stream, &[VarKind::Num]);
        assert_eq!(frames, vec![Frame::Num { id: 0, value: 2.0 }]);
    }

    #[test]
    fn test_unknown_id_is_fatal() {
        let stream = stream_with(|buf| encode_num(buf, 9, 1.0));
        let mut decoder = Decoder::new(1024);
        let mut out = Vec::new();
        assert_eq!(
            decoder.feed(&stream, &[VarKind::Num], &mut out),
            Err(ProtocolError::UnknownId { id: 9 })
        );
    }

    #[test]
    fn test_log_record_and_cap() {
        let stream = stream_with(|buf| encode_log(buf, 1, b"disk on fire"));
        let frames = feed_whole(&stream, &[]);
        assert_eq!(
            frames,
            vec![Frame::Log {
                level: 1,
                message: b"disk on fire".to_vec()
            }]
        );

        // Over-long messages are truncated but still terminate cleanly.
        let long = vec![b'a'; 64];
        let stream = stream_with(|buf| {
            encode_log(buf, 1, &long);
            encode_num(buf, 0, 5.0);
        });
        let mut decoder = Decoder::new(16);
        let mut out = Vec::new();
        decoder.feed(&stream, &[VarKind::Num], &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Frame::Log {
                    level: 1,
                    message: vec![b'a'; 16]
                },
                Frame::Num { id: 0, value: 5.0 }
            ]
        );
    }
}
