//! Frame delimiting, stuffing and integrity checking.
//!
//! Two framings are in use:
//!
//! - **Extended**: `STX CMD LEN DATA CRC_HI CRC_LO ETX`, with a CRC over
//!   `CMD LEN DATA`.
//! - **Basic**: `STX CMD DATA ETX`, where every data byte below `0x20` is
//!   prefixed with `DLE`. There is no checksum.
//!
//! [`FrameDecoder`] accepts arbitrary chunks of a byte stream and yields one
//! frame or one error at a time. A bad frame never stalls the stream: the
//! decoder drops it and resynchronises on the next `STX`.

use serde::{Deserialize, Serialize};

use super::command::is_known_command;
use super::crc::crc16;
use super::error::FrameError;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const DLE: u8 = 0x10;
pub const WAKEUP: u8 = 0xFF;

/// Upper bound on an unstuffed basic-mode payload.
const MAX_BASIC_PAYLOAD: usize = 300;

/// Protocol generation spoken by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMode {
    /// Legacy framing with DLE stuffing and no CRC.
    Basic,
    /// Length-prefixed framing with CRC-16.
    #[default]
    Extended,
}

/// Outcome of the integrity check on a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCheck {
    Valid,
    Invalid,
    /// CRC checking disabled, or the framing has no CRC.
    Skipped,
}

/// A decoded frame: command byte plus unstuffed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: u8,
    pub payload: Vec<u8>,
    pub integrity: IntegrityCheck,
}

impl RawFrame {
    /// A frame about to be sent.
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self {
            command,
            payload,
            integrity: IntegrityCheck::Valid,
        }
    }

    /// A single-byte ACK/NAK reply, which travels outside any frame.
    fn control(byte: u8) -> Self {
        Self {
            command: byte,
            payload: Vec::new(),
            integrity: IntegrityCheck::Skipped,
        }
    }

    /// Serialise the frame for the wire.
    pub fn encode(&self, mode: ProtocolMode) -> Vec<u8> {
        match mode {
            ProtocolMode::Extended => encode_extended(self.command, &self.payload),
            ProtocolMode::Basic => encode_basic(self.command, &self.payload),
        }
    }
}

/// Build an extended frame. Payloads beyond 255 bytes are cut at 255.
pub fn encode_extended(command: u8, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(u8::MAX as usize)];
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(STX);
    out.push(command);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    let crc = crc16(&out[1..]);
    out.extend_from_slice(&crc.to_be_bytes());
    out.push(ETX);
    out
}

/// Build a basic frame with DLE stuffing.
pub fn encode_basic(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 2 + 3);
    out.push(STX);
    out.push(command);
    for &b in payload {
        if b < 0x20 {
            out.push(DLE);
        }
        out.push(b);
    }
    out.push(ETX);
    out
}

/// Decode exactly one frame from a complete buffer.
///
/// Leading noise is skipped. A buffer holding only part of a frame is
/// reported as malformed.
pub fn decode(bytes: &[u8], mode: ProtocolMode, crc_enabled: bool) -> Result<RawFrame, FrameError> {
    let mut decoder = FrameDecoder::new(mode, crc_enabled);
    decoder.push(bytes);
    decoder
        .next_frame()
        .unwrap_or_else(|| Err(FrameError::malformed("incomplete frame")))
}

enum Step {
    NeedMore,
    Frame(usize, RawFrame),
    Drop(usize, FrameError),
}

/// Streaming frame decoder for one station connection.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: ProtocolMode,
    crc_enabled: bool,
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder. With `crc_enabled == false` checksums are not
    /// verified and frames report [`IntegrityCheck::Skipped`].
    pub fn new(mode: ProtocolMode, crc_enabled: bool) -> Self {
        Self {
            mode,
            crc_enabled,
            buf: Vec::new(),
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Forget any partial frame, e.g. after the connection dropped.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Yield the next frame, the next error, or `None` if more bytes are
    /// needed.
    pub fn next_frame(&mut self) -> Option<Result<RawFrame, FrameError>> {
        loop {
            let first = *self.buf.first()?;
            match first {
                STX => {}
                ACK | NAK => {
                    self.buf.drain(..1);
                    return Some(Ok(RawFrame::control(first)));
                }
                _ => {
                    // WAKEUP and line noise
                    self.buf.drain(..1);
                    continue;
                }
            }

            // Stations may lead with a doubled STX
            if self.buf.get(1) == Some(&STX) {
                self.buf.drain(..1);
                continue;
            }

            let step = match self.mode {
                ProtocolMode::Extended => self.take_extended(),
                ProtocolMode::Basic => self.take_basic(),
            };

            return match step {
                Step::NeedMore => None,
                Step::Frame(consumed, frame) => {
                    self.buf.drain(..consumed);
                    Some(Ok(frame))
                }
                Step::Drop(consumed, err) => {
                    self.buf.drain(..consumed);
                    Some(Err(err))
                }
            };
        }
    }

    fn take_extended(&self) -> Step {
        let buf = &self.buf;
        if buf.len() < 3 {
            return Step::NeedMore;
        }

        let command = buf[1];
        let len = buf[2] as usize;
        let total = len + 6;
        if buf.len() < total {
            return Step::NeedMore;
        }

        if buf[total - 1] != ETX {
            return Step::Drop(1, FrameError::malformed("missing ETX"));
        }
        if !is_known_command(ProtocolMode::Extended, command) {
            return Step::Drop(total, FrameError::malformed("unknown command"));
        }

        let integrity = if self.crc_enabled {
            let expected = crc16(&buf[1..3 + len]);
            let actual = u16::from_be_bytes([buf[3 + len], buf[4 + len]]);
            if expected != actual {
                return Step::Drop(
                    total,
                    FrameError::Checksum {
                        command,
                        expected,
                        actual,
                    },
                );
            }
            IntegrityCheck::Valid
        } else {
            IntegrityCheck::Skipped
        };

        Step::Frame(
            total,
            RawFrame {
                command,
                payload: buf[3..3 + len].to_vec(),
                integrity,
            },
        )
    }

    fn take_basic(&self) -> Step {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Step::NeedMore;
        }

        let command = buf[1];
        if command < 0x20 {
            return Step::Drop(1, FrameError::malformed("control byte in command position"));
        }

        let mut payload = Vec::new();
        let mut i = 2;
        loop {
            let Some(&b) = buf.get(i) else {
                return Step::NeedMore;
            };
            match b {
                DLE => {
                    let Some(&escaped) = buf.get(i + 1) else {
                        return Step::NeedMore;
                    };
                    payload.push(escaped);
                    i += 2;
                }
                ETX => {
                    i += 1;
                    break;
                }
                STX => return Step::Drop(i, FrameError::malformed("unexpected STX")),
                _ => {
                    payload.push(b);
                    i += 1;
                }
            }
            if payload.len() > MAX_BASIC_PAYLOAD {
                return Step::Drop(i, FrameError::malformed("frame too long"));
            }
        }

        if !is_known_command(ProtocolMode::Basic, command) {
            return Step::Drop(i, FrameError::malformed("unknown command"));
        }

        Step::Frame(
            i,
            RawFrame {
                command,
                payload,
                integrity: IntegrityCheck::Skipped,
            },
        )
    }
}
