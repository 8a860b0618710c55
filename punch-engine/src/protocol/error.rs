//! Frame codec error types.

use crate::domain::PunchEvent;

/// Errors produced while decoding station frames.
///
/// Every variant is fatal to one frame only; the decoder keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// CRC did not match; the frame is discarded
    #[error("checksum mismatch on command {command:#04x}: expected {expected:#06x}, got {actual:#06x}")]
    Checksum {
        command: u8,
        expected: u16,
        actual: u16,
    },

    /// Frame structure or command byte not understood
    #[error("malformed frame: {reason}")]
    Malformed { reason: &'static str },

    /// Backup download ended before its end-of-dump marker
    #[error("backup dump truncated after {} records", records.len())]
    TruncatedDump { records: Vec<PunchEvent> },
}

impl FrameError {
    pub(crate) fn malformed(reason: &'static str) -> Self {
        FrameError::Malformed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = FrameError::Checksum {
            command: 0xD3,
            expected: 0x1234,
            actual: 0xBEEF,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch on command 0xd3: expected 0x1234, got 0xbeef"
        );

        let err = FrameError::malformed("missing ETX");
        assert_eq!(err.to_string(), "malformed frame: missing ETX");

        let err = FrameError::TruncatedDump { records: vec![] };
        assert_eq!(err.to_string(), "backup dump truncated after 0 records");
    }
}
