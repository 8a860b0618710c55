//! Station identity and configuration read from system memory.

use serde::Serialize;

use crate::domain::{ControlCode, PunchKind};

use super::error::FrameError;

/// First address requested when identifying a station.
pub const SYS_VAL_ADDRESS: u8 = 0x70;
/// Number of bytes requested when identifying a station.
pub const SYS_VAL_LEN: u8 = 6;

const ADDR_MODE: u8 = 0x71;
const ADDR_CODE_LOW: u8 = 0x72;
const ADDR_CODE_HIGH: u8 = 0x73;
const ADDR_PROTOCOL: u8 = 0x74;

/// Role programmed into a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationMode {
    Control,
    Start,
    Finish,
    Readout,
    Clear,
    Check,
    Other(u8),
}

impl StationMode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x02 => StationMode::Control,
            0x03 => StationMode::Start,
            0x04 => StationMode::Finish,
            0x05 => StationMode::Readout,
            0x06 | 0x07 => StationMode::Clear,
            0x0A => StationMode::Check,
            other => StationMode::Other(other),
        }
    }

    /// Kind of punch this station produces, if it produces punches.
    pub fn punch_kind(&self) -> Option<PunchKind> {
        match self {
            StationMode::Control => Some(PunchKind::Control),
            StationMode::Start => Some(PunchKind::Start),
            StationMode::Finish => Some(PunchKind::Finish),
            StationMode::Clear => Some(PunchKind::Clear),
            StationMode::Check => Some(PunchKind::Check),
            StationMode::Readout | StationMode::Other(_) => None,
        }
    }
}

/// Protocol configuration flags (system address `0x74`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProtocolFlags {
    pub extended: bool,
    pub auto_send: bool,
    pub handshake: bool,
    pub password_access: bool,
    pub readout_after_punch: bool,
}

impl ProtocolFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            extended: b & 0x01 != 0,
            auto_send: b & 0x02 != 0,
            handshake: b & 0x04 != 0,
            password_access: b & 0x10 != 0,
            readout_after_punch: b & 0x80 != 0,
        }
    }
}

/// What a station reported about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StationInfo {
    pub code: ControlCode,
    pub mode: StationMode,
    pub flags: ProtocolFlags,
}

impl StationInfo {
    /// Decode a system-value reply that starts at `address`.
    pub fn parse(address: u8, data: &[u8]) -> Result<Self, FrameError> {
        let at = |addr: u8| -> Result<u8, FrameError> {
            addr.checked_sub(address)
                .and_then(|i| data.get(usize::from(i)).copied())
                .ok_or_else(|| FrameError::malformed("system values do not cover station info"))
        };

        let low = at(ADDR_CODE_LOW)?;
        let high = (at(ADDR_CODE_HIGH)? >> 6) & 0x03;
        Ok(Self {
            code: ControlCode(u16::from_be_bytes([high, low])),
            mode: StationMode::from_byte(at(ADDR_MODE)?),
            flags: ProtocolFlags::from_byte(at(ADDR_PROTOCOL)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_station_info() {
        // 0x70..0x75: -, mode, code low, code high bits, protocol, -
        let data = [0x00, 0x04, 0x2C, 0x40, 0x87, 0x00];
        let info = StationInfo::parse(SYS_VAL_ADDRESS, &data).unwrap();
        assert_eq!(info.code, ControlCode(0x12C));
        assert_eq!(info.mode, StationMode::Finish);
        assert!(info.flags.extended);
        assert!(info.flags.auto_send);
        assert!(info.flags.handshake);
        assert!(!info.flags.password_access);
        assert!(info.flags.readout_after_punch);
    }

    #[test]
    fn short_reply_rejected() {
        assert!(StationInfo::parse(SYS_VAL_ADDRESS, &[0, 2, 31]).is_err());
        assert!(StationInfo::parse(0x75, &[0; 6]).is_err());
    }

    #[test]
    fn modes_map_to_punch_kinds() {
        assert_eq!(StationMode::from_byte(0x0A).punch_kind(), Some(PunchKind::Check));
        assert_eq!(StationMode::from_byte(0x03).punch_kind(), Some(PunchKind::Start));
        assert_eq!(StationMode::from_byte(0x07).punch_kind(), Some(PunchKind::Clear));
        assert_eq!(StationMode::from_byte(0x05).punch_kind(), None);
        assert_eq!(StationMode::from_byte(0x42), StationMode::Other(0x42));
    }
}
