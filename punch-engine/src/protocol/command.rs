//! Command bytes, outbound commands and inbound station messages.

use crate::domain::{CardId, ControlCode};

use super::error::FrameError;
use super::frame::{ACK, NAK, ProtocolMode, RawFrame};

/// Command byte values.
pub mod cmd {
    // Extended protocol
    pub const GET_BACKUP: u8 = 0x81;
    pub const SET_SYS_VAL: u8 = 0x82;
    pub const GET_SYS_VAL: u8 = 0x83;
    pub const GET_SI5: u8 = 0xB1;
    pub const TRANSMIT_RECORD: u8 = 0xD3;
    pub const GET_SI6: u8 = 0xE1;
    pub const SI5_DETECTED: u8 = 0xE5;
    pub const SI6_DETECTED: u8 = 0xE6;
    pub const SI_REMOVED: u8 = 0xE7;
    pub const SI8_DETECTED: u8 = 0xE8;
    pub const GET_SI8: u8 = 0xEF;
    pub const SET_MS: u8 = 0xF0;
    pub const GET_TIME: u8 = 0xF7;
    pub const BEEP: u8 = 0xF9;

    // Basic protocol
    pub const BASIC_GET_SI5: u8 = 0x31;
    pub const BASIC_CARD_EVENT: u8 = 0x46;
    pub const BASIC_PUNCH: u8 = 0x53;
    pub const BASIC_SET_MS: u8 = 0x70;
}

/// Whether a decoder should accept `command` in the given framing.
pub fn is_known_command(mode: ProtocolMode, command: u8) -> bool {
    match mode {
        ProtocolMode::Extended => matches!(
            command,
            cmd::GET_BACKUP
                | cmd::SET_SYS_VAL
                | cmd::GET_SYS_VAL
                | cmd::GET_SI5
                | cmd::TRANSMIT_RECORD
                | cmd::GET_SI6
                | cmd::SI5_DETECTED
                | cmd::SI6_DETECTED
                | cmd::SI_REMOVED
                | cmd::SI8_DETECTED
                | cmd::GET_SI8
                | cmd::SET_MS
                | cmd::GET_TIME
                | cmd::BEEP
        ),
        ProtocolMode::Basic => matches!(
            command,
            cmd::BASIC_GET_SI5 | cmd::BASIC_CARD_EVENT | cmd::BASIC_PUNCH | cmd::BASIC_SET_MS
        ),
    }
}

/// Requests the engine sends to a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Address the directly connected station rather than a remote one.
    SetMaster,
    /// Read `len` bytes of system memory starting at `address`.
    GetSystemValues { address: u8, len: u8 },
    /// Read `len` bytes of backup memory starting at `address`.
    GetBackup { address: u32, len: u8 },
    ReadSi5,
    ReadSi6 { block: u8 },
    ReadSi8 { block: u8 },
    GetTime,
    Beep { count: u8 },
    Ack,
    Nak,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::SetMaster => "set master",
            Command::GetSystemValues { .. } => "get system values",
            Command::GetBackup { .. } => "get backup",
            Command::ReadSi5 => "read SI5",
            Command::ReadSi6 { .. } => "read SI6",
            Command::ReadSi8 { .. } => "read SI8",
            Command::GetTime => "get time",
            Command::Beep { .. } => "beep",
            Command::Ack => "ack",
            Command::Nak => "nak",
        }
    }

    /// Serialise the command in the given framing.
    ///
    /// Only master selection, SI5 readout and the handshake bytes exist in
    /// the basic protocol; anything else is rejected as malformed.
    pub fn encode(&self, mode: ProtocolMode) -> Result<Vec<u8>, FrameError> {
        let frame = match (mode, self) {
            (_, Command::Ack) => return Ok(vec![ACK]),
            (_, Command::Nak) => return Ok(vec![NAK]),
            (ProtocolMode::Extended, Command::SetMaster) => RawFrame::new(cmd::SET_MS, vec![b'M']),
            (ProtocolMode::Extended, Command::GetSystemValues { address, len }) => {
                RawFrame::new(cmd::GET_SYS_VAL, vec![*address, *len])
            }
            (ProtocolMode::Extended, Command::GetBackup { address, len }) => {
                let [_, a2, a1, a0] = address.to_be_bytes();
                RawFrame::new(cmd::GET_BACKUP, vec![a2, a1, a0, *len])
            }
            (ProtocolMode::Extended, Command::ReadSi5) => RawFrame::new(cmd::GET_SI5, vec![]),
            (ProtocolMode::Extended, Command::ReadSi6 { block }) => {
                RawFrame::new(cmd::GET_SI6, vec![*block])
            }
            (ProtocolMode::Extended, Command::ReadSi8 { block }) => {
                RawFrame::new(cmd::GET_SI8, vec![*block])
            }
            (ProtocolMode::Extended, Command::GetTime) => RawFrame::new(cmd::GET_TIME, vec![]),
            (ProtocolMode::Extended, Command::Beep { count }) => {
                RawFrame::new(cmd::BEEP, vec![*count])
            }
            (ProtocolMode::Basic, Command::SetMaster) => {
                RawFrame::new(cmd::BASIC_SET_MS, vec![b'M'])
            }
            (ProtocolMode::Basic, Command::ReadSi5) => RawFrame::new(cmd::BASIC_GET_SI5, vec![]),
            (ProtocolMode::Basic, other) => {
                tracing::debug!(command = other.name(), "not available in basic protocol");
                return Err(FrameError::malformed("command not available in basic protocol"));
            }
        };
        Ok(frame.encode(mode))
    }
}

/// Card generation announced by a card-inserted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertedCard {
    Si5,
    Si6,
    /// SI8 and later; the exact series is read from block 0.
    Si8Family,
}

/// A decoded message from a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationMessage {
    Ack,
    Nak,
    /// Auto-sent punch; the payload is decoded by [`super::record`].
    Punch { command: u8, payload: Vec<u8> },
    CardInserted {
        kind: InsertedCard,
        card_id: Option<CardId>,
    },
    CardRemoved { card_id: Option<CardId> },
    SystemValues { station: ControlCode, address: u8, data: Vec<u8> },
    Backup { station: ControlCode, address: u32, data: Vec<u8> },
    /// One block of card memory. SI5 replies have no block number.
    CardBlock { block: Option<u8>, data: Vec<u8> },
    /// Reply to a command with no payload of interest.
    Reply { command: u8 },
}

impl StationMessage {
    /// Interpret a decoded frame.
    pub fn parse(frame: &RawFrame, mode: ProtocolMode) -> Result<Self, FrameError> {
        let p = &frame.payload;
        let msg = match (mode, frame.command) {
            (_, ACK) => StationMessage::Ack,
            (_, NAK) => StationMessage::Nak,
            (ProtocolMode::Extended, cmd::TRANSMIT_RECORD)
            | (ProtocolMode::Basic, cmd::BASIC_PUNCH) => StationMessage::Punch {
                command: frame.command,
                payload: p.clone(),
            },
            (ProtocolMode::Extended, cmd::SI5_DETECTED) => StationMessage::CardInserted {
                kind: InsertedCard::Si5,
                card_id: card_in(p)?,
            },
            (ProtocolMode::Extended, cmd::SI6_DETECTED) => StationMessage::CardInserted {
                kind: InsertedCard::Si6,
                card_id: card_in(p)?,
            },
            (ProtocolMode::Extended, cmd::SI8_DETECTED) => StationMessage::CardInserted {
                kind: InsertedCard::Si8Family,
                card_id: card_in(p)?,
            },
            (ProtocolMode::Extended, cmd::SI_REMOVED) => StationMessage::CardRemoved {
                card_id: card_in(p)?,
            },
            (ProtocolMode::Basic, cmd::BASIC_CARD_EVENT) => match p.first() {
                Some(b'I') => StationMessage::CardInserted {
                    kind: InsertedCard::Si5,
                    card_id: None,
                },
                Some(b'O') => StationMessage::CardRemoved { card_id: None },
                _ => return Err(FrameError::malformed("unknown card event")),
            },
            (ProtocolMode::Extended, cmd::GET_SYS_VAL) => {
                let (station, rest) = station_prefix(p)?;
                let (&address, data) = rest
                    .split_first()
                    .ok_or_else(|| FrameError::malformed("system value reply too short"))?;
                StationMessage::SystemValues {
                    station,
                    address,
                    data: data.to_vec(),
                }
            }
            (ProtocolMode::Extended, cmd::GET_BACKUP) => {
                let (station, rest) = station_prefix(p)?;
                if rest.len() < 3 {
                    return Err(FrameError::malformed("backup reply too short"));
                }
                let address = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]);
                StationMessage::Backup {
                    station,
                    address,
                    data: rest[3..].to_vec(),
                }
            }
            (ProtocolMode::Extended, cmd::GET_SI5) => {
                let (_, rest) = station_prefix(p)?;
                StationMessage::CardBlock {
                    block: None,
                    data: rest.to_vec(),
                }
            }
            (ProtocolMode::Extended, cmd::GET_SI6 | cmd::GET_SI8) => {
                let (_, rest) = station_prefix(p)?;
                let (&block, data) = rest
                    .split_first()
                    .ok_or_else(|| FrameError::malformed("card block reply too short"))?;
                StationMessage::CardBlock {
                    block: Some(block),
                    data: data.to_vec(),
                }
            }
            (ProtocolMode::Basic, cmd::BASIC_GET_SI5) => StationMessage::CardBlock {
                block: None,
                data: p.clone(),
            },
            (_, command) => StationMessage::Reply { command },
        };
        Ok(msg)
    }
}

/// Split off the `CN1 CN0` station code that prefixes extended replies.
fn station_prefix(payload: &[u8]) -> Result<(ControlCode, &[u8]), FrameError> {
    if payload.len() < 2 {
        return Err(FrameError::malformed("missing station code"));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    Ok((ControlCode(code), &payload[2..]))
}

/// Card number from a `CN1 CN0 SI3 SI2 SI1 SI0` card event.
fn card_in(payload: &[u8]) -> Result<Option<CardId>, FrameError> {
    let (_, rest) = station_prefix(payload)?;
    if rest.len() < 4 {
        return Err(FrameError::malformed("card event too short"));
    }
    Ok(CardId::from_wire([rest[0], rest[1], rest[2], rest[3]]).ok())
}
