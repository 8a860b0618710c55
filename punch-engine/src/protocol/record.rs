//! Station time and auto-sent punch records.

use chrono::NaiveDate;

use crate::domain::{
    CardId, ControlCode, PunchEvent, PunchKind, PunchOrigin, PunchTime, StationId, TimeError,
};

use super::command::cmd;
use super::error::FrameError;

/// Raw `TH TL` value meaning "no time recorded".
pub const NO_TIME: u16 = 0xEEEE;

/// A time as the station encodes it: half-day seconds, PM flag and
/// 1/256 s fraction. The date is supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationTime {
    pub pm: bool,
    pub secs: u16,
    pub fraction: u8,
}

impl StationTime {
    /// Decode `TD TH TL [TSS]`. Returns `None` for the no-time marker.
    pub fn parse(td: u8, th: u8, tl: u8, tss: u8) -> Option<Self> {
        let secs = u16::from_be_bytes([th, tl]);
        if secs == NO_TIME {
            return None;
        }
        Some(Self {
            pm: td & 0x01 != 0,
            secs,
            fraction: tss,
        })
    }

    /// Place the time on `date`.
    pub fn on(&self, date: NaiveDate) -> Result<PunchTime, TimeError> {
        PunchTime::from_half_day(date, self.pm, u32::from(self.secs), self.fraction)
    }
}

/// One punch as sent by a station in direct-punch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunchRecord {
    /// Code of the station that recorded the punch.
    pub code: ControlCode,
    pub card_id: CardId,
    pub time: StationTime,
    /// Backup memory address of the record, when the station reports it.
    pub memory_address: Option<u32>,
}

impl PunchRecord {
    /// Decode an auto-sent punch payload for either protocol.
    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, FrameError> {
        match command {
            cmd::TRANSMIT_RECORD => Self::parse_extended(payload),
            cmd::BASIC_PUNCH => Self::parse_basic(payload),
            _ => Err(FrameError::malformed("not a punch record")),
        }
    }

    /// `CN1 CN0 SI3 SI2 SI1 SI0 TD TH TL TSS MEM2 MEM1 MEM0`
    fn parse_extended(p: &[u8]) -> Result<Self, FrameError> {
        if p.len() < 13 {
            return Err(FrameError::malformed("punch record too short"));
        }
        let card_id = CardId::from_wire([p[2], p[3], p[4], p[5]])
            .map_err(|_| FrameError::malformed("punch record without card"))?;
        let time = StationTime::parse(p[6], p[7], p[8], p[9])
            .ok_or_else(|| FrameError::malformed("punch record without time"))?;
        Ok(Self {
            code: ControlCode(u16::from_be_bytes([p[0], p[1]])),
            card_id,
            time,
            memory_address: Some(u32::from_be_bytes([0, p[10], p[11], p[12]])),
        })
    }

    /// `CN0 SI3 SI2 SI1 SI0 TD TH TL`
    fn parse_basic(p: &[u8]) -> Result<Self, FrameError> {
        if p.len() < 8 {
            return Err(FrameError::malformed("punch record too short"));
        }
        let card_id = CardId::from_wire([p[1], p[2], p[3], p[4]])
            .map_err(|_| FrameError::malformed("punch record without card"))?;
        let time = StationTime::parse(p[5], p[6], p[7], 0)
            .ok_or_else(|| FrameError::malformed("punch record without time"))?;
        Ok(Self {
            code: ControlCode(u16::from(p[0])),
            card_id,
            time,
            memory_address: None,
        })
    }

    /// Turn the record into a punch event on `date`.
    pub fn into_event(
        self,
        date: NaiveDate,
        station: StationId,
        sequence_no: u32,
        kind: PunchKind,
    ) -> Result<PunchEvent, FrameError> {
        let timestamp = self
            .time
            .on(date)
            .map_err(|_| FrameError::malformed("punch time out of range"))?;
        Ok(PunchEvent {
            card_id: self.card_id,
            control_code: self.code,
            timestamp,
            source_station: station,
            sequence_no,
            kind,
            origin: PunchOrigin::Live,
        })
    }
}
