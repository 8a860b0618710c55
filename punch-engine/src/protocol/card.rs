//! Card memory layouts.
//!
//! A readout station copies the card's memory block by block. Once every
//! block a card family needs has arrived, [`CardImage::decode`] turns the
//! concatenated bytes into check, start, control and finish punches.

use serde::Serialize;

use crate::domain::{
    CardId, ControlCode, PunchEvent, PunchKind, PunchOrigin, PunchTime, StationId,
    unwrap_half_day_sequence,
};

use super::error::FrameError;
use super::record::{NO_TIME, StationTime};

const BLOCK_LEN: usize = 128;

/// Card generations with distinct memory layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFamily {
    Si5,
    Si6,
    Si8,
    Si9,
    /// SI10, SI11 and SIAC share a layout.
    Si10,
}

impl CardFamily {
    /// Identify an SI8-family card from block 0 byte 24.
    pub fn from_series(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            2 => Some(CardFamily::Si8),
            1 => Some(CardFamily::Si9),
            15 => Some(CardFamily::Si10),
            _ => None,
        }
    }

    /// Memory blocks to read, in order. SI5 memory is read in one go.
    pub fn blocks(&self) -> &'static [u8] {
        match self {
            CardFamily::Si5 => &[0],
            CardFamily::Si6 => &[0, 6, 7],
            CardFamily::Si8 | CardFamily::Si9 => &[0, 1],
            CardFamily::Si10 => &[0, 4, 5, 6, 7],
        }
    }

    fn first_punch(&self) -> usize {
        match self {
            CardFamily::Si5 => 32,
            CardFamily::Si6 | CardFamily::Si10 => 128,
            CardFamily::Si8 => 136,
            CardFamily::Si9 => 56,
        }
    }

    fn max_punches(&self) -> usize {
        (self.blocks().len() * BLOCK_LEN - self.first_punch()) / 4
    }
}

/// The punches recovered from one card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardContents {
    pub card_id: CardId,
    /// Check, start, controls and finish, in that order.
    pub punches: Vec<PunchEvent>,
    /// The card held punches without a time.
    pub untimed: bool,
}

/// Card memory being collected from a readout station.
#[derive(Debug, Clone)]
pub struct CardImage {
    family: CardFamily,
    data: Vec<u8>,
}

impl CardImage {
    pub fn new(family: CardFamily) -> Self {
        Self {
            family,
            data: Vec::with_capacity(family.blocks().len() * BLOCK_LEN),
        }
    }

    pub fn family(&self) -> CardFamily {
        self.family
    }

    /// Append the next block. Returns `true` once all blocks are present.
    pub fn push_block(&mut self, data: &[u8]) -> Result<bool, FrameError> {
        if data.len() < BLOCK_LEN {
            return Err(FrameError::malformed("short card block"));
        }
        self.data.extend_from_slice(&data[..BLOCK_LEN]);
        Ok(self.is_complete())
    }

    /// Block number to request next, or `None` once complete.
    pub fn next_block(&self) -> Option<u8> {
        self.family.blocks().get(self.data.len() / BLOCK_LEN).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.family.blocks().len() * BLOCK_LEN
    }

    /// Decode the collected memory.
    ///
    /// `zero_time` anchors SI5 twelve-hour times; the other families carry
    /// a PM flag and are placed on the date of `zero_time`.
    pub fn decode(&self, zero_time: PunchTime, station: StationId) -> Result<CardContents, FrameError> {
        if !self.is_complete() {
            return Err(FrameError::malformed("card memory incomplete"));
        }
        match self.family {
            CardFamily::Si5 => decode_si5(&self.data, zero_time, station),
            family => decode_four_byte(family, &self.data, zero_time, station),
        }
    }
}

fn punch(card_id: CardId, code: u16, at: PunchTime, station: StationId, seq: usize, kind: PunchKind) -> PunchEvent {
    PunchEvent {
        card_id,
        control_code: ControlCode(code),
        timestamp: at,
        source_station: station,
        sequence_no: u32::try_from(seq).unwrap_or(u32::MAX),
        kind,
        origin: PunchOrigin::CardMemory,
    }
}

fn be16(d: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([d[at], d[at + 1]])
}

fn decode_si5(d: &[u8], zero_time: PunchTime, station: StationId) -> Result<CardContents, FrameError> {
    let series = d[6];
    let number = u32::from(be16(d, 4));
    let card_id = if series <= 1 {
        CardId::new(number)
    } else {
        CardId::from_wire([0, series, d[4], d[5]])
    }
    .map_err(|_| FrameError::malformed("card memory has no card number"))?;

    let time_at = |at: usize| {
        let raw = be16(d, at);
        (raw != NO_TIME).then_some(u32::from(raw))
    };

    let count = usize::from(d[23].saturating_sub(1)).min(36);
    let timed = count.min(30);

    // Chronological order on the card: check, start, punches, finish
    let mut raw = vec![time_at(25), time_at(19)];
    let mut codes = Vec::with_capacity(timed);
    for i in 0..timed {
        let at = 32 + 16 * (i / 5) + 1 + 3 * (i % 5);
        codes.push(u16::from(d[at]));
        raw.push(time_at(at + 1));
    }
    raw.push(time_at(21));

    let times = unwrap_half_day_sequence(&raw, zero_time)
        .map_err(|_| FrameError::malformed("card time out of range"))?;

    let mut punches = Vec::new();
    let mut seq = 0;
    let mut add = |code: u16, at: Option<PunchTime>, kind: PunchKind, punches: &mut Vec<PunchEvent>| {
        if let Some(at) = at {
            punches.push(punch(card_id, code, at, station, seq, kind));
            seq += 1;
        }
    };
    add(0, times[0], PunchKind::Check, &mut punches);
    add(0, times[1], PunchKind::Start, &mut punches);
    for (i, code) in codes.iter().enumerate() {
        add(*code, times[i + 2], PunchKind::Control, &mut punches);
    }
    add(0, times[timed + 2], PunchKind::Finish, &mut punches);

    Ok(CardContents {
        card_id,
        punches,
        untimed: count > 30,
    })
}

/// Field offsets for cards storing 4-byte `TD CN TH TL` records.
struct Layout {
    number: usize,
    count: usize,
    check: usize,
    start: usize,
    finish: usize,
}

const SI6_LAYOUT: Layout = Layout {
    number: 11,
    count: 18,
    check: 28,
    start: 24,
    finish: 20,
};

const SI8_LAYOUT: Layout = Layout {
    number: 25,
    count: 22,
    check: 8,
    start: 12,
    finish: 16,
};

fn four_byte_time(d: &[u8], at: usize, zero_time: PunchTime) -> Option<(u16, PunchTime)> {
    let td = d[at];
    let code = u16::from(d[at + 1]) | (u16::from((td >> 6) & 0x03) << 8);
    let time = StationTime::parse(td, d[at + 2], d[at + 3], 0)?;
    Some((code, time.on(zero_time.date()).ok()?))
}

fn decode_four_byte(
    family: CardFamily,
    d: &[u8],
    zero_time: PunchTime,
    station: StationId,
) -> Result<CardContents, FrameError> {
    let layout = match family {
        CardFamily::Si6 => &SI6_LAYOUT,
        _ => &SI8_LAYOUT,
    };
    let n = layout.number;
    let card_id = CardId::from_wire([0, d[n], d[n + 1], d[n + 2]])
        .map_err(|_| FrameError::malformed("card memory has no card number"))?;

    let count = usize::from(d[layout.count]).min(family.max_punches());
    let mut punches = Vec::with_capacity(count + 3);
    let mut seq = 0;
    let mut add = |code: u16, at: PunchTime, kind: PunchKind| {
        punches.push(punch(card_id, code, at, station, seq, kind));
        seq += 1;
    };

    if let Some((_, at)) = four_byte_time(d, layout.check, zero_time) {
        add(0, at, PunchKind::Check);
    }
    if let Some((_, at)) = four_byte_time(d, layout.start, zero_time) {
        add(0, at, PunchKind::Start);
    }
    for i in 0..count {
        if let Some((code, at)) = four_byte_time(d, family.first_punch() + 4 * i, zero_time) {
            add(code, at, PunchKind::Control);
        }
    }
    if let Some((_, at)) = four_byte_time(d, layout.finish, zero_time) {
        add(0, at, PunchKind::Finish);
    }

    Ok(CardContents {
        card_id,
        punches,
        untimed: false,
    })
}
