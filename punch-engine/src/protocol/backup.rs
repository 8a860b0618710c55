//! Backup memory dumps.
//!
//! A station logs every punch it records into a ring of fixed-width
//! records. The engine reads the ring in chunks and feeds each chunk to a
//! [`BackupDump`], which decodes whole records as they complete and stops
//! at the first erased (all `0xFF`) record.

use chrono::NaiveDate;

use crate::domain::{CardId, ControlCode, PunchEvent, PunchKind, PunchOrigin, StationId};

use super::error::FrameError;
use super::frame::ProtocolMode;
use super::record::StationTime;

/// First backup memory address.
pub const BACKUP_START: u32 = 0x100;
/// Bytes requested per backup read.
pub const BACKUP_CHUNK: u8 = 128;
/// Size of the largest backup memory in the station family.
pub const BACKUP_END: u32 = 0x20000;

/// Record layout used by a station's backup memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupLayout {
    /// `SI2 SI1 SI0 TD TH TL`
    Basic,
    /// `SI2 SI1 SI0 DATE1 DATE0 TH TL TSS`
    Extended,
}

impl BackupLayout {
    pub fn for_mode(mode: ProtocolMode) -> Self {
        match mode {
            ProtocolMode::Basic => BackupLayout::Basic,
            ProtocolMode::Extended => BackupLayout::Extended,
        }
    }

    pub fn record_len(&self) -> usize {
        match self {
            BackupLayout::Basic => 6,
            BackupLayout::Extended => 8,
        }
    }
}

/// Incrementally decoded backup dump for one station.
#[derive(Debug)]
pub struct BackupDump {
    station: StationId,
    code: ControlCode,
    kind: PunchKind,
    layout: BackupLayout,
    fallback_date: NaiveDate,
    carry: Vec<u8>,
    records: Vec<PunchEvent>,
    skipped: usize,
    complete: bool,
}

impl BackupDump {
    /// Start a dump. `fallback_date` dates records whose layout carries no
    /// date, or whose date field is unset.
    pub fn new(
        station: StationId,
        code: ControlCode,
        kind: PunchKind,
        layout: BackupLayout,
        fallback_date: NaiveDate,
    ) -> Self {
        Self {
            station,
            code,
            kind,
            layout,
            fallback_date,
            carry: Vec::new(),
            records: Vec::new(),
            skipped: 0,
            complete: false,
        }
    }

    /// Feed the data part of one backup reply. Returns `true` once the
    /// end-of-dump marker has been seen; later chunks are ignored.
    pub fn push_chunk(&mut self, data: &[u8]) -> bool {
        if self.complete {
            return true;
        }
        self.carry.extend_from_slice(data);

        let len = self.layout.record_len();
        let mut consumed = 0;
        while self.carry.len() - consumed >= len {
            let record = &self.carry[consumed..consumed + len];
            consumed += len;
            if record.iter().all(|b| *b == 0xFF) {
                self.complete = true;
                break;
            }
            match self.decode_record(record) {
                Some(event) => self.records.push(event),
                None => self.skipped += 1,
            }
        }
        self.carry.drain(..consumed);
        if self.complete {
            self.carry.clear();
        }
        self.complete
    }

    /// Whether the end-of-dump marker has been seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Records decoded so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that could not be decoded (erased card slot, no time).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// End the dump. Without an end marker the recovered prefix is
    /// returned inside [`FrameError::TruncatedDump`].
    pub fn finish(self) -> Result<Vec<PunchEvent>, FrameError> {
        if self.complete {
            Ok(self.records)
        } else {
            Err(FrameError::TruncatedDump {
                records: self.records,
            })
        }
    }

    /// Operator cancellation: keep whatever was decoded.
    pub fn cancel(self) -> Vec<PunchEvent> {
        self.records
    }

    fn decode_record(&self, r: &[u8]) -> Option<PunchEvent> {
        let card_id = CardId::from_wire([0, r[0], r[1], r[2]]).ok()?;
        let (date, time) = match self.layout {
            BackupLayout::Basic => (self.fallback_date, StationTime::parse(r[3], r[4], r[5], 0)?),
            BackupLayout::Extended => {
                let (d1, d0) = (r[3], r[4]);
                let year = 2000 + i32::from(d1 >> 2);
                let month = u32::from(((d1 & 0x03) << 2) | (d0 >> 6));
                let day = u32::from((d0 >> 1) & 0x1F);
                let date =
                    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(self.fallback_date);
                (date, StationTime::parse(d0 & 0x01, r[5], r[6], r[7])?)
            }
        };
        let timestamp = time.on(date).ok()?;
        Some(PunchEvent {
            card_id,
            control_code: self.code,
            timestamp,
            source_station: self.station,
            sequence_no: u32::try_from(self.records.len()).unwrap_or(u32::MAX),
            kind: self.kind,
            origin: PunchOrigin::Backup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 9).unwrap()
    }

    fn dump(layout: BackupLayout) -> BackupDump {
        BackupDump::new(StationId(2), ControlCode(31), PunchKind::Control, layout, date())
    }

    /// Extended record for card 7203463 punched on 2026-05-09 at 10:00 + i seconds.
    fn extended_record(i: u16) -> [u8; 8] {
        // yyyyyymm mmdddddp: year 26, month 5, day 9, am
        let d1 = (26 << 2) | (5 >> 2);
        let d0 = ((5 & 0x03) << 6) | (9 << 1);
        let [th, tl] = (36000 + i).to_be_bytes();
        [0x6D, 0xEA, 0x87, d1, d0, th, tl, 0]
    }

    fn stream(records: usize) -> Vec<u8> {
        (0..records as u16).flat_map(extended_record).collect()
    }

    #[test]
    fn complete_dump() {
        let mut d = dump(BackupLayout::Extended);
        let mut bytes = stream(3);
        bytes.extend_from_slice(&[0xFF; 8]);
        assert!(d.push_chunk(&bytes));

        let records = d.finish().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].card_id.get(), 7203463);
        assert_eq!(records[0].timestamp.date(), date());
        assert_eq!(records[2].timestamp.to_string(), "10:00:02");
        assert!(records.iter().all(|r| r.origin == PunchOrigin::Backup));
        assert_eq!(records[1].control_code, ControlCode(31));
    }

    #[test]
    fn interrupted_dump_keeps_prefix() {
        let all = stream(120);
        let mut d = dump(BackupLayout::Extended);
        for chunk in all[..50 * 8].chunks(BACKUP_CHUNK as usize) {
            assert!(!d.push_chunk(chunk));
        }
        match d.finish() {
            Err(FrameError::TruncatedDump { records }) => assert_eq!(records.len(), 50),
            other => panic!("expected truncated dump, got {other:?}"),
        }
    }

    #[test]
    fn records_split_across_chunks() {
        let mut d = dump(BackupLayout::Extended);
        let bytes = stream(2);
        d.push_chunk(&bytes[..5]);
        assert_eq!(d.len(), 0);
        d.push_chunk(&bytes[5..11]);
        assert_eq!(d.len(), 1);
        d.push_chunk(&bytes[11..]);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn cancel_returns_prefix_without_error() {
        let mut d = dump(BackupLayout::Extended);
        d.push_chunk(&stream(7));
        assert_eq!(d.cancel().len(), 7);
    }

    #[test]
    fn basic_layout_uses_fallback_date() {
        let mut d = dump(BackupLayout::Basic);
        let bytes = [0x03, 0x00, 0x2A, 0x01, 0x00, 0x3C, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(d.push_chunk(&bytes));
        let records = d.finish().unwrap();
        assert_eq!(records[0].card_id.get(), 300042);
        assert_eq!(records[0].timestamp.to_string(), "12:01:00");
    }

    #[test]
    fn undecodable_records_are_counted() {
        let mut d = dump(BackupLayout::Basic);
        // no card, then no time
        d.push_chunk(&[0, 0, 0, 0, 0, 10, 0x03, 0x00, 0x2A, 0x00, 0xEE, 0xEE]);
        assert_eq!(d.len(), 0);
        assert_eq!(d.skipped(), 2);
    }
}
