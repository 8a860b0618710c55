//! Card Readout Assembler.
//!
//! Punches are collected per card into an in-progress [`Readout`]. A
//! readout is handed on when one of the following happens:
//!
//! - a live finish punch arrives for the card;
//! - the readout station reports the card removed;
//! - a backup download that contributed punches to it ends;
//! - the station that last punched it closes;
//! - it holds only card-memory or backup punches and none has arrived
//!   within the inactivity timeout.
//!
//! A runner out on the course with a radio-punched card keeps an open
//! readout however long the gaps between controls.
//!
//! Punches stay in the order received; ordering is the checker's business.
//! A punch the open readout already holds within the tolerance is counted
//! and dropped, so a card read after radio punches adds only what the
//! radios missed.
//!
//! The last readout handed on for each card is kept for a while. A later
//! readout that adds nothing to it is dropped. One without a start punch
//! (a second finish, a backup fragment) is completed from it.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{
    CardId, PunchEvent, PunchKind, PunchOrigin, PunchTime, Readout, ReadoutError, StationId,
};
use crate::ingest::DumpOutcome;

#[derive(Debug)]
struct Building {
    readout: Readout,
    touched: Instant,
    last_station: StationId,
    backup_from: BTreeSet<StationId>,
    live: bool,
}

#[derive(Debug)]
struct HandedOn {
    readout: Readout,
    at: Instant,
}

/// Per-card accumulator. Owned by the processing pipeline.
#[derive(Debug)]
pub struct ReadoutAssembler {
    inactivity: Duration,
    tolerance: chrono::Duration,
    retention: Duration,
    open: HashMap<CardId, Building>,
    last_card: HashMap<StationId, CardId>,
    previous: HashMap<CardId, HandedOn>,
    empty: u64,
    duplicates: u64,
    redundant: u64,
}

impl ReadoutAssembler {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            inactivity,
            tolerance: chrono::Duration::seconds(2),
            retention: Duration::from_secs(6 * 3600),
            open: HashMap::new(),
            last_card: HashMap::new(),
            previous: HashMap::new(),
            empty: 0,
            duplicates: 0,
            redundant: 0,
        }
    }

    /// Punches of one card and control closer than this are one punch.
    pub fn with_tolerance(mut self, tolerance: chrono::Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// How long a handed-on readout is remembered for its card.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Add a punch. Returns the readout if the punch completed it.
    pub fn push(&mut self, punch: PunchEvent, now: Instant) -> Option<Readout> {
        let card = punch.card_id;
        let station = punch.source_station;
        let completes = punch.is_finish() && punch.origin == PunchOrigin::Live;

        let building = self.open.entry(card).or_insert_with(|| Building {
            readout: Readout::new(card, Utc::now()),
            touched: now,
            last_station: station,
            backup_from: BTreeSet::new(),
            live: false,
        });
        match punch.origin {
            PunchOrigin::Backup => {
                building.backup_from.insert(station);
            }
            PunchOrigin::Live => building.live = true,
            PunchOrigin::CardMemory => {}
        }
        building.touched = now;
        building.last_station = station;
        self.last_card.insert(station, card);

        if repeats(&building.readout, &punch, self.tolerance) {
            self.duplicates += 1;
            debug!(card = %card, code = %punch.control_code, "punch already in readout");
            return None;
        }
        building.readout.push(punch);

        if completes {
            debug!(card = %card, "finish punch completes readout");
            self.complete(card, &[])
        } else {
            None
        }
    }

    /// A card left a readout station. Without a card number, the card
    /// that station last reported is meant.
    pub fn card_removed(
        &mut self,
        station: StationId,
        card_id: Option<CardId>,
        flags: &[ReadoutError],
    ) -> Option<Readout> {
        let card = card_id.or_else(|| self.last_card.get(&station).copied())?;
        self.complete(card, flags)
    }

    /// A backup download from `station` ended. Every readout holding
    /// recovered punches from it is complete.
    pub fn dump_finished(&mut self, station: StationId, outcome: DumpOutcome) -> Vec<Readout> {
        let mut flags = vec![ReadoutError::RecoveredFromBackup];
        if outcome != DumpOutcome::Complete {
            flags.push(ReadoutError::TruncatedDump);
        }
        let cards: Vec<CardId> = self
            .open
            .iter()
            .filter(|(_, b)| b.backup_from.contains(&station))
            .map(|(card, _)| *card)
            .collect();
        self.complete_all(cards, &flags)
    }

    /// `station` will send nothing more. Readouts it punched last are
    /// flushed, flagged if the connection was lost.
    pub fn station_closed(&mut self, station: StationId, lost: bool) -> Vec<Readout> {
        let flags: &[ReadoutError] = if lost {
            &[ReadoutError::ConnectionLost]
        } else {
            &[]
        };
        let cards: Vec<CardId> = self
            .open
            .iter()
            .filter(|(_, b)| b.last_station == station)
            .map(|(card, _)| *card)
            .collect();
        self.last_card.remove(&station);
        self.complete_all(cards, flags)
    }

    /// Complete card-memory and backup readouts idle for longer than the
    /// inactivity timeout, and forget handed-on readouts past retention.
    pub fn expire(&mut self, now: Instant) -> Vec<Readout> {
        self.previous
            .retain(|_, h| now.saturating_duration_since(h.at) < self.retention);
        let cards: Vec<CardId> = self
            .open
            .iter()
            .filter(|(_, b)| {
                !b.live && now.saturating_duration_since(b.touched) >= self.inactivity
            })
            .map(|(card, _)| *card)
            .collect();
        self.complete_all(cards, &[ReadoutError::TimedOut])
    }

    /// Hand on everything still open.
    pub fn drain(&mut self) -> Vec<Readout> {
        let cards: Vec<CardId> = self.open.keys().copied().collect();
        self.complete_all(cards, &[])
    }

    /// Readouts currently being built.
    pub fn in_progress(&self) -> usize {
        self.open.len()
    }

    /// Readouts dropped because they held no punch.
    pub fn empty_dropped(&self) -> u64 {
        self.empty
    }

    /// Punches dropped because their readout already held them.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Readouts dropped because the card's previous readout held them.
    pub fn redundant_dropped(&self) -> u64 {
        self.redundant
    }

    /// Cards with a remembered readout.
    pub fn remembered(&self) -> usize {
        self.previous.len()
    }

    fn complete_all(&mut self, mut cards: Vec<CardId>, flags: &[ReadoutError]) -> Vec<Readout> {
        cards.sort_unstable();
        cards
            .into_iter()
            .filter_map(|card| self.complete(card, flags))
            .collect()
    }

    fn complete(&mut self, card: CardId, flags: &[ReadoutError]) -> Option<Readout> {
        let Building { mut readout, .. } = self.open.remove(&card)?;
        self.last_card.retain(|_, c| *c != card);
        if readout.is_empty() {
            self.empty += 1;
            debug!(card = %card, "dropping empty readout");
            return None;
        }
        for flag in flags {
            readout.flag(*flag);
        }

        if let Some(previous) = self.previous.get(&card) {
            if covers(&previous.readout, &readout, self.tolerance) {
                self.redundant += 1;
                debug!(card = %card, "readout adds nothing to the previous one");
                return None;
            }
            if readout.start_time.is_none() {
                debug!(card = %card, "completing partial readout from the previous one");
                inherit(&mut readout, &previous.readout, self.tolerance);
            }
        }

        readout.read_at = Utc::now();
        self.previous.insert(
            card,
            HandedOn {
                readout: readout.clone(),
                at: Instant::now(),
            },
        );
        Some(readout)
    }
}

fn near(a: PunchTime, b: PunchTime, tolerance: chrono::Duration) -> bool {
    a.abs_diff(b) <= tolerance
}

/// Whether `readout` already holds `punch`.
fn repeats(readout: &Readout, punch: &PunchEvent, tolerance: chrono::Duration) -> bool {
    let at = |t: PunchTime| near(t, punch.timestamp, tolerance);
    match punch.kind {
        PunchKind::Control => readout
            .punches
            .iter()
            .any(|p| p.control_code == punch.control_code && at(p.timestamp)),
        PunchKind::Check => readout.check_time.is_some_and(at),
        PunchKind::Start => readout.start_time.is_some_and(at),
        PunchKind::Finish => readout.finish_time.is_some_and(at),
        PunchKind::Clear => false,
    }
}

/// Whether every punch of `readout` is already in `previous`.
fn covers(previous: &Readout, readout: &Readout, tolerance: chrono::Duration) -> bool {
    let held = |mine: Option<PunchTime>, theirs: Option<PunchTime>| match (mine, theirs) {
        (None, _) => true,
        (Some(a), Some(b)) => near(a, b, tolerance),
        (Some(_), None) => false,
    };
    held(readout.check_time, previous.check_time)
        && held(readout.start_time, previous.start_time)
        && held(readout.finish_time, previous.finish_time)
        && readout
            .punches
            .iter()
            .all(|p| repeats(previous, p, tolerance))
}

/// Fill `readout` in from the card's previous readout. Its own finish and
/// check punches win.
fn inherit(readout: &mut Readout, previous: &Readout, tolerance: chrono::Duration) {
    let mut punches = previous.punches.clone();
    for punch in readout.punches.drain(..) {
        let known = punches.iter().any(|p| {
            p.control_code == punch.control_code && near(p.timestamp, punch.timestamp, tolerance)
        });
        if !known {
            punches.push(punch);
        }
    }
    readout.punches = punches;
    readout.start_time = previous.start_time;
    readout.check_time = readout.check_time.or(previous.check_time);
    readout.finish_time = readout.finish_time.or(previous.finish_time);
    readout.stations.extend(previous.stations.iter().copied());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ControlCode, PunchKind, PunchTime};
    use chrono::NaiveDate;

    const CARD: u32 = 7203463;

    fn punch(card: u32, code: u16, at: &str, station: u16) -> PunchEvent {
        let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
        PunchEvent::control(
            CardId::new(card).unwrap(),
            ControlCode(code),
            PunchTime::parse_hms(at, date).unwrap(),
            StationId(station),
            0,
        )
    }

    fn assembler() -> ReadoutAssembler {
        ReadoutAssembler::new(Duration::from_secs(30))
    }

    #[test]
    fn live_finish_completes() {
        let mut asm = assembler();
        let now = Instant::now();
        assert!(asm.push(punch(CARD, 0, "10:00:00", 1).with_kind(PunchKind::Start), now).is_none());
        assert!(asm.push(punch(CARD, 31, "10:05:00", 2), now).is_none());
        let readout = asm
            .push(punch(CARD, 0, "10:20:00", 3).with_kind(PunchKind::Finish), now)
            .unwrap();
        assert_eq!(readout.punches.len(), 1);
        assert!(readout.finish_time.is_some());
        assert_eq!(readout.stations.len(), 3);
        assert_eq!(asm.in_progress(), 0);
    }

    #[test]
    fn card_memory_finish_waits_for_removal() {
        let mut asm = assembler();
        let now = Instant::now();
        let finish = punch(CARD, 0, "10:20:00", 5)
            .with_kind(PunchKind::Finish)
            .with_origin(PunchOrigin::CardMemory);
        assert!(asm.push(finish, now).is_none());

        let readout = asm
            .card_removed(StationId(5), None, &[ReadoutError::UntimedPunches])
            .unwrap();
        assert!(readout.read_errors.contains(&ReadoutError::UntimedPunches));
    }

    #[test]
    fn removal_of_unknown_card_is_ignored() {
        let mut asm = assembler();
        assert!(asm.card_removed(StationId(5), None, &[]).is_none());
        assert!(
            asm.card_removed(StationId(5), Some(CardId::new(1).unwrap()), &[])
                .is_none()
        );
    }

    #[test]
    fn punches_keep_arrival_order() {
        let mut asm = assembler();
        let now = Instant::now();
        asm.push(punch(CARD, 33, "10:09:00", 1), now);
        asm.push(punch(CARD, 31, "10:05:00", 1), now);
        let readout = asm.card_removed(StationId(1), None, &[]).unwrap();
        let codes: Vec<u16> = readout.punches.iter().map(|p| p.control_code.0).collect();
        assert_eq!(codes, vec![33, 31]);
    }

    fn from_card(card: u32, code: u16, at: &str) -> PunchEvent {
        punch(card, code, at, 9).with_origin(PunchOrigin::CardMemory)
    }

    /// Start, 31, 32, 33 and finish as radio punches.
    fn radio_run(asm: &mut ReadoutAssembler, finish: &str, now: Instant) -> Readout {
        asm.push(punch(CARD, 0, "10:00:00", 1).with_kind(PunchKind::Start), now);
        for (code, at) in [(31, "10:05:00"), (32, "10:10:00"), (33, "10:15:00")] {
            asm.push(punch(CARD, code, at, code), now);
        }
        asm.push(punch(CARD, 0, finish, 2).with_kind(PunchKind::Finish), now)
            .unwrap()
    }

    #[test]
    fn inactivity_times_out() {
        let mut asm = assembler();
        let start = Instant::now();
        asm.push(from_card(CARD, 31, "10:05:00"), start);
        asm.push(from_card(500001, 31, "10:05:00"), start + Duration::from_secs(20));

        let expired = asm.expire(start + Duration::from_secs(31));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].card_id.get(), CARD);
        assert!(expired[0].read_errors.contains(&ReadoutError::TimedOut));
        assert_eq!(asm.in_progress(), 1);
    }

    #[test]
    fn slow_radio_runner_stays_open() {
        let mut asm = assembler();
        let start = Instant::now();
        asm.push(punch(CARD, 0, "10:00:00", 1).with_kind(PunchKind::Start), start);
        asm.push(punch(CARD, 31, "10:05:00", 31), start);
        assert!(asm.expire(start + Duration::from_secs(3600)).is_empty());

        let later = start + Duration::from_secs(7200);
        asm.push(punch(CARD, 32, "12:00:00", 32), later);
        let readout = asm
            .push(punch(CARD, 0, "12:10:00", 2).with_kind(PunchKind::Finish), later)
            .unwrap();
        assert_eq!(readout.punches.len(), 2);
        assert!(readout.start_time.is_some());
        assert!(!readout.read_errors.contains(&ReadoutError::TimedOut));
    }

    #[test]
    fn card_read_after_radio_punch_keeps_every_control() {
        let mut asm = assembler();
        let now = Instant::now();
        asm.push(punch(CARD, 32, "10:10:00", 32), now);

        asm.push(from_card(CARD, 0, "10:00:00").with_kind(PunchKind::Start), now);
        for (code, at) in [(31, "10:05:00"), (32, "10:10:00"), (33, "10:15:00")] {
            asm.push(from_card(CARD, code, at), now);
        }
        asm.push(from_card(CARD, 0, "10:20:00").with_kind(PunchKind::Finish), now);
        let readout = asm.card_removed(StationId(9), Some(CardId::new(CARD).unwrap()), &[]).unwrap();

        let mut codes: Vec<u16> = readout.punches.iter().map(|p| p.control_code.0).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec![31, 32, 33]);
        assert!(readout.finish_time.is_some());
        assert_eq!(asm.duplicates(), 1);
    }

    #[test]
    fn readout_adding_nothing_is_dropped() {
        let mut asm = assembler();
        let now = Instant::now();
        radio_run(&mut asm, "10:20:00", now);

        // the card is read out afterwards, then a backup replays one control
        asm.push(from_card(CARD, 0, "10:00:00").with_kind(PunchKind::Start), now);
        asm.push(from_card(CARD, 31, "10:05:00"), now);
        asm.push(from_card(CARD, 0, "10:20:00").with_kind(PunchKind::Finish), now);
        assert!(asm.card_removed(StationId(9), None, &[]).is_none());

        asm.push(punch(CARD, 32, "10:10:00", 32).with_origin(PunchOrigin::Backup), now);
        assert!(asm.dump_finished(StationId(32), DumpOutcome::Complete).is_empty());
        assert_eq!(asm.redundant_dropped(), 2);
    }

    #[test]
    fn partial_readout_is_completed_from_previous() {
        let mut asm = assembler();
        let now = Instant::now();
        radio_run(&mut asm, "10:20:00", now);

        let second = asm
            .push(punch(CARD, 0, "10:25:00", 2).with_kind(PunchKind::Finish), now)
            .unwrap();
        assert_eq!(second.punches.len(), 3);
        assert_eq!(second.start_time.map(|t| t.to_string()).as_deref(), Some("10:00:00"));
        assert_eq!(second.finish_time.map(|t| t.to_string()).as_deref(), Some("10:25:00"));
    }

    #[test]
    fn previous_readouts_are_forgotten() {
        let mut asm = assembler().with_retention(Duration::from_secs(600));
        let now = Instant::now();
        radio_run(&mut asm, "10:20:00", now);
        assert_eq!(asm.remembered(), 1);

        asm.expire(now + Duration::from_secs(60));
        assert_eq!(asm.remembered(), 1);
        asm.expire(now + Duration::from_secs(601));
        assert_eq!(asm.remembered(), 0);

        // with nothing remembered the same punches are a new readout
        asm.push(from_card(CARD, 31, "10:05:00"), now);
        assert!(asm.card_removed(StationId(9), None, &[]).is_some());
    }

    #[test]
    fn backup_dump_completes_with_flags() {
        let mut asm = assembler();
        let now = Instant::now();
        let recovered = punch(CARD, 31, "10:05:00", 2).with_origin(PunchOrigin::Backup);
        asm.push(recovered, now);
        asm.push(punch(500001, 31, "10:06:00", 3), now);

        let done = asm.dump_finished(StationId(2), DumpOutcome::Truncated);
        assert_eq!(done.len(), 1);
        assert!(done[0].read_errors.contains(&ReadoutError::RecoveredFromBackup));
        assert!(done[0].read_errors.contains(&ReadoutError::TruncatedDump));

        let complete = asm.dump_finished(StationId(3), DumpOutcome::Complete);
        assert!(complete.is_empty());
    }

    #[test]
    fn backup_finish_does_not_complete_early() {
        let mut asm = assembler();
        let now = Instant::now();
        let finish = punch(CARD, 0, "10:20:00", 2)
            .with_kind(PunchKind::Finish)
            .with_origin(PunchOrigin::Backup);
        assert!(asm.push(finish, now).is_none());
        let done = asm.dump_finished(StationId(2), DumpOutcome::Complete);
        assert_eq!(done.len(), 1);
        assert!(!done[0].read_errors.contains(&ReadoutError::TruncatedDump));
    }

    #[test]
    fn closed_station_flushes_its_readouts() {
        let mut asm = assembler();
        let now = Instant::now();
        asm.push(punch(CARD, 31, "10:05:00", 1), now);
        asm.push(punch(500001, 31, "10:06:00", 1), now);
        asm.push(punch(500001, 32, "10:07:00", 2), now);

        let flushed = asm.station_closed(StationId(1), true);
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].read_errors.contains(&ReadoutError::ConnectionLost));
        assert_eq!(asm.drain().len(), 1);
    }

    #[test]
    fn empty_readout_is_dropped_and_counted() {
        let mut asm = assembler();
        let clear = punch(CARD, 0, "08:00:00", 1).with_kind(PunchKind::Clear);
        asm.push(clear, Instant::now());
        assert!(asm.card_removed(StationId(1), None, &[]).is_none());
        assert_eq!(asm.empty_dropped(), 1);
    }
}
