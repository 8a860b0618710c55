//! Card readouts: all punches recovered from one card for one race.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::card::CardId;
use super::ids::StationId;
use super::punch::{PunchEvent, PunchKind};
use super::time::PunchTime;

/// Irregularities noticed while assembling a readout.
///
/// None of these stop the readout from being checked; they are surfaced
/// to the operator alongside the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutError {
    /// Rebuilt from a station's backup memory rather than read live.
    RecoveredFromBackup,
    /// The backup download ended before its end-of-dump marker.
    TruncatedDump,
    /// Completed by inactivity rather than a finish punch or card removal.
    TimedOut,
    /// The card held punches without a time (old cards beyond 30 punches).
    UntimedPunches,
    /// The station connection dropped while the readout was open.
    ConnectionLost,
}

/// All punches for one card, ready for competitor resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readout {
    /// Card the punches came from.
    pub card_id: CardId,

    /// Check punch, if any.
    pub check_time: Option<PunchTime>,

    /// Start punch, if any.
    pub start_time: Option<PunchTime>,

    /// Control punches in the order they were received.
    pub punches: Vec<PunchEvent>,

    /// Finish punch, if any.
    pub finish_time: Option<PunchTime>,

    /// Irregularities noticed during assembly.
    pub read_errors: BTreeSet<ReadoutError>,

    /// Stations that contributed punches.
    pub stations: BTreeSet<StationId>,

    /// Wall-clock time the readout was completed. Later readouts of the
    /// same run supersede earlier ones.
    pub read_at: DateTime<Utc>,
}

impl Readout {
    /// Create an empty readout for a card.
    pub fn new(card_id: CardId, read_at: DateTime<Utc>) -> Self {
        Self {
            card_id,
            check_time: None,
            start_time: None,
            punches: Vec::new(),
            finish_time: None,
            read_errors: BTreeSet::new(),
            stations: BTreeSet::new(),
            read_at,
        }
    }

    /// Record a punch.
    ///
    /// Control punches are appended in arrival order. The first check and
    /// finish punch win; a later start punch replaces an earlier one, since
    /// a competitor may re-punch the start after a false start. Clear
    /// punches carry no timing information and are dropped.
    pub fn push(&mut self, punch: PunchEvent) {
        self.stations.insert(punch.source_station);
        match punch.kind {
            PunchKind::Control => self.punches.push(punch),
            PunchKind::Check => {
                self.check_time.get_or_insert(punch.timestamp);
            }
            PunchKind::Start => self.start_time = Some(punch.timestamp),
            PunchKind::Finish => {
                self.finish_time.get_or_insert(punch.timestamp);
            }
            PunchKind::Clear => {}
        }
    }

    /// Flag an irregularity.
    pub fn flag(&mut self, error: ReadoutError) {
        self.read_errors.insert(error);
    }

    /// Whether nothing useful was recorded.
    pub fn is_empty(&self) -> bool {
        self.punches.is_empty()
            && self.check_time.is_none()
            && self.start_time.is_none()
            && self.finish_time.is_none()
    }

    /// Latest timestamp anywhere on the readout.
    pub fn last_time(&self) -> Option<PunchTime> {
        self.punches
            .iter()
            .map(|p| p.timestamp)
            .chain(self.check_time)
            .chain(self.start_time)
            .chain(self.finish_time)
            .max()
    }
}
