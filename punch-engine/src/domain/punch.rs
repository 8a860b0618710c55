//! Punch events: the unit flowing through the ingestion queue.

use serde::{Deserialize, Serialize};

use super::card::CardId;
use super::ids::{ControlCode, StationId};
use super::time::PunchTime;

/// What a punch records on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchKind {
    /// A course control.
    Control,
    /// Pre-start verification that the card was cleared and is working.
    Check,
    /// Start unit.
    Start,
    /// Finish unit.
    Finish,
    /// Card memory cleared before the race.
    Clear,
}

/// Where a punch was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchOrigin {
    /// Sent by a station as it happened.
    Live,
    /// Read out of the card's own memory at a readout station.
    CardMemory,
    /// Downloaded from a station's backup memory after the fact.
    Backup,
}

/// A single timestamped punch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunchEvent {
    /// Card that was punched.
    pub card_id: CardId,

    /// Code of the control (meaningful for [`PunchKind::Control`]).
    pub control_code: ControlCode,

    /// Station clock time of the punch.
    pub timestamp: PunchTime,

    /// Station that reported the punch.
    pub source_station: StationId,

    /// Station-assigned record number, or a local counter when the
    /// station does not number its records.
    pub sequence_no: u32,

    /// What the punch records.
    pub kind: PunchKind,

    /// How the punch reached us.
    pub origin: PunchOrigin,
}

impl PunchEvent {
    /// Create a live control punch.
    pub fn control(
        card_id: CardId,
        control_code: ControlCode,
        timestamp: PunchTime,
        source_station: StationId,
        sequence_no: u32,
    ) -> Self {
        Self {
            card_id,
            control_code,
            timestamp,
            source_station,
            sequence_no,
            kind: PunchKind::Control,
            origin: PunchOrigin::Live,
        }
    }

    /// Returns the same punch with a different kind.
    pub fn with_kind(mut self, kind: PunchKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the same punch with a different origin.
    pub fn with_origin(mut self, origin: PunchOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Whether this punch terminates a readout.
    pub fn is_finish(&self) -> bool {
        self.kind == PunchKind::Finish
    }
}
