//! Readouts waiting for an operator, and the notices raised about them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    CardId, CompetitorRef, PunchTime, Readout, ReadoutError, RunId, RunStatus, StationId,
};
use crate::publisher::PublishOutcome;

/// Why a readout could not be published on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PendingReason {
    UnknownCard,
    Ambiguous {
        candidates: Vec<CompetitorRef>,
    },
    NotYetStarted {
        run: CompetitorRef,
    },
    /// The run already has a result with a different finish time.
    ConflictingRereads {
        run: CompetitorRef,
        previous_finish: PunchTime,
        finish: Option<PunchTime>,
    },
    /// No finish yet and the course has not closed.
    AwaitingCloseOfCourse {
        run: CompetitorRef,
    },
    DirectoryUnavailable {
        message: String,
    },
}

/// A parked readout. `id` stays the same across retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReadout {
    pub id: u64,
    pub reason: PendingReason,
    pub readout: Readout,
    pub since: DateTime<Utc>,
}

/// What became of a readout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    Published {
        run_id: RunId,
        status: RunStatus,
        outcome: PublishOutcome,
    },
    Pending {
        id: u64,
        reason: PendingReason,
    },
}

/// Messages for whoever is watching the operator console.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum OperatorNotice {
    Pending {
        id: u64,
        card: CardId,
        reason: PendingReason,
    },
    ReadoutFlagged {
        card: CardId,
        errors: Vec<ReadoutError>,
    },
    StaleResult {
        run_id: RunId,
        card: CardId,
    },
    LinkLost {
        station: StationId,
        reason: String,
    },
}
