//! Run records and validated results.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::card::CardId;
use super::ids::{ControlCode, CourseId, RunId, StageId};
use super::readout::ReadoutError;
use super::time::PunchTime;

/// A live run that a card may belong to, as seen by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorRef {
    /// Run record to attach the result to.
    pub run_id: RunId,

    /// Display name, for operator notices.
    #[serde(default)]
    pub name: String,

    /// Stage the run belongs to.
    pub stage: StageId,

    /// Relay leg, if the run is part of a relay.
    #[serde(default)]
    pub leg: Option<u8>,

    /// Card registered for the run.
    pub card_id: CardId,

    /// Course the run must complete.
    pub course_id: CourseId,

    /// Run is outside the competition (e.g. running out of class).
    #[serde(default)]
    pub not_competing: bool,

    /// Disqualified by the organiser regardless of punches.
    #[serde(default)]
    pub disqualified: bool,
}

/// Start list data for a run, supplied by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartInfo {
    /// Start time from the start list. Used when the card has no start punch.
    #[serde(default)]
    pub scheduled_start: Option<PunchTime>,

    /// Signed offset added to the start before computing the running time.
    #[serde(default, with = "duration_ms")]
    pub handicap: Duration,
}

/// Terminal outcome of checking a readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Disqualified,
    MisPunch,
    BadCheck,
    DidNotStart,
    DidNotFinish,
    NotCompeting,
}

impl RunStatus {
    /// Numeric status used by live-results services.
    pub fn live_code(&self) -> u8 {
        match self {
            RunStatus::Ok => 1,
            RunStatus::MisPunch => 3,
            RunStatus::DidNotFinish => 4,
            RunStatus::Disqualified | RunStatus::BadCheck => 5,
            RunStatus::DidNotStart => 20,
            RunStatus::NotCompeting => 99,
        }
    }
}

/// State of one course control after checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControlState {
    Pending,
    Matched { at: PunchTime, punched: ControlCode },
    Missed,
}

/// Per-control verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStatus {
    /// Position on the course.
    pub position: usize,

    /// Code the course expects here.
    pub code: ControlCode,

    /// Whether missing it is a mispunch.
    pub required: bool,

    #[serde(flatten)]
    pub state: ControlState,
}

/// Time between two consecutive matched controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTime {
    /// Course position of the control this split ends at.
    pub position: usize,

    /// Code punched.
    pub code: ControlCode,

    /// When it was punched.
    pub punch_time: PunchTime,

    /// Time since the previous matched control.
    #[serde(with = "duration_ms")]
    pub split: Duration,
}

/// The validated result of one readout for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub card_id: CardId,
    pub status: RunStatus,
    pub splits: Vec<SplitTime>,
    pub controls: Vec<ControlStatus>,
    /// Punched codes that matched no control.
    pub extra_punches: Vec<ControlCode>,
    pub start_time: Option<PunchTime>,
    pub finish_time: Option<PunchTime>,
    #[serde(with = "duration_ms::option")]
    pub total_time: Option<Duration>,
    pub read_errors: BTreeSet<ReadoutError>,
    /// Completion time of the readout this result was derived from.
    pub readout_at: DateTime<Utc>,
}

impl RunResult {
    /// Whether two results describe the same outcome, ignoring which
    /// readout they came from.
    pub fn same_outcome(&self, other: &RunResult) -> bool {
        self.run_id == other.run_id
            && self.card_id == other.card_id
            && self.status == other.status
            && self.splits == other.splits
            && self.controls == other.controls
            && self.extra_punches == other.extra_punches
            && self.start_time == other.start_time
            && self.finish_time == other.finish_time
            && self.total_time == other.total_time
    }
}

/// Serde helpers storing a [`Duration`] as signed milliseconds.
pub(crate) mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::milliseconds)
    }

    pub mod option {
        use chrono::Duration;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&d.num_milliseconds()),
                None => s.serialize_none(),
            }
        }

        #[allow(dead_code)]
        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<i64>::deserialize(d).map(|ms| ms.map(Duration::milliseconds))
        }
    }
}
