//! Domain types for the punch acquisition engine.
//!
//! This module contains the value types that flow through the pipeline:
//! punches, readouts, courses, runs and results. Types with invariants
//! enforce them at construction time, so code that receives them can trust
//! their validity.

mod card;
mod course;
mod error;
mod ids;
mod punch;
mod readout;
mod run;
mod time;

pub use card::{CardId, InvalidCardId};
pub use course::{CheckingMode, ControlSpec, CourseDefinition};
pub use error::DomainError;
pub use ids::{ControlCode, CourseId, RunId, StageId, StationId};
pub use punch::{PunchEvent, PunchKind, PunchOrigin};
pub use readout::{Readout, ReadoutError};
pub use run::{
    CompetitorRef, ControlState, ControlStatus, RunResult, RunStatus, SplitTime, StartInfo,
};
pub use time::{HALF_DAY_SECS, PunchTime, TimeError, unwrap_half_day_sequence};
