//! Plain identifier newtypes.
//!
//! These carry no validation beyond their width; they exist so a station
//! number cannot be passed where a control code is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Code printed on a control flag and programmed into its station.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ControlCode(pub u16);

/// Number of a physical reader or relay source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StationId(pub u16);

/// A race stage (day) within a multi-day event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StageId(pub u32);

/// A run record: one competitor on one stage (or one relay leg).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub u64);

/// A course definition owned by the storage collaborator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CourseId(pub u32);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

display_inner!(ControlCode, StationId, StageId, RunId, CourseId);
