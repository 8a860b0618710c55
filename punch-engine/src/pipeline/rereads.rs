//! Finish times of runs that already have a result.

use std::collections::HashMap;

use chrono::Duration;

use crate::domain::{PunchTime, RunId};

/// Remembers the finish time each published run was checked with, so a
/// second readout with a different finish is caught instead of silently
/// replacing the first.
#[derive(Debug)]
pub struct RereadRegistry {
    tolerance: Duration,
    finishes: HashMap<RunId, PunchTime>,
}

impl RereadRegistry {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            finishes: HashMap::new(),
        }
    }

    /// The finish already recorded for `run`, if `finish` differs from it
    /// by more than the tolerance.
    pub fn conflict(&self, run: RunId, finish: Option<PunchTime>) -> Option<PunchTime> {
        let previous = *self.finishes.get(&run)?;
        let finish = finish?;
        (finish.abs_diff(previous) > self.tolerance).then_some(previous)
    }

    pub fn record(&mut self, run: RunId, finish: Option<PunchTime>) {
        if let Some(finish) = finish {
            self.finishes.insert(run, finish);
        }
    }
}
