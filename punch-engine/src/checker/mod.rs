//! Course Checker.
//!
//! Walks a readout's punches against the course of the run it was
//! resolved to and produces a [`RunResult`]. Each control ends up
//! `Matched` or `Missed`; the run status follows from those states and
//! the check, start and finish times.
//!
//! Status precedence, highest first: NotCompeting, DidNotStart,
//! DidNotFinish, MisPunch, BadCheck, Disqualified, Ok.

mod classic;
mod free_order;

use chrono::Duration;
use tracing::debug;

use crate::domain::{
    CheckingMode, CompetitorRef, ControlCode, ControlState, ControlStatus, CourseDefinition,
    PunchTime, Readout, RunResult, RunStatus, SplitTime, StartInfo,
};

/// Checker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// How many controls beyond the next one a Classic punch may skip to.
    /// `None` searches the rest of the course.
    pub lookahead: Option<usize>,

    /// A check punch earlier than this before the start is a bad check.
    pub max_check_to_start: Duration,

    /// Until this time a readout without a finish is held back instead of
    /// being marked DidNotFinish.
    pub close_of_course: Option<PunchTime>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            lookahead: None,
            max_check_to_start: Duration::hours(1),
            close_of_course: None,
        }
    }
}

impl CheckerConfig {
    pub fn with_lookahead(mut self, lookahead: Option<usize>) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_max_check_to_start(mut self, max: Duration) -> Self {
        self.max_check_to_start = max;
        self
    }

    pub fn with_close_of_course(mut self, close: Option<PunchTime>) -> Self {
        self.close_of_course = close;
        self
    }
}

/// What checking a readout produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Checked(RunResult),
    /// No finish yet, and the course is still open.
    AwaitingCloseOfCourse,
}

/// Per-control states plus punches that matched nothing.
#[derive(Debug)]
struct Matching {
    states: Vec<ControlState>,
    extra: Vec<ControlCode>,
}

/// Validates readouts against courses.
#[derive(Debug, Clone, Default)]
pub struct CourseChecker {
    config: CheckerConfig,
}

impl CourseChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check `readout` for `run` on `course`. `now` is compared against
    /// the close of course.
    pub fn check(
        &self,
        readout: &Readout,
        run: &CompetitorRef,
        course: &CourseDefinition,
        start_info: &StartInfo,
        now: PunchTime,
    ) -> CheckOutcome {
        let mut punches = readout.punches.clone();
        punches.sort_by_key(|p| p.timestamp);

        let controls = course.controls();
        let Matching { states, extra } = match course.checking_mode() {
            CheckingMode::Classic => {
                classic::match_controls(controls, &punches, self.config.lookahead)
            }
            CheckingMode::FreeOrder => free_order::match_controls(controls, &punches),
        };

        let start = readout.start_time.or(start_info.scheduled_start);
        // Without a finish punch the last control stands in: the final
        // listed one in fixed order, the latest matched one in free order.
        let last_control = match course.checking_mode() {
            CheckingMode::Classic => match states[course.finish_index()] {
                ControlState::Matched { at, .. } => Some(at),
                _ => None,
            },
            CheckingMode::FreeOrder => states
                .iter()
                .filter_map(|state| match *state {
                    ControlState::Matched { at, .. } => Some(at),
                    _ => None,
                })
                .max(),
        };
        let finish = readout.finish_time.or(last_control);

        let missed_required = controls
            .iter()
            .zip(&states)
            .any(|(spec, state)| spec.is_required() && *state == ControlState::Missed);
        let bad_check = match (readout.check_time, start) {
            (Some(check), Some(start)) => {
                check.signed_duration_since(start) < -self.config.max_check_to_start
            }
            _ => false,
        };

        let status = if run.not_competing {
            RunStatus::NotCompeting
        } else if start.is_none() {
            RunStatus::DidNotStart
        } else if finish.is_none() {
            if self.config.close_of_course.is_some_and(|close| now < close) {
                debug!(card = %readout.card_id, run = %run.run_id, "no finish before close of course");
                return CheckOutcome::AwaitingCloseOfCourse;
            }
            RunStatus::DidNotFinish
        } else if missed_required {
            RunStatus::MisPunch
        } else if bad_check {
            RunStatus::BadCheck
        } else if run.disqualified {
            RunStatus::Disqualified
        } else {
            RunStatus::Ok
        };

        let total_time = match (start, finish) {
            (Some(start), Some(finish)) => {
                Some(finish.signed_duration_since(start) - start_info.handicap)
            }
            _ => None,
        };

        let result = RunResult {
            run_id: run.run_id,
            card_id: readout.card_id,
            status,
            splits: splits(&states),
            controls: controls
                .iter()
                .zip(&states)
                .enumerate()
                .map(|(position, (spec, state))| ControlStatus {
                    position,
                    code: spec.code,
                    required: spec.is_required(),
                    state: *state,
                })
                .collect(),
            extra_punches: extra,
            start_time: start,
            finish_time: finish,
            total_time,
            read_errors: readout.read_errors.clone(),
            readout_at: readout.read_at,
        };
        debug!(
            card = %readout.card_id,
            run = %run.run_id,
            status = ?result.status,
            "checked readout"
        );
        CheckOutcome::Checked(result)
    }
}

/// Deltas between consecutive matched controls, in punch-time order.
fn splits(states: &[ControlState]) -> Vec<SplitTime> {
    let mut matched: Vec<(usize, PunchTime, ControlCode)> = states
        .iter()
        .enumerate()
        .filter_map(|(position, state)| match *state {
            ControlState::Matched { at, punched } => Some((position, at, punched)),
            _ => None,
        })
        .collect();
    matched.sort_by_key(|&(position, at, _)| (at, position));

    matched
        .windows(2)
        .map(|pair| {
            let (_, previous, _) = pair[0];
            let (position, at, code) = pair[1];
            SplitTime {
                position,
                code,
                punch_time: at,
                split: at.signed_duration_since(previous),
            }
        })
        .collect()
}
