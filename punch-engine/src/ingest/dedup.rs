//! Duplicate punch suppression.

use std::collections::HashMap;

use chrono::Duration;

use crate::domain::{CardId, ControlCode, PunchEvent, PunchKind, PunchOrigin, PunchTime};

type Key = (CardId, ControlCode, PunchKind, PunchOrigin);

/// Drops bounces: the same card/control/kind arriving again by the same
/// route within `tolerance` of a kept punch.
///
/// Only punches within `tolerance` of the newest station time seen are
/// remembered. Repeats that arrive later, or by another route (a card
/// read after radio punches), are left to the assembler, which knows which
/// readout they belong to. A control punched twice minutes apart (a loop
/// course, say) is two punches.
#[derive(Debug)]
pub struct DedupWindow {
    tolerance: Duration,
    newest: Option<PunchTime>,
    seen: HashMap<Key, Vec<PunchTime>>,
}

impl DedupWindow {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            newest: None,
            seen: HashMap::new(),
        }
    }

    /// Record `punch`. Returns `false` if it duplicates a kept punch.
    pub fn admit(&mut self, punch: &PunchEvent) -> bool {
        if self.newest.is_none_or(|newest| punch.timestamp > newest) {
            self.newest = Some(punch.timestamp);
            self.prune();
        }

        let key = (punch.card_id, punch.control_code, punch.kind, punch.origin);
        let times = self.seen.entry(key).or_default();
        if times
            .iter()
            .any(|t| t.abs_diff(punch.timestamp) <= self.tolerance)
        {
            return false;
        }
        times.push(punch.timestamp);
        true
    }

    /// Forget punches too old to be bounced by anything still arriving.
    fn prune(&mut self) {
        let Some(horizon) = self
            .newest
            .and_then(|newest| newest.checked_sub(self.tolerance))
        else {
            return;
        };
        self.seen.retain(|_, times| {
            times.retain(|t| *t >= horizon);
            !times.is_empty()
        });
    }

    /// Number of distinct card/control/kind/origin combinations held.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StationId;
    use chrono::NaiveDate;

    fn at(ms: i64) -> PunchTime {
        let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
        PunchTime::parse_hms("10:00:00", date)
            .unwrap()
            .checked_add(Duration::milliseconds(ms))
            .unwrap()
    }

    fn punch(card: u32, code: u16, ms: i64) -> PunchEvent {
        PunchEvent::control(
            CardId::new(card).unwrap(),
            ControlCode(code),
            at(ms),
            StationId(1),
            0,
        )
    }

    #[test]
    fn bounce_within_tolerance_is_dropped() {
        let mut window = DedupWindow::new(Duration::seconds(2));
        assert!(window.admit(&punch(7203463, 31, 0)));
        assert!(!window.admit(&punch(7203463, 31, 500)));
        assert!(!window.admit(&punch(7203463, 31, -1500)));
    }

    #[test]
    fn outside_tolerance_or_other_key_is_kept() {
        let mut window = DedupWindow::new(Duration::seconds(2));
        assert!(window.admit(&punch(7203463, 31, 0)));
        assert!(window.admit(&punch(7203463, 31, 40_000)));
        assert!(window.admit(&punch(7203463, 32, 40_000)));
        assert!(window.admit(&punch(500001, 31, 40_000)));
        assert!(window.admit(&punch(7203463, 31, 40_000).with_kind(PunchKind::Finish)));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn card_memory_copy_of_radio_punch_is_kept() {
        let mut window = DedupWindow::new(Duration::seconds(2));
        assert!(window.admit(&punch(7203463, 31, 0)));
        assert!(window.admit(&punch(7203463, 31, 0).with_origin(PunchOrigin::CardMemory)));
        assert!(!window.admit(&punch(7203463, 31, 300).with_origin(PunchOrigin::CardMemory)));
    }

    #[test]
    fn window_forgets_punches_behind_newest() {
        let mut window = DedupWindow::new(Duration::seconds(2));
        for code in 31..41 {
            assert!(window.admit(&punch(1, code, 0)));
        }
        assert_eq!(window.len(), 10);

        assert!(window.admit(&punch(1, 50, 60_000)));
        assert_eq!(window.len(), 1);
        // a late copy of a forgotten punch is left to the assembler
        assert!(window.admit(&punch(1, 31, 1_000)));
        assert!(!window.admit(&punch(1, 50, 61_000)));
    }
}
