//! Fixed-order matching.

use crate::domain::{ControlSpec, ControlState, PunchEvent};

use super::Matching;

/// Walk the punches against the course in order.
///
/// A punch that is not the next control is looked for among the following
/// pending controls, at most `lookahead` beyond the next one (`None` for
/// no limit). On a hit, the controls skipped over are missed and the walk
/// continues after the hit. Controls marked `out_of_order` are matched
/// wherever they appear.
pub(super) fn match_controls(
    controls: &[ControlSpec],
    punches: &[PunchEvent],
    lookahead: Option<usize>,
) -> Matching {
    let mut states = vec![ControlState::Pending; controls.len()];
    let ordered: Vec<usize> = (0..controls.len())
        .filter(|&i| !controls[i].out_of_order)
        .collect();
    let mut cursor: usize = 0;
    let mut extra = Vec::new();

    for punch in punches {
        let code = punch.control_code;
        let window_end = match lookahead {
            Some(n) => cursor.saturating_add(n + 1).min(ordered.len()),
            None => ordered.len(),
        };

        if let Some(offset) = ordered[cursor..window_end]
            .iter()
            .position(|&i| controls[i].accepts(code))
        {
            let hit = cursor + offset;
            for &skipped in &ordered[cursor..hit] {
                states[skipped] = ControlState::Missed;
            }
            states[ordered[hit]] = ControlState::Matched {
                at: punch.timestamp,
                punched: code,
            };
            cursor = hit + 1;
            continue;
        }

        if let Some(i) = (0..controls.len()).find(|&i| {
            controls[i].out_of_order
                && states[i] == ControlState::Pending
                && controls[i].accepts(code)
        }) {
            states[i] = ControlState::Matched {
                at: punch.timestamp,
                punched: code,
            };
            continue;
        }

        // a control punched twice is not an extra punch
        let repeat = (0..controls.len()).any(|i| {
            matches!(states[i], ControlState::Matched { .. }) && controls[i].accepts(code)
        });
        if !repeat {
            extra.push(code);
        }
    }

    for state in &mut states {
        if *state == ControlState::Pending {
            *state = ControlState::Missed;
        }
    }
    Matching { states, extra }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardId, ControlCode, PunchTime, StationId};
    use chrono::NaiveDate;

    fn punches(codes: &[u16]) -> Vec<PunchEvent> {
        let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                let at = PunchTime::parse_hms(&format!("10:{:02}:00", i + 1), date).unwrap();
                PunchEvent::control(CardId::new(1).unwrap(), ControlCode(*code), at, StationId(1), 0)
            })
            .collect()
    }

    fn course(codes: &[u16]) -> Vec<ControlSpec> {
        codes.iter().map(|c| ControlSpec::new(ControlCode(*c))).collect()
    }

    fn matched(m: &Matching) -> Vec<bool> {
        m.states
            .iter()
            .map(|s| matches!(s, ControlState::Matched { .. }))
            .collect()
    }

    #[test]
    fn skip_marks_intermediate_missed() {
        let m = match_controls(&course(&[31, 32, 33, 34]), &punches(&[31, 33, 34]), None);
        assert_eq!(matched(&m), vec![true, false, true, true]);
        assert_eq!(m.states[1], ControlState::Missed);
        assert!(m.extra.is_empty());
    }

    #[test]
    fn lookahead_bounds_the_skip() {
        let controls = course(&[31, 32, 33, 34]);
        let m = match_controls(&controls, &punches(&[31, 34, 32, 33]), Some(1));
        // 34 is two beyond the next control: extra, not a skip
        assert_eq!(matched(&m), vec![true, true, true, false]);
        assert_eq!(m.extra, vec![ControlCode(34)]);

        let m = match_controls(&controls, &punches(&[31, 34, 32, 33]), None);
        assert_eq!(matched(&m), vec![true, false, false, true]);
        assert_eq!(m.extra, vec![ControlCode(32), ControlCode(33)]);
    }

    #[test]
    fn repeated_punch_is_ignored() {
        let m = match_controls(&course(&[31, 32]), &punches(&[31, 31, 32]), None);
        assert_eq!(matched(&m), vec![true, true]);
        assert!(m.extra.is_empty());
    }

    #[test]
    fn loop_course_uses_each_code_twice() {
        let m = match_controls(&course(&[31, 40, 32, 40]), &punches(&[31, 40, 32, 40]), None);
        assert_eq!(matched(&m), vec![true, true, true, true]);
    }

    #[test]
    fn out_of_order_control_matches_anywhere() {
        let mut controls = course(&[31, 32, 33]);
        controls.insert(1, ControlSpec::new(ControlCode(90)).unordered());
        let m = match_controls(&controls, &punches(&[31, 32, 90, 33]), None);
        assert_eq!(matched(&m), vec![true, true, true, true]);
    }

    #[test]
    fn alternates_accepted_in_sequence() {
        let controls = vec![
            ControlSpec::new(ControlCode(31)),
            ControlSpec::new(ControlCode(32)).with_alternate(ControlCode(132)),
        ];
        let m = match_controls(&controls, &punches(&[31, 132]), None);
        assert_eq!(
            m.states[1],
            ControlState::Matched {
                at: punches(&[0, 0])[1].timestamp,
                punched: ControlCode(132)
            }
        );
    }
}
