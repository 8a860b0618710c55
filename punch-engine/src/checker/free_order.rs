//! Any-order matching.

use crate::domain::{ControlSpec, ControlState, PunchEvent};

use super::Matching;

/// Match punches to controls ignoring order.
///
/// Required controls are matched first as a maximum bipartite matching,
/// so a punch accepted by two controls (through alternates) goes where it
/// completes the course. Optional controls then take any punch left over.
pub(super) fn match_controls(controls: &[ControlSpec], punches: &[PunchEvent]) -> Matching {
    let accepting: Vec<Vec<usize>> = controls
        .iter()
        .map(|spec| {
            (0..punches.len())
                .filter(|&p| spec.accepts(punches[p].control_code))
                .collect()
        })
        .collect();

    let mut owner: Vec<Option<usize>> = vec![None; punches.len()];
    for c in (0..controls.len()).filter(|&c| controls[c].is_required()) {
        let mut seen = vec![false; punches.len()];
        augment(c, &accepting, &mut owner, &mut seen);
    }
    for c in (0..controls.len()).filter(|&c| !controls[c].is_required()) {
        if let Some(&p) = accepting[c].iter().find(|&&p| owner[p].is_none()) {
            owner[p] = Some(c);
        }
    }

    let mut states = vec![ControlState::Missed; controls.len()];
    for (p, c) in owner.iter().enumerate() {
        if let Some(c) = *c {
            states[c] = ControlState::Matched {
                at: punches[p].timestamp,
                punched: punches[p].control_code,
            };
        }
    }

    // leftovers for a control already matched are repeats, not extras
    let extra = (0..punches.len())
        .filter(|&p| owner[p].is_none())
        .map(|p| punches[p].control_code)
        .filter(|&code| {
            !controls.iter().zip(&states).any(|(spec, state)| {
                matches!(state, ControlState::Matched { .. }) && spec.accepts(code)
            })
        })
        .collect();

    Matching { states, extra }
}

/// Kuhn's augmenting path step for control `c`.
fn augment(
    c: usize,
    accepting: &[Vec<usize>],
    owner: &mut [Option<usize>],
    seen: &mut [bool],
) -> bool {
    for &p in &accepting[c] {
        if seen[p] {
            continue;
        }
        seen[p] = true;
        let free = match owner[p] {
            None => true,
            Some(other) => augment(other, accepting, owner, seen),
        };
        if free {
            owner[p] = Some(c);
            return true;
        }
    }
    false
}
