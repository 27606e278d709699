//! Decoder-originating throttle reconciliation (spec §4.6.4), grounded
//! in `original_source/server/src/train/train.cpp`'s handheld-step
//! handling: a handheld controller can nudge a single locomotive's
//! decoder directly, and the coordinator must decide whether that's
//! this train's own echo, a small correction worth holding briefly, or
//! a real change to propagate to every other powered vehicle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::speed_table::SpeedTable;

const HANDHELD_HOLD: Duration = Duration::from_millis(700);
const HANDHELD_HOLD_STEP_DELTA: i16 = 3;

#[derive(Debug, Clone, Copy)]
struct PendingHandheldChange {
    loco_idx: usize,
    step: u8,
    since: Instant,
}

#[derive(Debug, Default)]
pub struct DecoderThrottleCoordinator {
    /// The step this train last commanded for each loco index, so an
    /// inbound report that merely echoes it is ignored.
    last_commanded_step: HashMap<usize, u8>,
    pending: Option<PendingHandheldChange>,
}

impl DecoderThrottleCoordinator {
    pub fn note_commanded_step(&mut self, loco_idx: usize, step: u8) {
        self.last_commanded_step.insert(loco_idx, step);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandheldOutcome {
    /// The report matched this train's own last command; ignored.
    Echo,
    /// A small round-back correction; held briefly for more input.
    Hold,
    /// Committed: every powered decoder should be set to this table index.
    Commit(usize),
    /// The handheld overshot the train's achievable top entry; reverted
    /// and clamped to the train's max table index.
    ClampToMax(usize),
}

pub fn handle(
    state: &mut DecoderThrottleCoordinator,
    table: &SpeedTable,
    current_idx: usize,
    loco_idx: usize,
    step: u8,
    now: Instant,
) -> HandheldOutcome {
    if state.last_commanded_step.get(&loco_idx) == Some(&step) {
        return HandheldOutcome::Echo;
    }

    let max_idx = table.len().saturating_sub(1);
    if let Some(max_entry) = table.entry(max_idx) {
        if let Some(&max_step) = max_entry.steps.get(loco_idx) {
            if step > max_step {
                state.pending = None;
                return HandheldOutcome::ClampToMax(max_idx);
            }
        }
    }

    let matched_idx = table.closest_match_for_step(loco_idx, step);

    if matched_idx == current_idx {
        let current_step = table.entry(current_idx).and_then(|e| e.steps.get(loco_idx)).copied().unwrap_or(step);
        let delta = (step as i16 - current_step as i16).abs();
        if delta <= HANDHELD_HOLD_STEP_DELTA {
            state.pending = Some(PendingHandheldChange { loco_idx, step, since: now });
            return HandheldOutcome::Hold;
        }
    }

    state.pending = None;
    HandheldOutcome::Commit(matched_idx)
}

/// Resolves a held change once it has aged past [`HANDHELD_HOLD`]
/// without further input (spec §4.6.4 point 3).
pub fn expire(state: &mut DecoderThrottleCoordinator, table: &SpeedTable, now: Instant) -> Option<HandheldOutcome> {
    let pending = state.pending?;
    if now.duration_since(pending.since) < HANDHELD_HOLD {
        return None;
    }
    state.pending = None;
    let matched_idx = table.closest_match_for_step(pending.loco_idx, pending.step);
    Some(HandheldOutcome::Commit(matched_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::SpeedCurve;

    #[test]
    fn echo_of_own_command_is_ignored() {
        let table = SpeedTable::build(&[SpeedCurve::linear(10.0)]);
        let mut state = DecoderThrottleCoordinator::default();
        state.note_commanded_step(0, 50);
        let outcome = handle(&mut state, &table, 50, 0, 50, Instant::now());
        assert_eq!(outcome, HandheldOutcome::Echo);
    }

    #[test]
    fn small_round_back_is_held_and_not_yet_expired() {
        let table = SpeedTable::build(&[SpeedCurve::linear(10.0)]);
        let mut state = DecoderThrottleCoordinator::default();
        let outcome = handle(&mut state, &table, 50, 0, 51, Instant::now());
        assert_eq!(outcome, HandheldOutcome::Hold);
        assert!(expire(&mut state, &table, Instant::now()).is_none());
    }
}
