// SPDX-License-Identifier: Apache-2.0
//! Schedule construction (\u{00a7}4.9): orders a [`BoundProgram`]'s steps into
//! the three execution phases the runtime depends on.
//!
//! Binding (`compiler::bind`) already assigns every step a deterministic
//! *request* order (sorted port keys, then state-decl order); this pass only
//! regroups that sequence into phases, never reorders within a phase. The
//! three phases are fixed by \u{00a7}4.9/\u{00a7}4.10:
//!
//! 1. non-state-write compute: `EvalValue`, `Materialize`,
//!    `ContinuityMapBuild`, `ContinuityApply`.
//! 2. render assembly: `Render`.
//! 3. state writes: `StateWrite`, `FieldStateWrite`.
//!
//! Deferring state writes to phase 3 is what lets every phase-1 `State`
//! read observe the *previous* frame's value (\u{00a7}8 invariant 6).

use super::bind::BoundProgram;
use crate::ir::Step;

/// Partitions a [`BoundProgram`]'s steps into the three-phase frame order.
/// A stable partition: steps within a phase keep the relative order binding
/// gave them, so determinism carries through unchanged (\u{00a7}8 invariant 1).
#[must_use]
pub fn schedule(bound: BoundProgram) -> Vec<Step> {
    let mut compute = Vec::with_capacity(bound.steps.len());
    let mut render = Vec::new();
    let mut state_write = Vec::new();

    for step in bound.steps {
        match step {
            Step::EvalValue { .. }
            | Step::Materialize { .. }
            | Step::ContinuityMapBuild { .. }
            | Step::ContinuityApply { .. } => compute.push(step),
            Step::Render { .. } => render.push(step),
            Step::StateWrite { .. } | Step::FieldStateWrite { .. } => state_write.push(step),
        }
    }

    compute.extend(render);
    compute.extend(state_write);
    compute
}

/// Returns the index of the first phase-2 (`Render`) step in an already
/// scheduled sequence, or `schedule.len()` if there is none. Used by the
/// runtime driver to know where phase 1 ends without re-deriving phase
/// membership from each step's variant on every frame.
#[must_use]
pub fn render_phase_start(schedule: &[Step]) -> usize {
    schedule
        .iter()
        .position(|s| matches!(s, Step::Render { .. }))
        .unwrap_or(schedule.len())
}

/// Returns the index of the first phase-3 (state-write) step, or
/// `schedule.len()` if there is none.
#[must_use]
pub fn state_write_phase_start(schedule: &[Step]) -> usize {
    schedule
        .iter()
        .position(|s| matches!(s, Step::StateWrite { .. } | Step::FieldStateWrite { .. }))
        .unwrap_or(schedule.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{InstanceId, StateSlotId, ValueExprId, ValueSlot};

    fn bound(steps: Vec<Step>) -> BoundProgram {
        BoundProgram {
            exprs: Vec::new(),
            steps,
            slot_meta: Vec::new(),
            state_meta: Vec::new(),
            debug_index: crate::ir::DebugIndex::default(),
        }
    }

    #[test]
    fn phases_are_ordered_compute_then_render_then_state_write() {
        let steps = vec![
            Step::StateWrite {
                state_slot: StateSlotId(0),
                value_expr: ValueExprId(0),
            },
            Step::Render {
                instance: InstanceId([0; 32]),
                position_slot: ValueSlot(0),
                color_slot: ValueSlot(1),
                size_slot: None,
                rotation_slot: None,
                scale2_slot: None,
                shape: crate::ir::ShapeSource::Uniform(0),
            },
            Step::EvalValue {
                expr: ValueExprId(1),
                target_slot: ValueSlot(2),
            },
        ];
        let scheduled = schedule(bound(steps));
        assert!(matches!(scheduled[0], Step::EvalValue { .. }));
        assert!(matches!(scheduled[1], Step::Render { .. }));
        assert!(matches!(scheduled[2], Step::StateWrite { .. }));
        assert_eq!(render_phase_start(&scheduled), 1);
        assert_eq!(state_write_phase_start(&scheduled), 2);
    }

    #[test]
    fn relative_order_within_a_phase_is_preserved() {
        let steps = vec![
            Step::EvalValue {
                expr: ValueExprId(0),
                target_slot: ValueSlot(0),
            },
            Step::EvalValue {
                expr: ValueExprId(1),
                target_slot: ValueSlot(1),
            },
        ];
        let scheduled = schedule(bound(steps));
        match (&scheduled[0], &scheduled[1]) {
            (Step::EvalValue { expr: a, .. }, Step::EvalValue { expr: b, .. }) => {
                assert_eq!(a.0, 0);
                assert_eq!(b.0, 1);
            }
            _ => unreachable!(),
        }
    }
}
