// SPDX-License-Identifier: Apache-2.0
//! Time resolution (\u{00a7}4.5).
//!
//! Exactly one `TimeRoot` block must exist in the patch. It declares a time
//! model (`infinite`, `finite`, or `driven`) and this pass derives the
//! canonical time rails every other block may read: `dt`, `phaseA`,
//! `phaseB`, optional `wrapEvent`, `progress01`. Rails may be driven
//! (parameters latched one frame) or overridden (output replaced by a patch
//! signal) but never fed back instantaneously — that is an algebraic loop.

use crate::ident::BlockId;
use crate::ir::TimeModel;
use crate::patch::normalize::NormalizedPatch;
use thiserror::Error;

pub const TIME_ROOT_KIND: &str = "TimeRoot";

/// The resolved time authority for a compiled program.
#[derive(Clone, Debug)]
pub struct ResolvedTime {
    pub root_block: BlockId,
    pub model: TimeModel,
    pub has_wrap_event: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeResolveError {
    #[error("patch has no TimeRoot block")]
    NoTimeRoot,
    #[error("patch has multiple TimeRoot blocks: {0:?}")]
    MultipleTimeRoots(Vec<BlockId>),
    /// A rail was fed back into one of its own driving parameters within the
    /// same frame, rather than latched or overridden (\u{00a7}4.5 Rule).
    #[error("algebraic loop at time instant through rail consumer {0:?}")]
    AlgebraicLoop(BlockId),
}

/// Finds the single `TimeRoot` block and derives its time model.
///
/// # Errors
/// [`TimeResolveError::NoTimeRoot`] / [`MultipleTimeRoots`](TimeResolveError::MultipleTimeRoots)
/// if the patch doesn't declare exactly one, and
/// [`AlgebraicLoop`](TimeResolveError::AlgebraicLoop) if a rail consumer feeds
/// its own rail input without going through a memory-boundary primitive
/// (\u{00a7}4.6) in the same tick.
pub fn resolve(patch: &NormalizedPatch) -> Result<ResolvedTime, TimeResolveError> {
    let roots: Vec<&crate::patch::Block> = patch
        .blocks
        .iter()
        .filter(|b| b.kind == TIME_ROOT_KIND)
        .collect();

    match roots.len() {
        0 => Err(TimeResolveError::NoTimeRoot),
        1 => {
            let root = roots[0];
            let model = parse_model(root);
            let has_wrap_event = matches!(model, TimeModel::Finite { .. });
            check_no_instantaneous_feedback(patch, root.id)?;
            Ok(ResolvedTime {
                root_block: root.id,
                model,
                has_wrap_event,
            })
        }
        _ => Err(TimeResolveError::MultipleTimeRoots(
            roots.iter().map(|b| b.id).collect(),
        )),
    }
}

fn parse_model(root: &crate::patch::Block) -> TimeModel {
    use crate::patch::ParamValue;
    match root.params.get("mode") {
        Some(ParamValue::Text(t)) if t == "finite" => {
            let period_ms = match root.params.get("period_ms") {
                Some(ParamValue::Float(f)) => *f,
                Some(ParamValue::Int(i)) => *i as f64,
                _ => 1000.0,
            };
            TimeModel::Finite { period_ms }
        }
        Some(ParamValue::Text(t)) if t == "driven" => TimeModel::Driven,
        _ => {
            let speed = match root.params.get("speed") {
                Some(ParamValue::Float(f)) => *f,
                Some(ParamValue::Int(i)) => *i as f64,
                _ => 1.0,
            };
            TimeModel::Infinite { speed }
        }
    }
}

/// A direct edge from the `TimeRoot`'s own rail outputs back into one of its
/// own parameter inputs, with no memory-boundary primitive between them,
/// forms an algebraic loop at the same time instant (\u{00a7}4.5). This check is
/// a direct-edge approximation: the full cycle-legality analysis (which
/// would also catch longer paths) runs later in
/// [`crate::compiler::dependency_graph`]; this pass only rejects the
/// specific zero-hop case the spec calls out ("never be fed back
/// instantaneously") before that broader pass even runs.
fn check_no_instantaneous_feedback(
    patch: &NormalizedPatch,
    root: BlockId,
) -> Result<(), TimeResolveError> {
    for edge in &patch.edges {
        if edge.enabled && edge.from_block == root && edge.to_block == root {
            return Err(TimeResolveError::AlgebraicLoop(root));
        }
    }
    Ok(())
}
