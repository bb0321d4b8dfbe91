// SPDX-License-Identifier: Apache-2.0
//! Type constraint solver (\u{00a7}4.3).
//!
//! Unifies every port's five-axis extent plus payload across all edges,
//! using one [`AxisUnifier`] per axis. Runs after default-source insertion
//! and before adapter insertion, so it sees direct edges only. When an
//! edge's endpoints disagree on a *concrete* axis value, that is not raised
//! as a solver conflict: it is recorded so the adapter pass (\u{00a7}4.4) can
//! try to bridge it. A conflict is only fatal here if, after the whole patch
//! has been processed, a port's own axis is still a variable — i.e.
//! genuinely unconstrained, not merely mismatched against its neighbor.

use crate::ident::BlockId;
use crate::patch::normalize::NormalizedPatch;
use crate::types::unify::AxisUnifier;
use crate::types::{Axis, Binding, Branch, CanonicalType, Cardinality, Extent, Payload, Perspective, Temporality};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors raised by the constraint solver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeSolveError {
    /// An axis on this port remained a type variable after fixpoint, with no
    /// constraint anywhere in the patch narrowing it.
    #[error("unresolved type on {block:?}.{port} ({direction}): axis {axis} never resolved")]
    UnresolvedType {
        block: BlockId,
        port: String,
        direction: &'static str,
        axis: &'static str,
    },
    /// A combine mode on a multi-edge input port is not valid for the port's
    /// resolved payload (SPEC_FULL "Per-axis combine validity").
    #[error("combine mode {combine_mode:?} is not valid for payload {payload:?} on {block:?}.{port}")]
    InvalidCombineMode {
        block: BlockId,
        port: String,
        combine_mode: crate::patch::CombineMode,
        payload: Payload,
    },
}

/// Identifies one port (input or output) on one block for solver bookkeeping.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct PortRef {
    block: BlockId,
    input: bool,
    port: String,
}

#[derive(Clone, Copy)]
struct PortVars {
    payload: crate::ident::TypeVarId,
    cardinality: crate::ident::TypeVarId,
    temporality: crate::ident::TypeVarId,
    binding: crate::ident::TypeVarId,
    perspective: crate::ident::TypeVarId,
    branch: crate::ident::TypeVarId,
}

/// Per-axis unification state plus the resolved type for every port, once
/// [`solve`] has run to fixpoint.
pub struct TypeSolveResult {
    pub resolved: FxHashMap<(BlockId, bool, String), CanonicalType>,
}

impl TypeSolveResult {
    #[must_use]
    pub fn port_type(&self, block: BlockId, input: bool, port: &str) -> Option<CanonicalType> {
        self.resolved
            .get(&(block, input, port.to_string()))
            .copied()
    }
}

struct Axes {
    payload: AxisUnifier<Payload>,
    cardinality: AxisUnifier<Cardinality>,
    temporality: AxisUnifier<Temporality>,
    binding: AxisUnifier<Binding>,
    perspective: AxisUnifier<Perspective>,
    branch: AxisUnifier<Branch>,
}

impl Axes {
    fn new() -> Self {
        Self {
            payload: AxisUnifier::new(),
            cardinality: AxisUnifier::new(),
            temporality: AxisUnifier::new(),
            binding: AxisUnifier::new(),
            perspective: AxisUnifier::new(),
            branch: AxisUnifier::new(),
        }
    }

    fn fresh_for(&mut self, ty: &CanonicalType) -> PortVars {
        PortVars {
            payload: bind_or_fresh(&mut self.payload, ty.payload),
            cardinality: bind_or_fresh(&mut self.cardinality, ty.extent.cardinality),
            temporality: bind_or_fresh(&mut self.temporality, ty.extent.temporality),
            binding: bind_or_fresh(&mut self.binding, ty.extent.binding),
            perspective: bind_or_fresh(&mut self.perspective, ty.extent.perspective),
            branch: bind_or_fresh(&mut self.branch, ty.extent.branch),
        }
    }
}

fn bind_or_fresh<T: PartialEq + Copy>(
    u: &mut AxisUnifier<T>,
    axis: Axis<T>,
) -> crate::ident::TypeVarId {
    match axis {
        Axis::Inst(v) => u.fresh_bound(v),
        Axis::Var(_) => u.fresh(),
    }
}

/// Merges `a` and `b`'s equivalence classes only when doing so would not
/// override an already-concrete, disagreeing value — i.e. it never forces a
/// conflict, it just declines to merge when one exists, leaving the
/// mismatch for the adapter pass to see on each port's own resolved type.
fn soft_unify<T: PartialEq + Copy>(u: &mut AxisUnifier<T>, a: crate::ident::TypeVarId, b: crate::ident::TypeVarId) {
    let ra = u.resolved(a);
    let rb = u.resolved(b);
    if let (Some(x), Some(y)) = (ra, rb) {
        if x != y {
            return;
        }
    }
    let _ = u.unify(a, b);
}

/// Runs the solver to fixpoint over a normalized, default-source-expanded
/// patch and validates that every port ends fully concrete.
///
/// # Errors
/// Returns every [`TypeSolveError`] collected in this pass (\u{00a7}7
/// propagation policy: halt at end of pass, return everything collected).
pub fn solve(patch: &NormalizedPatch) -> Result<TypeSolveResult, Vec<TypeSolveError>> {
    let mut axes = Axes::new();
    let mut vars: FxHashMap<PortRef, PortVars> = FxHashMap::default();

    for block in &patch.blocks {
        for p in &block.input_ports {
            let pv = axes.fresh_for(&p.declared_type);
            vars.insert(
                PortRef {
                    block: block.id,
                    input: true,
                    port: p.id.clone(),
                },
                pv,
            );
        }
        for p in &block.output_ports {
            let pv = axes.fresh_for(&p.declared_type);
            vars.insert(
                PortRef {
                    block: block.id,
                    input: false,
                    port: p.id.clone(),
                },
                pv,
            );
        }
    }

    for edge in &patch.edges {
        if !edge.enabled {
            continue;
        }
        let from = vars.get(&PortRef {
            block: edge.from_block,
            input: false,
            port: edge.from_port.clone(),
        });
        let to = vars.get(&PortRef {
            block: edge.to_block,
            input: true,
            port: edge.to_port.clone(),
        });
        let (Some(from), Some(to)) = (from.copied(), to.copied()) else {
            continue;
        };
        soft_unify(&mut axes.payload, from.payload, to.payload);
        soft_unify(&mut axes.cardinality, from.cardinality, to.cardinality);
        soft_unify(&mut axes.temporality, from.temporality, to.temporality);
        soft_unify(&mut axes.binding, from.binding, to.binding);
        soft_unify(&mut axes.perspective, from.perspective, to.perspective);
        soft_unify(&mut axes.branch, from.branch, to.branch);
    }

    let mut errors = Vec::new();
    let mut resolved = FxHashMap::default();
    for (port_ref, pv) in &vars {
        let direction = if port_ref.input { "input" } else { "output" };
        macro_rules! require {
            ($unifier:expr, $var:expr, $axis_name:literal) => {
                match $unifier.resolved($var) {
                    Some(v) => Some(v),
                    None => {
                        errors.push(TypeSolveError::UnresolvedType {
                            block: port_ref.block,
                            port: port_ref.port.clone(),
                            direction,
                            axis: $axis_name,
                        });
                        None
                    }
                }
            };
        }
        let payload = require!(axes.payload, pv.payload, "payload");
        let cardinality = require!(axes.cardinality, pv.cardinality, "cardinality");
        let temporality = require!(axes.temporality, pv.temporality, "temporality");
        let binding = require!(axes.binding, pv.binding, "binding");
        let perspective = require!(axes.perspective, pv.perspective, "perspective");
        let branch = require!(axes.branch, pv.branch, "branch");

        if let (Some(payload), Some(cardinality), Some(temporality), Some(binding), Some(perspective), Some(branch)) =
            (payload, cardinality, temporality, binding, perspective, branch)
        {
            resolved.insert(
                (port_ref.block, port_ref.input, port_ref.port.clone()),
                CanonicalType {
                    payload: Axis::Inst(payload),
                    extent: Extent {
                        cardinality: Axis::Inst(cardinality),
                        temporality: Axis::Inst(temporality),
                        binding: Axis::Inst(binding),
                        perspective: Axis::Inst(perspective),
                        branch: Axis::Inst(branch),
                    },
                },
            );
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    validate_combine_modes(patch, &resolved, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TypeSolveResult { resolved })
}

fn validate_combine_modes(
    patch: &NormalizedPatch,
    resolved: &FxHashMap<(BlockId, bool, String), CanonicalType>,
    errors: &mut Vec<TypeSolveError>,
) {
    use crate::patch::CombineMode;
    for block in &patch.blocks {
        for port in &block.input_ports {
            let incoming: Vec<_> = patch
                .edges
                .iter()
                .filter(|e| e.enabled && e.to_block == block.id && e.to_port == port.id)
                .collect();
            if incoming.len() < 2 {
                continue;
            }
            let Some(ty) = resolved.get(&(block.id, true, port.id.clone())) else {
                continue;
            };
            let Axis::Inst(payload) = ty.payload else {
                continue;
            };
            for edge in incoming {
                let numeric_only = matches!(
                    edge.combine_mode,
                    CombineMode::Additive | CombineMode::Max | CombineMode::Min | CombineMode::Mul
                );
                let payload_supports_numeric = matches!(
                    payload,
                    Payload::Float | Payload::Int | Payload::Vec2 | Payload::Vec3 | Payload::Color
                );
                if numeric_only && !payload_supports_numeric {
                    errors.push(TypeSolveError::InvalidCombineMode {
                        block: block.id,
                        port: port.id.clone(),
                        combine_mode: edge.combine_mode,
                        payload,
                    });
                }
            }
        }
    }
}
