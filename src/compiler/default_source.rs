// SPDX-License-Identifier: Apache-2.0
//! Default-source insertion (\u{00a7}4.2).
//!
//! Runs immediately after normalization, before type constraint solving.
//! Every input port with no incoming edge gets a synthesized, payload-generic
//! `DefaultSource` block wired to it; the block's output type shares the
//! target port's extent axes (so later unification sees them as already
//! equal) but gets a *fresh* payload variable, which the solver then narrows
//! using whatever other constraints apply to that port. The concrete
//! lowering policy table (\u{00a7}4.2's Payload\u{2192}Plan table) is applied later,
//! during lowering (`compiler::lower`), once the solver has guaranteed the
//! payload is fully concrete.

use crate::ident::{anchor_id, BlockId};
use crate::patch::normalize::NormalizedPatch;
use crate::patch::{Block, CombineMode, Edge, Port};
use crate::types::{Axis, CanonicalType};

/// The synthesized block kind name lowering dispatches on.
pub const DEFAULT_SOURCE_KIND: &str = "__default_source";

/// Inserts a `DefaultSource` block for every input port with no incoming
/// edge. Returns a new [`NormalizedPatch`] with the synthesized blocks and
/// edges appended (indices are *not* recomputed here; callers that need a
/// fresh topological order should re-run [`crate::patch::normalize::normalize`]
/// on the result if they need one, though block order does not matter for
/// the constraint solver, which iterates by edge, not by position).
#[must_use]
pub fn insert_default_sources(patch: &NormalizedPatch) -> NormalizedPatch {
    let mut out = patch.clone();
    let mut synthesized_blocks = Vec::new();
    let mut synthesized_edges = Vec::new();

    for block in &patch.blocks {
        for port in &block.input_ports {
            let has_source = patch
                .edges
                .iter()
                .any(|e| e.enabled && e.to_block == block.id && e.to_port == port.id);
            if has_source {
                continue;
            }
            let anchor = block.id.0;
            let source_id = BlockId(anchor_id(DEFAULT_SOURCE_KIND, &anchor, &port.id));
            let mut output_ty = port.declared_type;
            output_ty.payload = Axis::Var(fresh_marker(&source_id));
            let source_block = Block {
                id: source_id,
                kind: DEFAULT_SOURCE_KIND.to_string(),
                params: Default::default(),
                input_ports: vec![],
                output_ports: vec![Port {
                    id: "out".to_string(),
                    declared_type: output_ty,
                }],
                display_name: None,
            };
            synthesized_edges.push(Edge {
                from_block: source_id,
                from_port: "out".to_string(),
                to_block: block.id,
                to_port: port.id.clone(),
                combine_mode: CombineMode::WriterWins,
                enabled: true,
            });
            synthesized_blocks.push(source_block);
        }
    }

    for (i, b) in synthesized_blocks.into_iter().enumerate() {
        out.index_of.insert(
            b.id,
            crate::ident::BlockIndex(out.blocks.len() as u32 + i as u32),
        );
        out.blocks.push(b);
    }
    out.edges.extend(synthesized_edges);
    out
}

/// Allocates a deterministic placeholder variable marker derived from the
/// synthesized block id. The real [`crate::ident::TypeVarId`] handed to the
/// unifier is allocated fresh by `constraint_solve`; this function only
/// needs to produce a stable seed so repeated compiles of the same patch
/// synthesize the same block id (already guaranteed by `anchor_id`) — the
/// variable id itself need not be stable, only the *block* id is, since
/// variable ids never escape a single compile.
fn fresh_marker(id: &BlockId) -> crate::ident::TypeVarId {
    let bytes = id.0;
    crate::ident::TypeVarId(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The resolved payload-agnostic default value (\u{00a7}4.2's table) a
/// `DefaultSource` lowers to once its output payload is concrete. `None`
/// payloads given to [`default_plan`] that are not in this table (currently
/// none are excluded except `cameraProjection`, handled as an error by the
/// caller) should not occur.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultPlan {
    ConstFloat(f64),
    ConstInt(i64),
    ConstBool(bool),
    ConstVec2([f64; 2]),
    ConstVec3([f64; 3]),
    /// Expands to a macro using the palette time rail; cycles hue through HSL.
    PaletteCycle,
    /// `temporality:discrete` inputs with no source never fire.
    EventNever,
}

/// Selects the lowering plan for a resolved `DefaultSource` output type.
///
/// # Errors
/// Returns an error message naming the unsupported payload when the payload
/// is `cameraProjection`, which has no default and requires an explicit
/// source (\u{00a7}4.2's policy table: "hard error (explicit source required)").
pub fn default_plan(ty: &CanonicalType) -> Result<DefaultPlan, super::lower::LowerError> {
    if ty.is_event() {
        return Ok(DefaultPlan::EventNever);
    }
    let payload = match ty.payload {
        Axis::Inst(p) => p,
        Axis::Var(_) => {
            return Err(super::lower::LowerError::Internal(
                "default source reached lowering with an unresolved payload".into(),
            ))
        }
    };
    use crate::types::Payload;
    match payload {
        Payload::Float => Ok(DefaultPlan::ConstFloat(1.0)),
        Payload::Int => Ok(DefaultPlan::ConstInt(0)),
        Payload::Bool => Ok(DefaultPlan::ConstBool(false)),
        Payload::Vec2 => Ok(DefaultPlan::ConstVec2([0.0, 0.0])),
        Payload::Vec3 => Ok(DefaultPlan::ConstVec3([0.0, 0.0, 0.0])),
        Payload::Color => Ok(DefaultPlan::PaletteCycle),
        Payload::Shape => Ok(DefaultPlan::ConstInt(0)),
        Payload::CameraProjection => Err(super::lower::LowerError::PayloadNotSupportedByDefaultSource),
    }
}
