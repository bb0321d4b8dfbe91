// SPDX-License-Identifier: Apache-2.0
//! Adapter insertion (\u{00a7}4.4).
//!
//! Adapters are ordinary pure blocks selected from a static rule table, never
//! invented. Rules are declared most-specific first; the first match wins.
//! Runs after the type solver, over its resolved per-port types, and rewrites
//! any edge whose endpoints differ in a rule-matched way into
//! `source \u{2192} adapter \u{2192} target`.

use crate::ident::{anchor_id, BlockId};
use crate::patch::normalize::NormalizedPatch;
use crate::patch::{Block, CombineMode, Edge, Port};
use crate::types::{Axis, CanonicalType, Cardinality, Payload};
use thiserror::Error;

/// A per-axis pattern: `None` matches any concrete value on that axis.
#[derive(Clone, Copy)]
pub struct PayloadPattern(pub Option<Payload>);

impl PayloadPattern {
    fn matches(self, p: Payload) -> bool {
        self.0.is_none_or(|want| want == p)
    }
}

/// How an adapter transforms the extent between its declared `from` and `to`
/// payload patterns. Kept as a small fixed enum rather than an arbitrary
/// closure so the table stays `'static` data, matching \u{00a7}4.4's "ordinary
/// pure blocks selected from a static rule table."
#[derive(Clone, Copy, Debug)]
pub enum ExtentTransform {
    /// Cardinality and every other axis pass through unchanged.
    Identity,
    /// Source is a signal, target is a field over some instance: broadcast.
    BroadcastToField,
}

/// One entry in the static adapter rule table.
pub struct AdapterRule {
    pub id: &'static str,
    pub name: &'static str,
    pub from: PayloadPattern,
    pub to: PayloadPattern,
    pub transform: ExtentTransform,
}

/// The seed adapter rule table (SPEC_FULL "Adapter rule table seed set"),
/// most specific first: exact payload pairs before any wildcard broadcast
/// rule, so a float-to-vec2 request prefers an explicit same-cardinality
/// cast over the broadcast rule that would also structurally match.
#[must_use]
pub fn rule_table() -> Vec<AdapterRule> {
    vec![
        AdapterRule {
            id: "float_to_int",
            name: "FloatToInt",
            from: PayloadPattern(Some(Payload::Float)),
            to: PayloadPattern(Some(Payload::Int)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "int_to_float",
            name: "IntToFloat",
            from: PayloadPattern(Some(Payload::Int)),
            to: PayloadPattern(Some(Payload::Float)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "float_to_bool",
            name: "FloatToBool",
            from: PayloadPattern(Some(Payload::Float)),
            to: PayloadPattern(Some(Payload::Bool)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "bool_to_float",
            name: "BoolToFloat",
            from: PayloadPattern(Some(Payload::Bool)),
            to: PayloadPattern(Some(Payload::Float)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "vec2_to_vec3",
            name: "Vec2ToVec3",
            from: PayloadPattern(Some(Payload::Vec2)),
            to: PayloadPattern(Some(Payload::Vec3)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "vec3_to_vec2",
            name: "Vec3ToVec2",
            from: PayloadPattern(Some(Payload::Vec3)),
            to: PayloadPattern(Some(Payload::Vec2)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "float_to_vec2",
            name: "FloatToVec2",
            from: PayloadPattern(Some(Payload::Float)),
            to: PayloadPattern(Some(Payload::Vec2)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "float_to_vec3",
            name: "FloatToVec3",
            from: PayloadPattern(Some(Payload::Float)),
            to: PayloadPattern(Some(Payload::Vec3)),
            transform: ExtentTransform::Identity,
        },
        AdapterRule {
            id: "signal_to_field",
            name: "SignalToField",
            from: PayloadPattern(None),
            to: PayloadPattern(None),
            transform: ExtentTransform::BroadcastToField,
        },
    ]
}

/// Raised when an edge's endpoints cannot be bridged by any rule in the table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unbridgeable type mismatch: {from_block:?}.{from_port} ({from_type:?}) -> {to_block:?}.{to_port} ({to_type:?})")]
pub struct AdapterError {
    pub from_block: BlockId,
    pub from_port: String,
    pub from_type: String,
    pub to_block: BlockId,
    pub to_port: String,
    pub to_type: String,
}

fn find_rule(rules: &[AdapterRule], from: &CanonicalType, to: &CanonicalType) -> Option<usize> {
    let (Axis::Inst(fp), Axis::Inst(tp)) = (from.payload, to.payload) else {
        return None;
    };
    let cardinality_mismatch = from.extent.cardinality != to.extent.cardinality;
    let is_broadcast_case = matches!(from.extent.cardinality, Axis::Inst(Cardinality::One))
        && matches!(to.extent.cardinality, Axis::Inst(Cardinality::Many(_)));

    rules.iter().position(|r| {
        if !r.from.matches(fp) || !r.to.matches(tp) {
            return false;
        }
        match r.transform {
            ExtentTransform::Identity => fp != tp && !cardinality_mismatch,
            ExtentTransform::BroadcastToField => is_broadcast_case && fp == tp,
        }
    })
}

/// Inserts adapters for every edge whose resolved endpoint types differ in a
/// rule-matched way. Edges whose endpoints are already identical are left
/// untouched; edges that differ but match no rule raise [`AdapterError`].
///
/// Returns the rewritten patch together with a [`TypeSolveResult`] extended
/// with the synthesized adapters' own port types. Adapters are created
/// *after* the solver has already run to fixpoint (\u{00a7}4.4: "runs after the
/// type solver"), so their ports never went through unification — their
/// types are already fully concrete by construction (`from_ty`/`to_ty`, read
/// straight off the edge they're splicing into) and are simply recorded here
/// so downstream passes can keep resolving every port's type through one
/// [`TypeSolveResult`] lookup instead of special-casing synthesized blocks.
///
/// # Errors
/// Returns every [`AdapterError`] collected in this pass.
#[allow(clippy::type_complexity)]
pub fn insert_adapters(
    patch: &NormalizedPatch,
    types: &super::constraint_solve::TypeSolveResult,
) -> Result<(NormalizedPatch, super::constraint_solve::TypeSolveResult), Vec<AdapterError>> {
    use super::constraint_solve::TypeSolveResult;
    let rules = rule_table();
    let mut out = patch.clone();
    let mut resolved = types.resolved.clone();
    let mut new_blocks = Vec::new();
    let mut errors = Vec::new();
    let mut rewritten_edges = Vec::with_capacity(patch.edges.len());

    for edge in &patch.edges {
        if !edge.enabled {
            rewritten_edges.push(edge.clone());
            continue;
        }
        let Some(from_ty) = types.port_type(edge.from_block, false, &edge.from_port) else {
            rewritten_edges.push(edge.clone());
            continue;
        };
        let Some(to_ty) = types.port_type(edge.to_block, true, &edge.to_port) else {
            rewritten_edges.push(edge.clone());
            continue;
        };
        if from_ty == to_ty {
            rewritten_edges.push(edge.clone());
            continue;
        }
        match find_rule(&rules, &from_ty, &to_ty) {
            Some(idx) => {
                let rule = &rules[idx];
                let anchor = [edge.from_block.0.as_slice(), edge.to_block.0.as_slice()].concat();
                let adapter_id = BlockId(anchor_id(
                    "adapter",
                    &anchor,
                    &format!("{}:{}:{}", rule.id, edge.from_port, edge.to_port),
                ));
                new_blocks.push(Block {
                    id: adapter_id,
                    kind: format!("__adapter_{}", rule.id),
                    params: Default::default(),
                    input_ports: vec![Port {
                        id: "in".to_string(),
                        declared_type: from_ty,
                    }],
                    output_ports: vec![Port {
                        id: "out".to_string(),
                        declared_type: to_ty,
                    }],
                    display_name: Some(rule.name.to_string()),
                });
                resolved.insert((adapter_id, true, "in".to_string()), from_ty);
                resolved.insert((adapter_id, false, "out".to_string()), to_ty);
                rewritten_edges.push(Edge {
                    from_block: edge.from_block,
                    from_port: edge.from_port.clone(),
                    to_block: adapter_id,
                    to_port: "in".to_string(),
                    combine_mode: CombineMode::WriterWins,
                    enabled: true,
                });
                rewritten_edges.push(Edge {
                    from_block: adapter_id,
                    from_port: "out".to_string(),
                    to_block: edge.to_block,
                    to_port: edge.to_port.clone(),
                    combine_mode: edge.combine_mode,
                    enabled: true,
                });
            }
            None => errors.push(AdapterError {
                from_block: edge.from_block,
                from_port: edge.from_port.clone(),
                from_type: format!("{from_ty:?}"),
                to_block: edge.to_block,
                to_port: edge.to_port.clone(),
                to_type: format!("{to_ty:?}"),
            }),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let base_len = out.blocks.len() as u32;
    for (i, b) in new_blocks.into_iter().enumerate() {
        out.index_of.insert(b.id, crate::ident::BlockIndex(base_len + i as u32));
        out.blocks.push(b);
    }
    out.edges = rewritten_edges;
    Ok((out, TypeSolveResult { resolved }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Block, CombineMode, Edge, Patch, Port};
    use crate::types::Extent;

    fn block(id: &str, payload: Payload, input: bool) -> Block {
        let ty = CanonicalType::concrete(payload, Extent::signal());
        Block {
            id: BlockId(crate::ident::anchor_id("block", b"", id)),
            kind: "test".into(),
            params: Default::default(),
            input_ports: if input {
                vec![Port {
                    id: "in".into(),
                    declared_type: ty,
                }]
            } else {
                vec![]
            },
            output_ports: if input {
                vec![]
            } else {
                vec![Port {
                    id: "out".into(),
                    declared_type: ty,
                }]
            },
            display_name: None,
        }
    }

    #[test]
    fn mismatched_payloads_get_a_float_to_int_adapter_spliced_in() {
        let src = block("src", Payload::Float, false);
        let dst = block("dst", Payload::Int, true);
        let edge = Edge {
            from_block: src.id,
            from_port: "out".into(),
            to_block: dst.id,
            to_port: "in".into(),
            combine_mode: CombineMode::WriterWins,
            enabled: true,
        };
        let patch = Patch {
            blocks: vec![src, dst],
            edges: vec![edge],
        };
        let normalized = crate::patch::normalize::normalize(&patch).unwrap();
        let types = super::super::constraint_solve::solve(&normalized).unwrap();
        let (rewritten, extended_types) = insert_adapters(&normalized, &types).unwrap();
        assert_eq!(rewritten.blocks.len(), 3);
        let adapter = rewritten
            .blocks
            .iter()
            .find(|b| b.kind.starts_with("__adapter_"))
            .unwrap();
        assert!(extended_types.port_type(adapter.id, true, "in").is_some());
        assert!(extended_types.port_type(adapter.id, false, "out").is_some());
    }

    #[test]
    fn identical_endpoint_types_need_no_adapter() {
        let src = block("src", Payload::Float, false);
        let dst = block("dst", Payload::Float, true);
        let edge = Edge {
            from_block: src.id,
            from_port: "out".into(),
            to_block: dst.id,
            to_port: "in".into(),
            combine_mode: CombineMode::WriterWins,
            enabled: true,
        };
        let patch = Patch {
            blocks: vec![src, dst],
            edges: vec![edge],
        };
        let normalized = crate::patch::normalize::normalize(&patch).unwrap();
        let types = super::super::constraint_solve::solve(&normalized).unwrap();
        let (rewritten, _) = insert_adapters(&normalized, &types).unwrap();
        assert_eq!(rewritten.blocks.len(), 2);
    }
}
