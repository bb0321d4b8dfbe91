// SPDX-License-Identifier: Apache-2.0
//! Normalization pass (\u{00a7}4.1): raw [`Patch`] \u{2192} [`NormalizedPatch`].

use super::{Edge, Patch};
use crate::ident::{BlockId, BlockIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Errors raised while normalizing a raw [`Patch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// An edge referenced a block or port that does not exist in the patch.
    #[error("dangling edge: {from:?}.{from_port} -> {to:?}.{to_port}")]
    DanglingEdge {
        from: BlockId,
        from_port: String,
        to: BlockId,
        to_port: String,
    },
    /// Two blocks in the patch declared the same [`BlockId`].
    #[error("duplicate block id: {0:?}")]
    DuplicateBlockId(BlockId),
}

/// A [`Patch`] after normalization: blocks are given dense, deterministic
/// [`BlockIndex`]es and edges are sorted into canonical order.
#[derive(Clone, Debug)]
pub struct NormalizedPatch {
    /// Blocks in canonical order (topological where acyclic, stable thereafter).
    pub blocks: Vec<super::Block>,
    /// Maps an authored [`BlockId`] to its dense index in `blocks`.
    pub index_of: FxHashMap<BlockId, BlockIndex>,
    /// Edges canonicalized by `(toBlock, toPort, fromBlock, fromPort)` (\u{00a7}4.1).
    pub edges: Vec<Edge>,
}

impl NormalizedPatch {
    #[must_use]
    pub fn block(&self, idx: BlockIndex) -> &super::Block {
        &self.blocks[idx.0 as usize]
    }

    #[must_use]
    pub fn index_of(&self, id: BlockId) -> Option<BlockIndex> {
        self.index_of.get(&id).copied()
    }
}

/// Runs the normalization pass over a raw [`Patch`].
///
/// # Errors
/// Returns [`NormalizeError::DuplicateBlockId`] if two blocks share an id, or
/// [`NormalizeError::DanglingEdge`] if an edge references a block or port
/// that doesn't exist.
pub fn normalize(patch: &Patch) -> Result<NormalizedPatch, NormalizeError> {
    let mut seen = FxHashSet::default();
    for b in &patch.blocks {
        if !seen.insert(b.id) {
            return Err(NormalizeError::DuplicateBlockId(b.id));
        }
    }

    for e in &patch.edges {
        let from = patch.blocks.iter().find(|b| b.id == e.from_block);
        let to = patch.blocks.iter().find(|b| b.id == e.to_block);
        let from_ok = from.is_some_and(|b| b.output_port(&e.from_port).is_some());
        let to_ok = to.is_some_and(|b| b.input_port(&e.to_port).is_some());
        if !from_ok || !to_ok {
            return Err(NormalizeError::DanglingEdge {
                from: e.from_block,
                from_port: e.from_port.clone(),
                to: e.to_block,
                to_port: e.to_port.clone(),
            });
        }
    }

    let order = canonical_order(patch);
    let mut index_of = FxHashMap::default();
    let mut blocks = Vec::with_capacity(patch.blocks.len());
    for (i, block) in order.into_iter().enumerate() {
        index_of.insert(block.id, BlockIndex(i as u32));
        blocks.push(block.clone());
    }

    let mut edges = patch.edges.clone();
    edges.sort_by(|a, b| {
        (&a.to_block, &a.to_port, &a.from_block, &a.from_port).cmp(&(
            &b.to_block,
            &b.to_port,
            &b.from_block,
            &b.from_port,
        ))
    });

    Ok(NormalizedPatch {
        blocks,
        index_of,
        edges,
    })
}

/// Computes a deterministic block order: Kahn's-algorithm topological order
/// over data-dependency edges, ties broken by [`BlockId`] so the result is
/// reproducible across runs; any blocks left over because they participate
/// in a cycle are appended afterward in `BlockId` order. Cycle *legality* is
/// judged later by [`crate::compiler::dependency_graph`], which has the
/// memory-boundary context this pass does not need.
fn canonical_order(patch: &Patch) -> Vec<&super::Block> {
    let mut indegree: FxHashMap<BlockId, usize> =
        patch.blocks.iter().map(|b| (b.id, 0)).collect();
    let mut deps: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for e in &patch.edges {
        if !e.enabled {
            continue;
        }
        deps.entry(e.from_block).or_default().push(e.to_block);
        if let Some(d) = indegree.get_mut(&e.to_block) {
            *d += 1;
        }
    }

    let mut ready: Vec<&super::Block> = patch
        .blocks
        .iter()
        .filter(|b| indegree.get(&b.id).copied() == Some(0))
        .collect();
    ready.sort_by_key(|b| b.id);

    let mut ordered = Vec::with_capacity(patch.blocks.len());
    let mut remaining_indegree = indegree;
    let mut frontier = ready;
    let mut emitted: FxHashSet<BlockId> = FxHashSet::default();

    while let Some(next) = frontier.first().copied() {
        frontier.remove(0);
        if !emitted.insert(next.id) {
            continue;
        }
        ordered.push(next);
        if let Some(targets) = deps.get(&next.id) {
            let mut newly_ready = Vec::new();
            for &t in targets {
                if let Some(d) = remaining_indegree.get_mut(&t) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        if let Some(b) = patch.blocks.iter().find(|b| b.id == t) {
                            newly_ready.push(b);
                        }
                    }
                }
            }
            newly_ready.sort_by_key(|b| b.id);
            frontier.extend(newly_ready);
            frontier.sort_by_key(|b| b.id);
        }
    }

    let mut leftover: Vec<&super::Block> = patch
        .blocks
        .iter()
        .filter(|b| !emitted.contains(&b.id))
        .collect();
    leftover.sort_by_key(|b| b.id);
    ordered.extend(leftover);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Block, CombineMode, Port};
    use crate::types::{CanonicalType, Extent, Payload};

    fn block(id: &str, inputs: &[&str], outputs: &[&str]) -> Block {
        Block {
            id: BlockId(crate::ident::anchor_id("block", b"", id)),
            kind: "test".into(),
            params: Default::default(),
            input_ports: inputs
                .iter()
                .map(|p| Port {
                    id: (*p).to_string(),
                    declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
                })
                .collect(),
            output_ports: outputs
                .iter()
                .map(|p| Port {
                    id: (*p).to_string(),
                    declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
                })
                .collect(),
            display_name: None,
        }
    }

    fn edge(from: &Block, from_port: &str, to: &Block, to_port: &str) -> Edge {
        Edge {
            from_block: from.id,
            from_port: from_port.into(),
            to_block: to.id,
            to_port: to_port.into(),
            combine_mode: CombineMode::WriterWins,
            enabled: true,
        }
    }

    #[test]
    fn rejects_duplicate_block_ids() {
        let a = block("a", &[], &["out"]);
        let mut patch = Patch {
            blocks: vec![a.clone(), a],
            edges: vec![],
        };
        patch.blocks[1].kind = "other".into();
        let err = normalize(&patch).unwrap_err();
        assert!(matches!(err, NormalizeError::DuplicateBlockId(_)));
    }

    #[test]
    fn rejects_dangling_edges() {
        let a = block("a", &[], &["out"]);
        let b = block("b", &["in"], &[]);
        let dangling = Edge {
            from_block: a.id,
            from_port: "missing".into(),
            to_block: b.id,
            to_port: "in".into(),
            combine_mode: CombineMode::WriterWins,
            enabled: true,
        };
        let patch = Patch {
            blocks: vec![a, b],
            edges: vec![dangling],
        };
        let err = normalize(&patch).unwrap_err();
        assert!(matches!(err, NormalizeError::DanglingEdge { .. }));
    }

    #[test]
    fn orders_blocks_topologically() {
        let a = block("a", &[], &["out"]);
        let b = block("b", &["in"], &["out"]);
        let c = block("c", &["in"], &[]);
        let e1 = edge(&a, "out", &b, "in");
        let e2 = edge(&b, "out", &c, "in");
        let patch = Patch {
            blocks: vec![c.clone(), a.clone(), b.clone()],
            edges: vec![e2, e1],
        };
        let normalized = normalize(&patch).unwrap();
        let idx_a = normalized.index_of(a.id).unwrap();
        let idx_b = normalized.index_of(b.id).unwrap();
        let idx_c = normalized.index_of(c.id).unwrap();
        assert!(idx_a.0 < idx_b.0);
        assert!(idx_b.0 < idx_c.0);
    }

    #[test]
    fn edges_are_canonically_sorted() {
        let a = block("a", &[], &["out1", "out2"]);
        let b = block("b", &["in1", "in2"], &[]);
        let e1 = edge(&a, "out2", &b, "in1");
        let e2 = edge(&a, "out1", &b, "in1");
        let patch = Patch {
            blocks: vec![a, b],
            edges: vec![e1.clone(), e2.clone()],
        };
        let normalized = normalize(&patch).unwrap();
        assert_eq!(normalized.edges[0].from_port, "out1");
        assert_eq!(normalized.edges[1].from_port, "out2");
    }
}
