// SPDX-License-Identifier: Apache-2.0
//! Dependency graph construction and cycle legality (\u{00a7}4.6).
//!
//! Builds a directed graph of data dependencies over the (already
//! adapter-expanded) patch and computes strongly connected components with
//! Tarjan's algorithm. An SCC of size one with no self-loop is trivially
//! acyclic. An SCC of size \u{2265} 2, or with a self-loop, is a cycle; it is
//! legal only if at least one of its member blocks is one of the six
//! canonical stateful primitives (\u{00a7}4.7.1), whose state read/write
//! straddles the cycle and breaks the same-frame dependency.

use crate::ident::BlockId;
use crate::patch::normalize::NormalizedPatch;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// The fixed set of state-carrying primitives whose state read/write can
/// legally break a cycle (\u{00a7}4.6, \u{00a7}4.7.1). Exactly six, no more.
pub const MEMORY_BOUNDARY_KINDS: &[&str] = &[
    "UnitDelay",
    "Lag",
    "Phasor",
    "SampleAndHold",
    "Accumulator",
    "Slew",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// A strongly connected component of size \u{2265} 2 (or a self-loop)
    /// contains no memory-boundary primitive.
    #[error("illegal cycle through {blocks:?}: no memory-boundary primitive in the component")]
    CycleIllegal { blocks: Vec<BlockId> },
}

/// A topological schedule of blocks, grouped by strongly connected
/// component. Acyclic components contain exactly one block; cyclic,
/// legal components contain every block in the cycle together so the
/// lowering pass can emit them as a unit.
#[derive(Clone, Debug)]
pub struct DependencyOrder {
    pub components: Vec<Vec<BlockId>>,
}

/// Computes strongly connected components over the patch's data-dependency
/// edges and validates cycle legality.
///
/// # Errors
/// [`CycleError::CycleIllegal`] if any SCC of size \u{2265} 2, or any
/// self-loop, contains no block whose `kind` is one of
/// [`MEMORY_BOUNDARY_KINDS`].
pub fn analyze(patch: &NormalizedPatch) -> Result<DependencyOrder, CycleError> {
    let ids: Vec<BlockId> = patch.blocks.iter().map(|b| b.id).collect();
    let mut adj: FxHashMap<BlockId, Vec<BlockId>> = ids.iter().map(|&id| (id, Vec::new())).collect();
    for edge in &patch.edges {
        if edge.enabled {
            adj.entry(edge.from_block).or_default().push(edge.to_block);
        }
    }

    let sccs = tarjan(&ids, &adj);

    for scc in &sccs {
        let has_self_loop = scc.len() == 1
            && adj
                .get(&scc[0])
                .is_some_and(|targets| targets.contains(&scc[0]));
        let is_cycle = scc.len() >= 2 || has_self_loop;
        if !is_cycle {
            continue;
        }
        let kind_of = |id: &BlockId| patch.blocks.iter().find(|b| b.id == *id).map(|b| b.kind.as_str());
        let has_memory_boundary = scc
            .iter()
            .any(|id| kind_of(id).is_some_and(|k| MEMORY_BOUNDARY_KINDS.contains(&k)));
        if !has_memory_boundary {
            let mut blocks = scc.clone();
            blocks.sort();
            return Err(CycleError::CycleIllegal { blocks });
        }
    }

    // Order components: each component collapses to a single schedulable
    // unit; components are listed in a deterministic reverse-postorder
    // (Tarjan already emits SCCs in reverse topological order relative to
    // edge direction, so we reverse to get forward dependency order).
    let mut components: Vec<Vec<BlockId>> = sccs;
    components.reverse();
    for c in &mut components {
        c.sort();
    }
    Ok(DependencyOrder { components })
}

/// Tarjan's strongly connected components algorithm, iterative to avoid
/// stack-depth limits on deep patches. Returns SCCs in the order their
/// recursion would complete (each component's blocks sorted by [`BlockId`]
/// for determinism within the component; component *order* is fixed up by
/// the caller).
fn tarjan(ids: &[BlockId], adj: &FxHashMap<BlockId, Vec<BlockId>>) -> Vec<Vec<BlockId>> {
    struct State {
        index: FxHashMap<BlockId, usize>,
        lowlink: FxHashMap<BlockId, usize>,
        on_stack: FxHashMap<BlockId, bool>,
        stack: Vec<BlockId>,
        counter: usize,
        out: Vec<Vec<BlockId>>,
    }

    enum Frame {
        Enter(BlockId),
        Post(BlockId, usize),
    }

    let mut state = State {
        index: FxHashMap::default(),
        lowlink: FxHashMap::default(),
        on_stack: FxHashMap::default(),
        stack: Vec::new(),
        counter: 0,
        out: Vec::new(),
    };

    let mut sorted_ids = ids.to_vec();
    sorted_ids.sort();

    for &start in &sorted_ids {
        if state.index.contains_key(&start) {
            continue;
        }
        let mut work: Vec<Frame> = vec![Frame::Enter(start)];
        while let Some(frame) = work.pop() {
            match frame {
                Frame::Enter(v) => {
                    if state.index.contains_key(&v) {
                        continue;
                    }
                    state.index.insert(v, state.counter);
                    state.lowlink.insert(v, state.counter);
                    state.counter += 1;
                    state.stack.push(v);
                    state.on_stack.insert(v, true);

                    work.push(Frame::Post(v, state.index[&v]));
                    let mut neighbors: Vec<BlockId> = adj.get(&v).cloned().unwrap_or_default();
                    neighbors.sort();
                    for w in neighbors {
                        if !state.index.contains_key(&w) {
                            work.push(Frame::Enter(w));
                        } else if state.on_stack.get(&w).copied().unwrap_or(false) {
                            let wl = state.index[&w];
                            let vl = state.lowlink[&v];
                            state.lowlink.insert(v, vl.min(wl));
                        }
                    }
                }
                Frame::Post(v, _v_index) => {
                    let mut neighbors: Vec<BlockId> = adj.get(&v).cloned().unwrap_or_default();
                    neighbors.sort();
                    for w in neighbors {
                        if state.on_stack.get(&w).copied().unwrap_or(false) {
                            let wl = state.lowlink[&w];
                            let vl = state.lowlink[&v];
                            state.lowlink.insert(v, vl.min(wl));
                        }
                    }
                    if state.lowlink[&v] == state.index[&v] {
                        let mut component = Vec::new();
                        loop {
                            let w = state
                                .stack
                                .pop()
                                .unwrap_or_else(|| unreachable!("component root always on stack"));
                            state.on_stack.insert(w, false);
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        state.out.push(component);
                    }
                }
            }
        }
    }

    state.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Block, CombineMode, Edge, Port};
    use crate::types::{CanonicalType, Extent, Payload};

    fn block(id: &str, kind: &str) -> Block {
        Block {
            id: BlockId(crate::ident::anchor_id("block", b"", id)),
            kind: kind.into(),
            params: Default::default(),
            input_ports: vec![Port {
                id: "in".into(),
                declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
            }],
            output_ports: vec![Port {
                id: "out".into(),
                declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
            }],
            display_name: None,
        }
    }

    fn edge(from: &Block, to: &Block) -> Edge {
        Edge {
            from_block: from.id,
            from_port: "out".into(),
            to_block: to.id,
            to_port: "in".into(),
            combine_mode: CombineMode::Additive,
            enabled: true,
        }
    }

    fn normalized(blocks: Vec<Block>, edges: Vec<Edge>) -> NormalizedPatch {
        let patch = crate::patch::Patch { blocks, edges };
        crate::patch::normalize::normalize(&patch).unwrap()
    }

    #[test]
    fn self_loop_through_unit_delay_is_legal() {
        let add = block("add", "Add");
        let delay = block("delay", "UnitDelay");
        let e1 = edge(&add, &delay);
        let e2 = edge(&delay, &add);
        let np = normalized(vec![add, delay], vec![e1, e2]);
        assert!(analyze(&np).is_ok());
    }

    #[test]
    fn cycle_without_memory_boundary_is_illegal() {
        let a = block("a", "Add");
        let b = block("b", "Add");
        let e1 = edge(&a, &b);
        let e2 = edge(&b, &a);
        let np = normalized(vec![a, b], vec![e1, e2]);
        let err = analyze(&np).unwrap_err();
        match err {
            CycleError::CycleIllegal { blocks } => assert_eq!(blocks.len(), 2),
        }
    }

    #[test]
    fn acyclic_patch_is_legal() {
        let a = block("a", "Add");
        let b = block("b", "Add");
        let e1 = edge(&a, &b);
        let np = normalized(vec![a, b], vec![e1]);
        assert!(analyze(&np).is_ok());
    }
}
