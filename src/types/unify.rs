// SPDX-License-Identifier: Apache-2.0
//! Union-find unification over type-variable axes (\u{00a7}4.3).
//!
//! Each of the six unifiable axes (payload, cardinality, temporality,
//! binding, perspective, branch) gets its own [`AxisUnifier`] instance: a
//! union-find forest over [`TypeVarId`]s where each root optionally carries a
//! resolved concrete value. Merging two variables that both carry concrete,
//! unequal values is a [`Conflict`]. The solver in
//! [`crate::compiler::constraint_solve`] drives one `AxisUnifier<T>` per axis
//! to a fixpoint and then reads back resolved values; this module only
//! implements the structure, not the edge-iteration policy.

use crate::ident::TypeVarId;
use rustc_hash::FxHashMap;

/// A concrete-value conflict detected while merging two type variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict<T> {
    pub a: T,
    pub b: T,
}

#[derive(Debug, Clone, Copy)]
struct Node<T> {
    parent: TypeVarId,
    rank: u8,
    value: Option<T>,
}

/// Union-find unifier for a single axis's value type `T`.
///
/// `T` must be `PartialEq + Copy` so two concrete values can be compared for
/// conflict and cheaply stored at the root. New variables are created with
/// [`fresh`](Self::fresh); edges are merged with [`unify`](Self::unify).
#[derive(Debug, Default)]
pub struct AxisUnifier<T> {
    nodes: FxHashMap<u32, Node<T>>,
    next_id: u32,
}

impl<T: PartialEq + Copy> AxisUnifier<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Allocates a fresh, unresolved type variable.
    pub fn fresh(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id.0,
            Node {
                parent: id,
                rank: 0,
                value: None,
            },
        );
        id
    }

    /// Registers a variable already bound to a concrete value (e.g. a port
    /// whose declared type is fully concrete per \u{00a7}4.3 step 1).
    pub fn fresh_bound(&mut self, value: T) -> TypeVarId {
        let id = self.fresh();
        if let Some(n) = self.nodes.get_mut(&id.0) {
            n.value = Some(value);
        }
        id
    }

    fn find(&mut self, v: TypeVarId) -> TypeVarId {
        let parent = self
            .nodes
            .get(&v.0)
            .map(|n| n.parent)
            .unwrap_or(v);
        if parent == v {
            return v;
        }
        let root = self.find(parent);
        if let Some(n) = self.nodes.get_mut(&v.0) {
            n.parent = root;
        }
        root
    }

    /// Returns the current resolved value of `v`'s equivalence class, if any.
    pub fn resolved(&mut self, v: TypeVarId) -> Option<T> {
        let root = self.find(v);
        self.nodes.get(&root.0).and_then(|n| n.value)
    }

    /// Merges the equivalence classes of `a` and `b`. Monotone: a value, once
    /// bound on either side, is preserved on the merged root (\u{00a7}3.1
    /// invariant: "unification is monotone and confluent"). Returns a
    /// [`Conflict`] if both sides carry different concrete values; the merge
    /// still completes (favoring `a`'s value) so the solver can keep
    /// iterating and collect every conflict in the pass rather than stopping
    /// at the first one (\u{00a7}7 propagation policy).
    pub fn unify(&mut self, a: TypeVarId, b: TypeVarId) -> Result<(), Conflict<T>> {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return Ok(());
        }
        let va = self.nodes.get(&ra.0).and_then(|n| n.value);
        let vb = self.nodes.get(&rb.0).and_then(|n| n.value);
        let merged = match (va, vb) {
            (Some(x), Some(y)) if x == y => Some(x),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
            (Some(x), Some(_)) => Some(x), // conflicting; reported below, `a`'s value kept
        };
        let rank_a = self.nodes.get(&ra.0).map_or(0, |n| n.rank);
        let rank_b = self.nodes.get(&rb.0).map_or(0, |n| n.rank);
        let (new_root, old_root) = if rank_a >= rank_b { (ra, rb) } else { (rb, ra) };
        if let Some(n) = self.nodes.get_mut(&old_root.0) {
            n.parent = new_root;
        }
        if rank_a == rank_b {
            if let Some(n) = self.nodes.get_mut(&new_root.0) {
                n.rank += 1;
            }
        }
        if let Some(n) = self.nodes.get_mut(&new_root.0) {
            n.value = merged;
        }
        match (va, vb) {
            (Some(x), Some(y)) if x != y => Err(Conflict { a: x, b: y }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_propagates_concrete_value_across_the_class() {
        let mut u: AxisUnifier<u8> = AxisUnifier::new();
        let a = u.fresh();
        let b = u.fresh();
        let c = u.fresh_bound(7);
        u.unify(a, b).unwrap();
        u.unify(b, c).unwrap();
        assert_eq!(u.resolved(a), Some(7));
        assert_eq!(u.resolved(b), Some(7));
    }

    #[test]
    fn unify_detects_conflicting_concrete_values() {
        let mut u: AxisUnifier<u8> = AxisUnifier::new();
        let a = u.fresh_bound(1);
        let b = u.fresh_bound(2);
        let err = u.unify(a, b).unwrap_err();
        assert_eq!(err, Conflict { a: 1, b: 2 });
    }

    #[test]
    fn unify_is_idempotent_on_already_merged_classes() {
        let mut u: AxisUnifier<u8> = AxisUnifier::new();
        let a = u.fresh();
        let b = u.fresh();
        u.unify(a, b).unwrap();
        u.unify(a, b).unwrap();
        u.unify(b, a).unwrap();
    }

    #[test]
    fn fresh_variable_is_unresolved_until_bound() {
        let mut u: AxisUnifier<u8> = AxisUnifier::new();
        let a = u.fresh();
        assert_eq!(u.resolved(a), None);
    }
}
