// SPDX-License-Identifier: Apache-2.0
//! Identifier and hashing utilities.
//!
//! All stable identities in the engine (`BlockId`, `StableStateId`,
//! `StableTargetId`, ...) are 256-bit BLAKE3 digests produced with a
//! domain-separating prefix, so that two identities hashed from the same
//! bytes under different "kinds" never collide. In-process-only handles
//! (type unification variables, compiled slot indices) are plain integers;
//! they are never persisted or compared across compiles.

use blake3::Hasher;

/// Canonical 256-bit hash used for every stable, edit-surviving identity.
pub type Hash = [u8; 32];

macro_rules! hash_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub Hash);

        impl $name {
            /// Returns the canonical byte representation of this id.
            #[must_use]
            pub fn as_bytes(&self) -> &Hash {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", hex::encode(&self.0[..8]))
            }
        }
    };
}

hash_id!(
    BlockId,
    "Stable identifier for a [`crate::patch::Block`]. Survives recompiles as long as \
     the authored block identity does not change; synthesized blocks (default \
     sources, adapters) derive theirs via [`anchor_id`]."
);
hash_id!(
    PortTypeRef,
    "Opaque reference to a port within a block, used when hashing port-scoped identities."
);
hash_id!(
    StableStateId,
    "`hash(blockId, stateKind)` — the semantic handle a stateful primitive uses to \
     address its persistent state slot across recompiles (\u{00a7}3.2)."
);
hash_id!(
    StableTargetId,
    "`hash(semanticRole, producingBlockId, outputPort, domainBindingIdentity)` — the \
     semantic handle continuity state is keyed by (\u{00a7}4.11)."
);
hash_id!(
    InstanceId,
    "Identifies a single per-element domain (an \"Array\"-like block output) across \
     frames and recompiles."
);

/// Produces a domain-separated identity: `blake3(kind || 0x00 || anchor || 0x00 || local)`.
///
/// Used for both authored [`BlockId`]s (`kind = \"block\"`) and synthesized
/// anchor-derived ids (`kind \in {\"default-source\", \"adapter\"}`), per \u{00a7}4.1's
/// "Anchor-based derived IDs" rule: the same `(kind, anchor, localName)` always
/// produces the same id, so synthesized artifacts are stable across edits that
/// don't touch their anchor.
#[must_use]
pub fn anchor_id(kind: &str, anchor: &[u8], local: &str) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(anchor);
    hasher.update(b"\0");
    hasher.update(local.as_bytes());
    hasher.finalize().into()
}

/// Hashes a stable state key from its owning block and a stable state-kind tag.
#[must_use]
pub fn make_state_id(block: BlockId, state_kind: &str) -> StableStateId {
    StableStateId(anchor_id("state", &block.0, state_kind))
}

/// Hashes a stable continuity-target key. `domain_binding_identity` is the
/// anchor id of the domain-producing block the target's field is materialized
/// over, so the same logical target survives edits that don't touch the
/// domain or the producing block.
#[must_use]
pub fn make_target_id(
    semantic_role: &str,
    producing_block: BlockId,
    output_port: &str,
    domain_binding_identity: &[u8],
) -> StableTargetId {
    let mut hasher = Hasher::new();
    hasher.update(b"target\0");
    hasher.update(semantic_role.as_bytes());
    hasher.update(b"\0");
    hasher.update(&producing_block.0);
    hasher.update(b"\0");
    hasher.update(output_port.as_bytes());
    hasher.update(b"\0");
    hasher.update(domain_binding_identity);
    StableTargetId(hasher.finalize().into())
}

/// Dense, compile-scoped index assigned to a block during normalization
/// (\u{00a7}4.1). Unlike [`BlockId`], `BlockIndex` is not stable across
/// recompiles — it exists purely to let later passes use array indexing
/// instead of hash-map lookups on the hot path.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockIndex(pub u32);

/// In-process-only unification variable identifier (\u{00a7}3.1). Never
/// serialized; resolved away entirely before a [`crate::ir::CompiledProgram`]
/// is produced.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeVarId(pub u32);

/// Physical index of a [`crate::ir::ValueExpr`] in the program's expression table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ValueExprId(pub u32);

/// Physical index of a persistent state slot, assigned by the binding pass (\u{00a7}4.8).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateSlotId(pub u32);

/// Physical slot address for a value produced by the schedule (\u{00a7}3.3).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ValueSlot(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_prevents_cross_kind_collisions() {
        let b = BlockId(anchor_id("block", b"", "polygon-1"));
        let s = make_state_id(b, "phase");
        let t = make_target_id("position", b, "out", &b.0);
        assert_ne!(b.0, s.0);
        assert_ne!(b.0, t.0);
        assert_ne!(s.0, t.0);
    }

    #[test]
    fn anchor_id_is_stable_for_same_inputs() {
        let a = anchor_id("default-source", b"block-42", "sides");
        let b = anchor_id("default-source", b"block-42", "sides");
        assert_eq!(a, b);
    }

    #[test]
    fn anchor_id_distinguishes_anchor_from_local_name() {
        let a = anchor_id("default-source", b"block-42", "sides");
        let b = anchor_id("default-source", b"block-43", "sides");
        let c = anchor_id("default-source", b"block-42", "color");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
