// SPDX-License-Identifier: Apache-2.0
//! Element mapping (\u{00a7}4.11.2): matching this frame's domain elements up
//! against last frame's, so continuity state transfers to the *same*
//! logical element rather than the same array slot.
//!
//! Tried in order, falling back down the list: stable identity, then
//! by-position, then crossfade-on-mismatch as a last resort rather than a
//! hard reset.

use crate::ident::InstanceId;
use rustc_hash::FxHashMap;

/// A stable per-element key within one domain instance. `Identity` values
/// are whatever the domain's authoring tool assigned (e.g. a particle's
/// spawn-order id); `Position` is a pure fallback and carries no identity
/// guarantee across a resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKey {
    Identity(u64),
    Position(u32),
}

/// How this frame's element at `new_index` maps back to last frame's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingResult {
    /// Matched last frame's element at `old_index`; carry its state forward.
    Matched { old_index: u32 },
    /// No counterpart last frame; this is a newly appeared element.
    New,
    /// Matched by position only, after identity matching failed; callers
    /// should prefer a crossfade policy over a hard snap for these.
    PositionFallback { old_index: u32 },
}

/// Computes a full frame's worth of mapping results, one per `new_keys`
/// entry, by trying identity first and falling back to position.
///
/// `instance` is not used by the mapping logic itself — it is carried so
/// callers can key diagnostics and pooled buffers (\u{00a7}4.11.3) by it without
/// a second lookup.
#[must_use]
pub fn map_elements(
    _instance: InstanceId,
    old_keys: &[ElementKey],
    new_keys: &[ElementKey],
) -> Vec<MappingResult> {
    let mut by_identity: FxHashMap<u64, u32> = FxHashMap::default();
    for (i, k) in old_keys.iter().enumerate() {
        if let ElementKey::Identity(id) = k {
            by_identity.insert(*id, i as u32);
        }
    }

    new_keys
        .iter()
        .enumerate()
        .map(|(new_index, key)| match key {
            ElementKey::Identity(id) => match by_identity.get(id) {
                Some(&old_index) => MappingResult::Matched { old_index },
                None => MappingResult::New,
            },
            ElementKey::Position(_) => {
                let new_index = new_index as u32;
                if (new_index as usize) < old_keys.len() {
                    MappingResult::PositionFallback {
                        old_index: new_index,
                    }
                } else {
                    MappingResult::New
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst() -> InstanceId {
        InstanceId(crate::ident::anchor_id("instance", b"", "particles"))
    }

    #[test]
    fn identity_keys_match_regardless_of_reordering() {
        let old = vec![ElementKey::Identity(1), ElementKey::Identity(2)];
        let new = vec![ElementKey::Identity(2), ElementKey::Identity(1)];
        let result = map_elements(inst(), &old, &new);
        assert_eq!(result[0], MappingResult::Matched { old_index: 1 });
        assert_eq!(result[1], MappingResult::Matched { old_index: 0 });
    }

    #[test]
    fn unmatched_identity_is_new() {
        let old = vec![ElementKey::Identity(1)];
        let new = vec![ElementKey::Identity(99)];
        let result = map_elements(inst(), &old, &new);
        assert_eq!(result[0], MappingResult::New);
    }

    #[test]
    fn position_keys_fall_back_to_index_when_in_range() {
        let old = vec![ElementKey::Identity(1), ElementKey::Identity(2)];
        let new = vec![ElementKey::Position(0), ElementKey::Position(5)];
        let result = map_elements(inst(), &old, &new);
        assert_eq!(result[0], MappingResult::PositionFallback { old_index: 0 });
        assert_eq!(result[1], MappingResult::New);
    }
}
