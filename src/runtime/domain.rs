// SPDX-License-Identifier: Apache-2.0
//! The domain protocol (\u{00a7}6.2): how a domain-producing block's live
//! element count reaches the runtime.
//!
//! A field's cardinality is part of its [`crate::types::CanonicalType`], but
//! its *count* is not \u{2014} `Array`-like blocks lower to an `Intrinsic`
//! expression carrying no count at all (\u{00a7}4.7's lowering stays pure IR).
//! The host publishes each instance's live snapshot once per frame before
//! calling [`super::RuntimeState::run_frame`]; `materialize` steps and the
//! continuity system both read it from here.

use crate::ident::InstanceId;
use rustc_hash::FxHashMap;

/// Whether a domain's elements carry a stable identity the continuity
/// system can match across frames, or none at all (\u{00a7}4.11.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityMode {
    Stable,
    None,
}

/// One frame's worth of a domain's live shape, published by the host
/// (\u{00a7}6.2: `{ count, identityMode, elementId?, posHint? }`).
#[derive(Clone, Debug, Default)]
pub struct DomainSnapshot {
    pub count: u32,
    pub identity_mode: Option<IdentityMode>,
    pub element_id: Option<Vec<u32>>,
    pub pos_hint: Option<Vec<[f32; 2]>>,
}

impl DomainSnapshot {
    #[must_use]
    pub fn uniform(count: u32) -> Self {
        Self {
            count,
            identity_mode: Some(IdentityMode::None),
            element_id: None,
            pos_hint: None,
        }
    }

    /// The `(oldDomainKey, newDomainKey)` half this snapshot contributes to
    /// the mapping cache key (\u{00a7}4.11.2): count plus identity fingerprint.
    #[must_use]
    pub fn domain_key(&self) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        use std::hash::{Hash, Hasher};
        self.count.hash(&mut hasher);
        if let Some(ids) = &self.element_id {
            ids.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The host-published live state for every registered instance, keyed by
/// [`InstanceId`]. Overwritten wholesale each frame by the host before
/// `run_frame` executes phase 1.
#[derive(Default)]
pub struct InstanceRegistry {
    live: FxHashMap<InstanceId, DomainSnapshot>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, instance: InstanceId, snapshot: DomainSnapshot) {
        self.live.insert(instance, snapshot);
    }

    #[must_use]
    pub fn get(&self, instance: InstanceId) -> Option<&DomainSnapshot> {
        self.live.get(&instance)
    }

    #[must_use]
    pub fn count_of(&self, instance: InstanceId) -> u32 {
        self.live.get(&instance).map_or(0, |s| s.count)
    }
}
