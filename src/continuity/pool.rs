// SPDX-License-Identifier: Apache-2.0
//! Pooled continuity buffers (\u{00a7}4.11.3).
//!
//! Continuity state persists across frames but must not allocate on the
//! hot path: each [`StableTargetId`] gets one [`Vec<f32>`] that is resized
//! (not reallocated-and-dropped) in place as its domain grows or shrinks,
//! and reused by value on every subsequent frame.

use crate::ident::StableTargetId;
use rustc_hash::FxHashMap;

/// Per-target pooled storage for continuity-tracked field values, reused
/// across frames and across recompiles as long as the target's
/// [`StableTargetId`] survives.
#[derive(Default)]
pub struct ContinuityPool {
    buffers: FxHashMap<StableTargetId, Vec<f32>>,
}

impl ContinuityPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer for `target`, resized to `len` and zero-filled in
    /// any newly grown region, without dropping the existing allocation.
    pub fn get_or_resize(&mut self, target: StableTargetId, len: usize) -> &mut [f32] {
        let buf = self.buffers.entry(target).or_default();
        if buf.len() < len {
            buf.resize(len, 0.0);
        } else {
            buf.truncate(len);
        }
        buf.as_mut_slice()
    }

    /// Drops the buffer for a target whose owning block was removed by a
    /// hot edit. Called by the continuity system during rebind, never
    /// during normal frame execution.
    pub fn evict(&mut self, target: StableTargetId) {
        self.buffers.remove(&target);
    }

    #[must_use]
    pub fn tracked_target_count(&self) -> usize {
        self.buffers.len()
    }
}
