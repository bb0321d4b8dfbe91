// SPDX-License-Identifier: Apache-2.0
//! Runtime health ring buffers (\u{00a7}3.4 `health`, SPEC_FULL "Health ring
//! buffers"): fixed-capacity, allocation-free-after-warmup timing samples
//! per tracked phase, used to drive `FrameBudget` diagnostics without ever
//! making `runFrame` fallible on a slow frame.

const CAPACITY: usize = 120;

/// One phase's timing sample (\u{00a7}SPEC_FULL: `{frame_id, duration_ns}`).
#[derive(Clone, Copy, Debug)]
pub struct HealthSample {
    pub frame_id: u64,
    pub duration_ns: u64,
}

/// A fixed-capacity ring buffer of the last [`CAPACITY`] frames' timings for
/// one tracked phase. Never reallocates after its first 120 pushes.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    samples: Vec<HealthSample>,
    next: usize,
    filled: bool,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self {
            samples: Vec::with_capacity(CAPACITY),
            next: 0,
            filled: false,
        }
    }
}

impl RingBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame_id: u64, duration_ns: u64) {
        let sample = HealthSample { frame_id, duration_ns };
        if self.samples.len() < CAPACITY {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % CAPACITY;
        if self.samples.len() == CAPACITY {
            self.filled = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The rolling arithmetic mean over every sample currently held, or `0`
    /// when the buffer is empty.
    #[must_use]
    pub fn rolling_mean_ns(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u128 = self.samples.iter().map(|s| u128::from(s.duration_ns)).sum();
        #[allow(clippy::cast_precision_loss)]
        {
            sum as f64 / self.samples.len() as f64
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<HealthSample> {
        self.samples.last().copied()
    }
}

/// The four per-phase ring buffers the runtime tracks every frame
/// (SPEC_FULL "Health ring buffers"): `time_advance`, `schedule_exec`,
/// `render_assemble`, `continuity_apply`.
#[derive(Clone, Debug, Default)]
pub struct HealthRingBuffers {
    pub time_advance: RingBuffer,
    pub schedule_exec: RingBuffer,
    pub render_assemble: RingBuffer,
    pub continuity_apply: RingBuffer,
}

impl HealthRingBuffers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `phase`'s rolling mean exceeds `multiple * frame_budget_ns` —
    /// the condition a `FrameBudget` diagnostic fires on.
    #[must_use]
    pub fn over_budget(&self, phase: &RingBuffer, frame_budget_ns: f64, multiple: f64) -> bool {
        !phase.is_empty() && phase.rolling_mean_ns() > frame_budget_ns * multiple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps_past_capacity_without_growing() {
        let mut buf = RingBuffer::new();
        for i in 0..(CAPACITY as u64 + 10) {
            buf.push(i, 1000);
        }
        assert_eq!(buf.len(), CAPACITY);
        assert_eq!(buf.last().unwrap().frame_id, CAPACITY as u64 + 9);
    }

    #[test]
    fn rolling_mean_reflects_pushed_samples() {
        let mut buf = RingBuffer::new();
        buf.push(0, 100);
        buf.push(1, 200);
        assert!((buf.rolling_mean_ns() - 150.0).abs() < f64::EPSILON);
    }
}
