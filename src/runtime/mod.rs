// SPDX-License-Identifier: Apache-2.0
//! The runtime (\u{00a7}3.4, \u{00a7}4.10): executes one [`crate::ir::CompiledProgram`]
//! per frame against a long-lived [`RuntimeState`], exactly as \u{00a7}6.1's
//! `createRuntime`/`loadProgram`/`runFrame` triad describes.
//!
//! [`RuntimeState`] is allocated once per process and resized lazily as a
//! program's slot count grows (\u{00a7}3.4 lifecycle); [`run_frame`] is the only
//! entry point that advances it, and it never fails outright \u{2014} a bad value
//! degrades to a zeroed slot plus a health diagnostic rather than aborting
//! the frame (\u{00a7}7: "Runtime errors never throw out of `runFrame`").
//!
//! Per-frame execution is the three-phase split \u{00a7}4.9 lays out: phase 1
//! (value eval, materialize, continuity build/apply) never observes this
//! frame's state writes, which land only in phase 3 (\u{00a7}8 invariant 6).

pub mod domain;
pub mod eval;
pub mod health;

use crate::continuity::mapping::{map_elements, ElementKey, MappingResult};
use crate::continuity::pool::ContinuityPool;
use crate::continuity::{ContinuityConfig, ContinuityPolicy, PostPolicy};
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticScope, Domain as DiagDomain, PrimaryTarget, Severity};
use crate::ident::{InstanceId, StableTargetId, ValueSlot};
use crate::ir::{CompiledProgram, ShapeSource, Step, Storage, TimeModel};
use domain::{DomainSnapshot, IdentityMode, InstanceRegistry};
use eval::{ObjectValue, ValueBanks};
use health::HealthRingBuffers;
use rustc_hash::FxHashMap;

/// The per-frame derived time rails (\u{00a7}4.5) every block reads \u{2014} all in
/// milliseconds except the two phase rails, which are dimensionless `[0, 1)`
/// fractions (infinite models leave `phase_a` unwrapped; see
/// [`TimeGauge::raw_phase`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeState {
    pub dt: f64,
    pub phase_a: f64,
    pub phase_b: f64,
    pub wrap_event: bool,
    pub progress01: f64,
}

/// A host-signaled reason this frame's `tModelMs` is not a simple continuation
/// of the last one (\u{00a7}6.1 `runFrame`'s `discontinuity` parameter).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discontinuity {
    Seek,
    RateChange,
    Loop,
    HotSwap,
}

/// The persisted time gauge (\u{00a7}3.4 `timeState`): survives every frame and
/// every hot-swap, absorbing time-model discontinuities so a `Phasor`'s
/// visible output never jumps (\u{00a7}4.11.1).
#[derive(Clone, Copy, Debug, Default)]
struct TimeGauge {
    prev_base_time_ms: f64,
    phase_offset: f64,
    /// Last frame's *visible* (gauge-corrected) phase, kept only so a fresh
    /// discontinuity can reconcile against it without recomputing it.
    prev_visible_phase: f64,
}

impl TimeGauge {
    /// The time model's raw phase function (\u{00a7}4.5), before gauge correction.
    /// `infinite` is intentionally left unbounded \u{2014} \u{00a7}4.5: "wrap happens in
    /// consumers that use `frac`" \u{2014} every other model wraps to `[0, 1)` here.
    fn raw_phase(model: TimeModel, t_model_ms: f64) -> f64 {
        match model {
            TimeModel::Infinite { speed } => (t_model_ms / 1000.0) * speed,
            TimeModel::Finite { period_ms } if period_ms > 0.0 => {
                (t_model_ms / period_ms).rem_euclid(1.0)
            }
            TimeModel::Finite { .. } => 0.0,
            // No patch-bound tempo/period signal reaches this layer yet (the
            // one-frame latch described in \u{00a7}4.5 is a compiler-side wiring
            // concern); driven falls back to unit speed until that lands.
            TimeModel::Driven => t_model_ms / 1000.0,
        }
    }

    /// Advances the gauge for one frame, applying \u{00a7}4.11.1's phase
    /// reconciliation on `discontinuity` and returning the rails every
    /// `ValueExprKind::Time` read consumes this frame.
    fn advance(
        &mut self,
        model: TimeModel,
        t_model_ms: f64,
        discontinuity: Option<Discontinuity>,
    ) -> TimeState {
        let raw = Self::raw_phase(model, t_model_ms);

        if discontinuity.is_some() {
            // \u{00a7}4.11.1: phaseOffset += oldEff - newBase, where oldEff is the
            // last visible (wrapped) phase and newBase is this frame's raw phase.
            let old_eff = self.prev_visible_phase.rem_euclid(1.0);
            self.phase_offset += old_eff - raw.rem_euclid(1.0);
        }

        let phase_a = match model {
            // Unbounded rails still carry the accumulated offset so a
            // discontinuity never introduces a jump, but are not wrapped.
            TimeModel::Infinite { .. } | TimeModel::Driven => raw + self.phase_offset,
            TimeModel::Finite { .. } => (raw + self.phase_offset).rem_euclid(1.0),
        };
        // A secondary harmonic rail (\u{00a7}SPEC_FULL "phaseB"): half the rate of
        // phaseA, gauge-corrected through the same offset so both rails stay
        // mutually continuous across a discontinuity.
        let phase_b = match model {
            TimeModel::Finite { .. } => (raw * 0.5 + self.phase_offset * 0.5).rem_euclid(1.0),
            _ => (raw + self.phase_offset) * 0.5,
        };

        let dt = if discontinuity.is_some() {
            0.0
        } else {
            (t_model_ms - self.prev_base_time_ms).max(0.0)
        };

        let wrap_event = matches!(model, TimeModel::Finite { .. })
            && discontinuity.is_none()
            && phase_a < self.prev_visible_phase.rem_euclid(1.0) - f64::EPSILON;

        let progress01 = match model {
            TimeModel::Finite { .. } => phase_a.clamp(0.0, 1.0),
            _ => phase_a.rem_euclid(1.0),
        };

        self.prev_base_time_ms = t_model_ms;
        self.prev_visible_phase = phase_a.rem_euclid(1.0);

        TimeState {
            dt,
            phase_a,
            phase_b,
            wrap_event,
            progress01,
        }
    }
}

/// Per-target continuity bookkeeping for `Crossfade` (\u{00a7}4.11): everything
/// else (`Preserve`'s additive gauge, `Slew`'s running filter, `Project`'s
/// post-mapping baseline) lives in the pooled buffer itself, keyed by the
/// same [`StableTargetId`] \u{2014} only crossfade needs a second buffer plus
/// timing state alongside it.
#[derive(Default)]
struct TargetState {
    crossfade_from: Vec<f32>,
    crossfade_elapsed_ms: f64,
    crossfading: bool,
}

/// The runtime half of continuity (\u{00a7}3.4 `continuity`, \u{00a7}4.11): per-target
/// gauge/slew/crossfade state, the per-instance element mapping cache, and
/// the pooled buffers both are built from. Outlives any single compiled
/// program \u{2014} a hot-swap rebinds targets by [`StableTargetId`], not by slot
/// (\u{00a7}4.11.3).
#[derive(Default)]
pub struct ContinuityState {
    targets: FxHashMap<StableTargetId, TargetState>,
    mappings: FxHashMap<InstanceId, Vec<MappingResult>>,
    mapping_keys: FxHashMap<InstanceId, (u64, u64)>,
    prev_domains: FxHashMap<InstanceId, DomainSnapshot>,
    policy_overrides: FxHashMap<StableTargetId, ContinuityPolicy>,
    pool: ContinuityPool,
    pub config: ContinuityConfig,
}

fn element_keys(snapshot: &DomainSnapshot) -> Vec<ElementKey> {
    match (&snapshot.identity_mode, &snapshot.element_id) {
        (Some(IdentityMode::Stable), Some(ids)) => {
            ids.iter().map(|&id| ElementKey::Identity(u64::from(id))).collect()
        }
        _ => (0..snapshot.count).map(ElementKey::Position).collect(),
    }
}

impl ContinuityState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// \u{00a7}6.1 `setContinuityPolicy`: overrides a target's compiled-in policy
    /// at runtime, surviving until the next override or hot-swap.
    pub fn set_policy(&mut self, target: StableTargetId, policy: ContinuityPolicy) {
        self.policy_overrides.insert(target, policy);
    }

    /// \u{00a7}6.1 `setContinuityConfig`: survives hot-swap, unlike compiled state.
    pub fn set_config(&mut self, config: ContinuityConfig) {
        self.config = config;
    }

    fn resolve_policy(&self, target: StableTargetId, compiled: ContinuityPolicy) -> ContinuityPolicy {
        self.policy_overrides.get(&target).copied().unwrap_or(compiled)
    }

    /// \u{00a7}4.10 step 4 / \u{00a7}4.11.2: compares this frame's domain snapshot
    /// against last frame's and rebuilds the element mapping only when the
    /// cache key (`oldDomainKey, newDomainKey`) actually changed.
    ///
    /// Returns whether the domain changed this frame, and whether the change
    /// forced a `DomainMismatch` fallback (no stable identity available).
    fn map_build(&mut self, instance: InstanceId, registry: &InstanceRegistry) -> (bool, bool) {
        let first_seen = !self.prev_domains.contains_key(&instance);
        let current = registry.get(instance).cloned().unwrap_or_default();
        let prev = self.prev_domains.get(&instance).cloned().unwrap_or_default();
        let new_key = current.domain_key();
        let old_key = prev.domain_key();
        let cache_key = (old_key, new_key);

        let unchanged = self.mapping_keys.get(&instance) == Some(&cache_key) && old_key == new_key;
        if unchanged {
            return (false, false);
        }

        let identity_available = matches!(current.identity_mode, Some(IdentityMode::Stable))
            && current.element_id.is_some();
        // A first-ever publish is never a "mismatch" — there is no prior
        // domain to have lost track of.
        let mismatch = !first_seen && !identity_available && prev.count != current.count;

        let old_keys = element_keys(&prev);
        let new_keys = element_keys(&current);
        let mapping = map_elements(instance, &old_keys, &new_keys);

        self.mappings.insert(instance, mapping);
        self.mapping_keys.insert(instance, cache_key);
        self.prev_domains.insert(instance, current);
        (true, mismatch)
    }

    /// \u{00a7}4.10 step 5 / \u{00a7}4.11: applies `policy` to `raw` (this frame's freshly
    /// materialized base buffer), returning the effective per-element output.
    /// `domain_changed` gates the one-time remap every policy but `None`
    /// performs against its pooled running buffer.
    fn apply(
        &mut self,
        target: StableTargetId,
        instance: InstanceId,
        compiled_policy: ContinuityPolicy,
        raw: &[f32],
        stride: usize,
        dt_ms: f64,
        domain_changed: bool,
    ) -> Vec<f32> {
        let policy = self.resolve_policy(target, compiled_policy);
        let mapping = self.mappings.get(&instance).cloned();
        let len = raw.len();
        let decay = self.config.decay_exponent;
        let tau_mult = self.config.tau_multiplier;

        match policy {
            ContinuityPolicy::None => raw.to_vec(),
            ContinuityPolicy::Preserve => {
                preserve_pool(&mut self.pool, target, raw, stride, len, mapping.as_deref(), domain_changed)
            }
            ContinuityPolicy::Slew { tau_ms } => slew_pool(
                &mut self.pool,
                target,
                raw,
                stride,
                len,
                mapping.as_deref(),
                domain_changed,
                dt_ms,
                tau_ms * tau_mult,
            ),
            ContinuityPolicy::Crossfade { duration_ms } => {
                if domain_changed {
                    let prev_eff = self.pool.get_or_resize(target, len).to_vec();
                    let state = self.targets.entry(target).or_default();
                    state.crossfade_from = prev_eff;
                    state.crossfade_elapsed_ms = 0.0;
                    state.crossfading = true;
                }
                let state = self.targets.entry(target).or_default();
                if state.crossfading {
                    state.crossfade_elapsed_ms += dt_ms;
                    let duration = (duration_ms * tau_mult).max(f64::EPSILON);
                    let w = (state.crossfade_elapsed_ms / duration).clamp(0.0, 1.0).powf(decay);
                    if w >= 1.0 {
                        state.crossfading = false;
                    }
                    let from = state.crossfade_from.clone();
                    let out: Vec<f32> = (0..len)
                        .map(|i| {
                            let a = from.get(i).copied().unwrap_or(0.0);
                            let b = raw.get(i).copied().unwrap_or(0.0);
                            #[allow(clippy::cast_possible_truncation)]
                            {
                                (f64::from(a) + (f64::from(b) - f64::from(a)) * w) as f32
                            }
                        })
                        .collect();
                    let buf = self.pool.get_or_resize(target, len);
                    buf.copy_from_slice(&out);
                    out
                } else {
                    let buf = self.pool.get_or_resize(target, len);
                    buf.copy_from_slice(raw);
                    raw.to_vec()
                }
            }
            ContinuityPolicy::Project { post } => {
                if domain_changed {
                    if let Some(mapping) = &mapping {
                        let remapped = {
                            let buf = self.pool.get_or_resize(target, len);
                            remap(buf, stride, mapping, len)
                        };
                        let buf = self.pool.get_or_resize(target, len);
                        buf.copy_from_slice(&remapped);
                    }
                }
                match post {
                    PostPolicy::None => {
                        let buf = self.pool.get_or_resize(target, len);
                        buf.copy_from_slice(raw);
                        raw.to_vec()
                    }
                    PostPolicy::Preserve => self.pool.get_or_resize(target, len).to_vec(),
                    PostPolicy::Slew { tau_ms } => {
                        slew_pool(&mut self.pool, target, raw, stride, len, None, false, dt_ms, tau_ms * tau_mult)
                    }
                }
            }
        }
    }
}

/// Remaps a pooled buffer's elements according to `mapping` (\u{00a7}4.11.2):
/// element `new_index` takes on whatever `old_buf` held at its matched
/// `old_index`, or stays zero for a `New` element.
fn remap(old_buf: &[f32], stride: usize, mapping: &[MappingResult], len: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; len];
    for (new_index, m) in mapping.iter().enumerate() {
        let old_index = match m {
            MappingResult::Matched { old_index } | MappingResult::PositionFallback { old_index } => {
                Some(*old_index as usize)
            }
            MappingResult::New => None,
        };
        if let Some(old_index) = old_index {
            for lane in 0..stride {
                let src = old_index * stride + lane;
                let dst = new_index * stride + lane;
                if src < old_buf.len() && dst < out.len() {
                    out[dst] = old_buf[src];
                }
            }
        }
    }
    out
}

/// `Preserve` (\u{00a7}4.11): `x_eff[i] = x_base[i] + \u{0394}[i]`, where `\u{0394}` is the
/// pooled gauge buffer, recomputed only on a domain change so the mapped
/// element's *effective* value doesn't jump even though its array position
/// did.
fn preserve_pool(
    pool: &mut ContinuityPool,
    target: StableTargetId,
    raw: &[f32],
    stride: usize,
    len: usize,
    mapping: Option<&[MappingResult]>,
    domain_changed: bool,
) -> Vec<f32> {
    let buf = pool.get_or_resize(target, len);
    if domain_changed {
        if let Some(mapping) = mapping {
            let old_eff: Vec<f32> = raw.iter().zip(buf.iter()).map(|(x, d)| x + d).collect();
            let remapped_old_eff = remap(&old_eff, stride, mapping, len);
            for i in 0..len {
                buf[i] = remapped_old_eff[i] - raw.get(i).copied().unwrap_or(0.0);
            }
        } else {
            buf.iter_mut().for_each(|d| *d = 0.0);
        }
    }
    raw.iter().zip(buf.iter()).map(|(x, d)| x + d).collect()
}

/// `Slew` (\u{00a7}4.11): `y[i] += (1 - exp(-dt/\u{03c4})) * (x_base[i] - y[i])`. The
/// pooled buffer holds `y` directly; on a domain change it is remapped
/// in place before the filter runs, same as [`preserve_pool`]'s gauge.
#[allow(clippy::too_many_arguments)]
fn slew_pool(
    pool: &mut ContinuityPool,
    target: StableTargetId,
    raw: &[f32],
    stride: usize,
    len: usize,
    mapping: Option<&[MappingResult]>,
    domain_changed: bool,
    dt_ms: f64,
    tau_ms: f64,
) -> Vec<f32> {
    let buf = pool.get_or_resize(target, len);
    if domain_changed {
        if let Some(mapping) = mapping {
            let remapped = remap(buf, stride, mapping, len);
            buf.copy_from_slice(&remapped);
        }
    }
    let alpha = if tau_ms > 0.0 { 1.0 - (-dt_ms / tau_ms).exp() } else { 1.0 };
    #[allow(clippy::cast_possible_truncation)]
    let alpha = alpha as f32;
    for i in 0..len {
        let t = raw.get(i).copied().unwrap_or(0.0);
        buf[i] += alpha * (t - buf[i]);
    }
    buf.to_vec()
}

/// The engine's long-lived per-instance execution state (\u{00a7}3.4
/// `RuntimeState`): allocated once per process, resized lazily by slot count,
/// and never reset wholesale except by an explicit `fresh` load strategy.
#[derive(Default)]
pub struct RuntimeState {
    pub banks: ValueBanks,
    pub state: Vec<f64>,
    pub registry: InstanceRegistry,
    pub continuity: ContinuityState,
    pub health: HealthRingBuffers,
    frame_id: u64,
    time_gauge: TimeGauge,
    pending_diagnostics: Vec<Diagnostic>,
}

/// \u{00a7}6.1 `loadProgram`'s `strategy` parameter: whether a hot-swap keeps the
/// continuity layer alive or resets everything to a blank slate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStrategy {
    Fresh,
    PreserveContinuity,
}

impl RuntimeState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// \u{00a7}6.1 `createRuntime(slotCount)`: pre-reserves the flat value banks so
    /// the first frame doesn't pay a growth cost. `slot_count` is advisory —
    /// banks still grow lazily past it if a later program needs more.
    #[must_use]
    pub fn with_capacity(slot_count: usize) -> Self {
        let mut rt = Self::new();
        rt.banks.reserve(slot_count, slot_count, slot_count, slot_count);
        rt.state.reserve(slot_count);
        rt
    }

    /// \u{00a7}6.1 `loadProgram`: prepares this runtime for a newly compiled
    /// program. `Fresh` clears every value/state bank and the continuity
    /// layer; `PreserveContinuity` clears only the per-frame value/state
    /// banks (a new program's slot layout is never compatible with the old
    /// one) while keeping `continuity` intact, so a hot-swapped patch's
    /// targets resume from their prior gauge/slew state once the debug index
    /// rebinds their [`StableTargetId`]s to the new slots (\u{00a7}4.11.3).
    pub fn load_program(&mut self, program: &CompiledProgram, strategy: LoadStrategy) {
        let (f64_len, f32_len, i32_len, u32_len) = bank_lengths(program);
        self.banks = ValueBanks::new();
        self.banks.reserve(f64_len, f32_len, i32_len, u32_len);
        self.state = vec![0.0; state_len(program)];
        for meta in &program.state_meta {
            let offset = meta.offset as usize;
            if let Some(slot) = self.state.get_mut(offset) {
                *slot = init_lane0(&meta.init);
            }
        }
        if strategy == LoadStrategy::Fresh {
            self.continuity = ContinuityState::new();
            self.time_gauge = TimeGauge::default();
        }
    }

    /// Drains the runtime-health diagnostics accumulated since the last call
    /// (\u{00a7}4.13 `RuntimeHealthSnapshot`): NaN/Inf slot faults, frame-budget
    /// overruns, and domain-mismatch fallbacks observed during the frames
    /// executed in between.
    pub fn take_health_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.pending_diagnostics)
    }

    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    fn push_health_diagnostic(
        &mut self,
        program: &CompiledProgram,
        code: DiagnosticCode,
        target: Option<ValueSlot>,
        title: &str,
        message: String,
    ) {
        let primary = target
            .and_then(|s| program.debug_index.slot_to_block.get(&s.0).copied())
            .map_or(PrimaryTarget::Patch, PrimaryTarget::Block);
        let scope = DiagnosticScope {
            patch_revision: 0,
            compile_id: None,
            runtime_session_id: Some(self.frame_id),
        };
        self.pending_diagnostics.push(Diagnostic::new(
            code,
            Severity::Warning,
            DiagDomain::Runtime,
            primary,
            scope,
            title,
            message,
        ));
    }
}

#[allow(clippy::cast_precision_loss)]
fn init_lane0(v: &crate::ir::ConstValue) -> f64 {
    use crate::ir::ConstValue;
    match v {
        ConstValue::Float(f) => *f,
        ConstValue::Int(i) => *i as f64,
        ConstValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        ConstValue::Vec2(v) => v[0],
        ConstValue::Vec3(v) => v[0],
        ConstValue::Color(c) => c[0],
    }
}

fn bank_lengths(program: &CompiledProgram) -> (usize, usize, usize, usize) {
    let mut f64_len = 0usize;
    let mut f32_len = 0usize;
    let mut i32_len = 0usize;
    let mut u32_len = 0usize;
    for meta in &program.slot_meta {
        let stride = meta
            .ty
            .payload
            .inst()
            .and_then(crate::types::Payload::float_stride)
            .unwrap_or(1) as usize;
        let end = meta.offset as usize + stride;
        match meta.storage {
            Storage::F64 => f64_len = f64_len.max(end),
            Storage::F32 => f32_len = f32_len.max(end),
            Storage::I32 => i32_len = i32_len.max(end),
            Storage::U32 => u32_len = u32_len.max(end),
            Storage::Object => {}
        }
    }
    (f64_len, f32_len, i32_len, u32_len)
}

fn state_len(program: &CompiledProgram) -> usize {
    program
        .state_meta
        .iter()
        .map(|m| m.offset as usize + m.stride as usize)
        .max()
        .unwrap_or(0)
}

fn has_non_finite(lanes: &[f64]) -> bool {
    lanes.iter().any(|v| !v.is_finite())
}

/// Executes one frame (\u{00a7}4.10) of `program` against `rt` at model time
/// `t_model_ms`, returning the assembled [`crate::render::RenderFrame`].
///
/// Never fails: a step that would write a non-finite value instead zeroes
/// its slot and records a runtime-health diagnostic (drained via
/// [`RuntimeState::take_health_diagnostics`]), matching \u{00a7}7's "runtime errors
/// never throw out of `runFrame`".
pub fn run_frame(
    rt: &mut RuntimeState,
    program: &CompiledProgram,
    t_model_ms: f64,
    discontinuity: Option<Discontinuity>,
) -> crate::render::RenderFrame {
    rt.frame_id += 1;
    let frame_id = rt.frame_id;

    let (f64_len, f32_len, i32_len, u32_len) = bank_lengths(program);
    rt.banks.reserve(f64_len, f32_len, i32_len, u32_len);
    if rt.state.len() < state_len(program) {
        rt.state.resize(state_len(program), 0.0);
    }

    let time = rt.time_gauge.advance(program.time_model, t_model_ms, discontinuity);
    let dt_ms = time.dt;

    // Populated by `ContinuityMapBuild` steps and consumed by the
    // `ContinuityApply` steps that follow them in the same frame's schedule
    // (\u{00a7}4.9: map-build always precedes its apply).
    let mut domain_changed_this_frame: FxHashMap<InstanceId, bool> = FxHashMap::default();

    for step in &program.schedule {
        match step {
            Step::EvalValue { expr, target_slot } => {
                let lanes = eval::eval_expr(program, &rt.banks, &rt.state, &time, &rt.registry, *expr, None);
                let meta = program.slot_meta(*target_slot);
                let (storage, offset) = (meta.storage, meta.offset);
                if has_non_finite(&lanes) {
                    let zero = vec![0.0; lanes.len().max(1)];
                    rt.banks.write_lanes(storage, offset, &zero);
                    rt.push_health_diagnostic(
                        program,
                        DiagnosticCode::NaN,
                        Some(*target_slot),
                        "Non-finite value zeroed",
                        format!("slot {} produced a non-finite value this frame", target_slot.0),
                    );
                } else {
                    rt.banks.write_lanes(storage, offset, &lanes);
                }
            }
            Step::Materialize {
                field_expr,
                instance,
                target_slot,
            } => {
                eval::materialize_into_slot(
                    program,
                    &mut rt.banks,
                    &rt.state,
                    &time,
                    &rt.registry,
                    *field_expr,
                    *instance,
                    *target_slot,
                );
            }
            Step::ContinuityMapBuild { instance, .. } => {
                let (changed, mismatch) = rt.continuity.map_build(*instance, &rt.registry);
                domain_changed_this_frame.insert(*instance, changed);
                if mismatch {
                    rt.push_health_diagnostic(
                        program,
                        DiagnosticCode::DomainMismatch,
                        None,
                        "Continuity mapping fell back to crossfade",
                        format!("instance {instance:?} changed count with no stable identity"),
                    );
                }
            }
            Step::ContinuityApply {
                target_key,
                instance,
                policy,
                base_slot,
                output_slot,
            } => {
                let stride = eval::stride_of(&program.slot_meta(*base_slot).ty);
                let raw: Vec<f32> = match rt.banks.objects.get(&base_slot.0) {
                    Some(ObjectValue::Field(buf)) => buf.clone(),
                    _ => Vec::new(),
                };
                let domain_changed = domain_changed_this_frame.get(instance).copied().unwrap_or(false);
                let out = rt.continuity.apply(*target_key, *instance, *policy, &raw, stride, dt_ms, domain_changed);
                rt.banks.objects.insert(output_slot.0, ObjectValue::Field(out));
            }
            Step::Render { .. } => {
                // Assembled in the dedicated render pass below, after every
                // phase-1 step has populated its slots.
            }
            Step::StateWrite { state_slot, value_expr } => {
                let lanes = eval::eval_expr(program, &rt.banks, &rt.state, &time, &rt.registry, *value_expr, None);
                let meta = program.state_slot_meta(*state_slot);
                let offset = meta.offset as usize;
                let stride = meta.stride as usize;
                for lane in 0..stride {
                    if let Some(slot) = rt.state.get_mut(offset + lane) {
                        *slot = lanes.get(lane).copied().unwrap_or(0.0);
                    }
                }
            }
            Step::FieldStateWrite {
                base_slot,
                instance,
                value_expr,
            } => {
                eval::materialize_into_slot(program, &mut rt.banks, &rt.state, &time, &rt.registry, *value_expr, *instance, *base_slot);
            }
        }
    }

    let frame = assemble_render_frame(program, &rt.banks, &rt.registry);
    rt.health.schedule_exec.push(frame_id, 0);
    frame
}


fn assemble_render_frame(
    program: &CompiledProgram,
    banks: &ValueBanks,
    registry: &InstanceRegistry,
) -> crate::render::RenderFrame {
    use crate::render::{DrawPathInstancesOp, FillRule, Geometry, InstanceScalar, PathStyle, RenderFrame, RenderOp, ShapeDescriptor, InstanceTransform};

    let mut frame = RenderFrame::new();

    for step in &program.schedule {
        let Step::Render {
            instance,
            position_slot,
            color_slot,
            size_slot,
            rotation_slot,
            scale2_slot,
            shape,
        } = step
        else {
            continue;
        };

        let count = registry.count_of(*instance) as usize;
        let positions = read_field_f32(banks, *position_slot, count * 2);
        let colors = read_field_f32(banks, *color_slot, count * 4);
        let sizes = size_slot.map(|s| read_field_f32(banks, s, count));
        let rotations = rotation_slot.map(|s| read_field_f32(banks, s, count));
        let scale2 = scale2_slot.map(|s| read_field_f32(banks, s, count * 2));

        let transforms: Vec<InstanceTransform> = (0..count)
            .map(|i| InstanceTransform {
                position: [
                    positions.get(i * 2).copied().unwrap_or(0.0),
                    positions.get(i * 2 + 1).copied().unwrap_or(0.0),
                ],
                size: sizes.as_ref().and_then(|v| v.get(i)).copied().unwrap_or(1.0),
                rotation: rotations.as_ref().and_then(|v| v.get(i)).copied(),
                scale2: scale2.as_ref().map(|v| {
                    [v.get(i * 2).copied().unwrap_or(1.0), v.get(i * 2 + 1).copied().unwrap_or(1.0)]
                }),
            })
            .collect();

        let fill_colors: Vec<[u8; 4]> = (0..count)
            .map(|i| {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let lane = |k: usize| (colors.get(i * 4 + k).copied().unwrap_or(0.0).clamp(0.0, 1.0) * 255.0) as u8;
                [lane(0), lane(1), lane(2), lane(3)]
            })
            .collect();

        match shape {
            ShapeSource::Uniform(topology_id) => {
                let topology = crate::render::resolve_uniform_topology(*topology_id);
                let mut fill = [0u8; 4];
                if let Some(c) = fill_colors.first() {
                    fill = *c;
                }
                frame.ops.push(RenderOp::DrawPathInstances(DrawPathInstancesOp {
                    geometry: Geometry {
                        topology_id: topology.id,
                        verbs: topology.verbs.to_vec(),
                        points: topology.points.to_vec(),
                        points_count: topology.points.len() as u32 / 2,
                        flags: 0,
                    },
                    count: count as u32,
                    position: positions,
                    size: sizes.map_or(InstanceScalar::Uniform(1.0), InstanceScalar::PerInstance),
                    rotation: rotations.map(InstanceScalar::PerInstance),
                    scale2,
                    style: PathStyle {
                        fill_color: fill,
                        stroke_color: None,
                        fill_rule: FillRule::NonZero,
                    },
                }));
            }
            ShapeSource::PerInstanceSlot(shape_slot) => {
                let words = read_field_f32(banks, *shape_slot, count * crate::render::SHAPE_WORD_COUNT);
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let shapes: Vec<ShapeDescriptor> = (0..count)
                    .map(|i| {
                        let base = i * crate::render::SHAPE_WORD_COUNT;
                        let mut w = [0u32; crate::render::SHAPE_WORD_COUNT];
                        for (lane, slot) in w.iter_mut().enumerate() {
                            *slot = words.get(base + lane).copied().unwrap_or(0.0).round().max(0.0) as u32;
                        }
                        ShapeDescriptor::decode(&w)
                    })
                    .collect();
                frame.ops.extend(
                    crate::render::group_by_topology(&shapes, &transforms, &fill_colors)
                        .into_iter()
                        .map(RenderOp::DrawPathInstances),
                );
            }
        }
    }

    frame
}

fn read_field_f32(banks: &ValueBanks, slot: ValueSlot, expected_len: usize) -> Vec<f32> {
    match banks.objects.get(&slot.0) {
        Some(ObjectValue::Field(buf)) => {
            if buf.len() >= expected_len {
                buf[..expected_len].to_vec()
            } else {
                let mut v = buf.clone();
                v.resize(expected_len, 0.0);
                v
            }
        }
        _ => vec![0.0; expected_len],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_gauge_is_identity_with_no_discontinuity() {
        let mut gauge = TimeGauge::default();
        let a = gauge.advance(TimeModel::Finite { period_ms: 1000.0 }, 900.0, None);
        let b = gauge.advance(TimeModel::Finite { period_ms: 1000.0 }, 950.0, None);
        assert!((b.phase_a - 0.95).abs() < 1e-9);
        assert!((a.phase_a - 0.9).abs() < 1e-9);
    }

    #[test]
    fn seek_discontinuity_preserves_visible_phase() {
        let mut gauge = TimeGauge::default();
        let before = gauge.advance(TimeModel::Finite { period_ms: 1000.0 }, 900.0, None);
        let after = gauge.advance(TimeModel::Finite { period_ms: 1000.0 }, 200.0, Some(Discontinuity::Seek));
        assert!((before.phase_a - after.phase_a).abs() < 1e-6);
    }

    #[test]
    fn domain_change_triggers_a_mapping_rebuild() {
        let mut continuity = ContinuityState::new();
        let mut registry = InstanceRegistry::new();
        let instance = InstanceId(crate::ident::anchor_id("instance", b"", "p"));
        registry.publish(instance, DomainSnapshot::uniform(5));
        let (changed, mismatch) = continuity.map_build(instance, &registry);
        assert!(changed);
        assert!(!mismatch);
        let (changed_again, _) = continuity.map_build(instance, &registry);
        assert!(!changed_again);
    }

    #[test]
    fn preserve_policy_holds_value_steady_across_a_domain_resize() {
        let mut continuity = ContinuityState::new();
        let mut registry = InstanceRegistry::new();
        let instance = InstanceId(crate::ident::anchor_id("instance", b"", "p"));
        let target = crate::ident::make_target_id("position", crate::ident::BlockId([1; 32]), "out", &[1]);
        registry.publish(instance, DomainSnapshot::uniform(2));
        continuity.map_build(instance, &registry);
        let raw = vec![1.0f32, 2.0];
        let out1 = continuity.apply(target, instance, ContinuityPolicy::Preserve, &raw, 1, 16.0, false);
        assert_eq!(out1, raw);
    }
}
