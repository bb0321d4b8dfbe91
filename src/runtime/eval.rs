// SPDX-License-Identifier: Apache-2.0
//! Value-expression evaluation (\u{00a7}4.9 `evalValue`: "Dispatch at runtime on
//! derived kind"; \u{00a7}4.10 steps 2\u{2013}3).
//!
//! One recursive function, [`eval_expr`], handles every [`DerivedKind`]. The
//! only branch point between a signal-level `evalValue` and a per-element
//! `materialize` is [`ElementContext`]: each operand of a
//! [`crate::ir::ValueExprKind::Kernel`] call is evaluated with the context
//! forwarded only if that operand's own type is a field (\u{00a7}3.1) \u{2014} a
//! signal operand folded into a `Zip`/`Broadcast` kernel is evaluated once,
//! uniformly, regardless of which element the caller is materializing. This
//! collapses `Map`/`Zip`/`Broadcast` into one code path; only `Reduce` needs
//! its own, since it walks the operand's entire domain rather than one
//! element of it.

use super::domain::InstanceRegistry;
use super::TimeState;
use crate::ident::ValueSlot;
use crate::ir::{
    ConstValue, Intrinsic, KernelFn, KernelShape, Storage, TimeRail, ValueExprKind,
};
use crate::types::{CanonicalType, Payload};

/// The runtime's physical value storage, banked by [`Storage`] class
/// (\u{00a7}3.4 `values`). Scalars and vectors live in flat typed arrays
/// addressed by `SlotMeta::offset`; field buffers and render frames live in
/// `objects`, addressed directly by slot number.
#[derive(Default)]
pub struct ValueBanks {
    pub f64: Vec<f64>,
    pub f32: Vec<f32>,
    pub i32: Vec<i32>,
    pub u32: Vec<u32>,
    pub objects: rustc_hash::FxHashMap<u32, ObjectValue>,
}

/// What can live in the `objects` bank: a materialized field buffer, or a
/// fully assembled render frame (\u{00a7}3.4: "holds field buffers and render
/// frames").
#[derive(Clone, Debug)]
pub enum ObjectValue {
    Field(Vec<f32>),
    RenderFrame(crate::render::RenderFrame),
}

impl ValueBanks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows each flat bank to at least `len` lanes, never shrinking \u{2014}
    /// matches \u{00a7}3.4's "resized lazily by slot-count" lifecycle.
    pub fn reserve(&mut self, f64_len: usize, f32_len: usize, i32_len: usize, u32_len: usize) {
        if self.f64.len() < f64_len {
            self.f64.resize(f64_len, 0.0);
        }
        if self.f32.len() < f32_len {
            self.f32.resize(f32_len, 0.0);
        }
        if self.i32.len() < i32_len {
            self.i32.resize(i32_len, 0);
        }
        if self.u32.len() < u32_len {
            self.u32.resize(u32_len, 0);
        }
    }

    pub(super) fn write_lanes(&mut self, storage: Storage, offset: u32, lanes: &[f64]) {
        let offset = offset as usize;
        match storage {
            Storage::F64 => {
                for (i, v) in lanes.iter().enumerate() {
                    self.f64[offset + i] = *v;
                }
            }
            Storage::F32 => {
                for (i, v) in lanes.iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        self.f32[offset + i] = *v as f32;
                    }
                }
            }
            Storage::I32 => {
                #[allow(clippy::cast_possible_truncation)]
                {
                    // Rounds rather than truncates (\u{00a7}SPEC_FULL adapter table:
                    // "float\u{2194}int (round)"); a genuinely integral value (the
                    // common case, written by blocks that never went through a
                    // float_to_int adapter) rounds to itself, so this is safe
                    // for every writer of an I32 slot, not just that adapter.
                    self.i32[offset] = lanes.first().copied().unwrap_or(0.0).round() as i32;
                }
            }
            Storage::U32 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    self.u32[offset] = lanes.first().copied().unwrap_or(0.0).max(0.0) as u32;
                }
            }
            Storage::Object => {}
        }
    }
}

/// Which element of a field a [`ValueExprKind::Intrinsic`] or field
/// `External` read should resolve against. `None` at the top of an
/// `evalValue` dispatch; `Some` once `materialize` descends into a domain.
#[derive(Clone, Copy, Debug)]
pub struct ElementContext {
    pub index: u32,
    pub count: u32,
    pub instance: crate::ident::InstanceId,
}

fn const_lanes(v: &ConstValue) -> Vec<f64> {
    match v {
        ConstValue::Float(f) => vec![*f],
        ConstValue::Int(i) => vec![*i as f64],
        ConstValue::Bool(b) => vec![if *b { 1.0 } else { 0.0 }],
        ConstValue::Vec2(v) => v.to_vec(),
        ConstValue::Vec3(v) => v.to_vec(),
        ConstValue::Color(c) => c.to_vec(),
    }
}

pub(super) fn stride_of(ty: &CanonicalType) -> usize {
    ty.payload
        .inst()
        .and_then(Payload::float_stride)
        .unwrap_or(1) as usize
}

/// Stable per-element float in `[0, 1)`, seeded by `(instanceId, index)`
/// (\u{00a7}SPEC_FULL "Intrinsic value expressions": `randomId`).
fn random_id(instance: crate::ident::InstanceId, index: u32) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"random-id\0");
    hasher.update(instance.as_bytes());
    hasher.update(&index.to_le_bytes());
    let digest = hasher.finalize();
    let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().unwrap_or([0; 8]);
    #[allow(clippy::cast_precision_loss)]
    {
        (u64::from_le_bytes(bytes) as f64) / (u64::MAX as f64)
    }
}

fn eval_intrinsic(intrinsic: Intrinsic, ctx: Option<ElementContext>) -> Vec<f64> {
    match intrinsic {
        Intrinsic::Index => vec![f64::from(ctx.map_or(0, |c| c.index))],
        Intrinsic::NormIndex => {
            let Some(c) = ctx else { return vec![0.0] };
            if c.count <= 1 {
                vec![0.0]
            } else {
                vec![f64::from(c.index) / f64::from(c.count - 1)]
            }
        }
        Intrinsic::RandomId => {
            let Some(c) = ctx else { return vec![0.0] };
            vec![random_id(c.instance, c.index)]
        }
        Intrinsic::Uv => {
            let Some(c) = ctx else { return vec![0.0, 0.0] };
            let x = if c.count <= 1 {
                0.0
            } else {
                f64::from(c.index) / f64::from(c.count - 1)
            };
            vec![x, 0.0]
        }
        // No domain in this version declares an explicit ordering key, so
        // rank falls back to spawn/index order.
        Intrinsic::Rank => vec![f64::from(ctx.map_or(0, |c| c.index))],
        Intrinsic::Seed => vec![0.0],
    }
}

fn apply_kernel_fn(function: KernelFn, operands: &[Vec<f64>]) -> Vec<f64> {
    match function {
        KernelFn::Add => zip_lanes(operands, |a, b| a + b),
        KernelFn::Sub => zip_lanes(operands, |a, b| a - b),
        KernelFn::Mul => zip_lanes(operands, |a, b| a * b),
        KernelFn::Div => zip_lanes(operands, |a, b| if b == 0.0 { 0.0 } else { a / b }),
        KernelFn::Lerp => {
            let a = operands.first().cloned().unwrap_or_default();
            let b = operands.get(1).cloned().unwrap_or_default();
            let t = operands.get(2).and_then(|v| v.first()).copied().unwrap_or(0.0);
            a.iter()
                .zip(b.iter().chain(std::iter::repeat(&0.0)))
                .map(|(x, y)| x + (y - x) * t)
                .collect()
        }
        KernelFn::Clamp01 => operands
            .first()
            .map(|v| v.iter().map(|x| x.clamp(0.0, 1.0)).collect())
            .unwrap_or_default(),
        KernelFn::Sin => operands
            .first()
            .map(|v| v.iter().map(|x| libm::sin(*x)).collect())
            .unwrap_or_default(),
        KernelFn::Cos => operands
            .first()
            .map(|v| v.iter().map(|x| libm::cos(*x)).collect())
            .unwrap_or_default(),
        KernelFn::Frac => operands
            .first()
            .map(|v| v.iter().map(|x| x - libm::floor(*x)).collect())
            .unwrap_or_default(),
        KernelFn::HslToRgb => hsl_to_rgb(operands.first().map(Vec::as_slice).unwrap_or(&[0.0; 3])),
        KernelFn::Length => {
            let v = operands.first().cloned().unwrap_or_default();
            vec![libm::sqrt(v.iter().map(|x| x * x).sum())]
        }
        KernelFn::Normalize => {
            let v = operands.first().cloned().unwrap_or_default();
            let len = libm::sqrt(v.iter().map(|x| x * x).sum());
            if len <= f64::EPSILON {
                v
            } else {
                v.iter().map(|x| x / len).collect()
            }
        }
        KernelFn::PadVec2To3 => {
            let v = operands.first().cloned().unwrap_or_default();
            vec![
                v.first().copied().unwrap_or(0.0),
                v.get(1).copied().unwrap_or(0.0),
                0.0,
            ]
        }
        KernelFn::TruncateVec3To2 => {
            let v = operands.first().cloned().unwrap_or_default();
            vec![v.first().copied().unwrap_or(0.0), v.get(1).copied().unwrap_or(0.0)]
        }
        KernelFn::Slew => {
            let prev = operands.first().cloned().unwrap_or_default();
            let target = operands.get(1).cloned().unwrap_or_default();
            let dt = operands.get(2).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let tau = operands.get(3).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let alpha = if tau > 0.0 { 1.0 - libm::exp(-dt / tau) } else { 1.0 };
            prev.iter()
                .zip(target.iter().chain(std::iter::repeat(&0.0)))
                .map(|(p, t)| p + alpha * (t - p))
                .collect()
        }
        KernelFn::LagExponential => {
            let prev = operands.first().cloned().unwrap_or_default();
            let target = operands.get(1).cloned().unwrap_or_default();
            let dt = operands.get(2).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let rise_tau = operands.get(3).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let fall_tau = operands.get(4).and_then(|v| v.first()).copied().unwrap_or(rise_tau);
            prev.iter()
                .zip(target.iter().chain(std::iter::repeat(&0.0)))
                .map(|(p, t)| {
                    let diff = t - p;
                    let tau = if diff >= 0.0 { rise_tau } else { fall_tau };
                    let alpha = if tau > 0.0 { 1.0 - libm::exp(-dt / tau) } else { 1.0 };
                    p + alpha * diff
                })
                .collect()
        }
        KernelFn::LagLinear => {
            let prev = operands.first().cloned().unwrap_or_default();
            let target = operands.get(1).cloned().unwrap_or_default();
            let dt = operands.get(2).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let rise_rate = operands.get(3).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let fall_rate = operands.get(4).and_then(|v| v.first()).copied().unwrap_or(rise_rate);
            prev.iter()
                .zip(target.iter().chain(std::iter::repeat(&0.0)))
                .map(|(p, t)| {
                    let diff = t - p;
                    let rate = if diff >= 0.0 { rise_rate } else { fall_rate };
                    let max_step = rate * dt / 1000.0;
                    if max_step <= 0.0 {
                        *p
                    } else if diff.abs() <= max_step {
                        *t
                    } else {
                        p + max_step * diff.signum()
                    }
                })
                .collect()
        }
        KernelFn::SampleAndHold => {
            let held = operands.first().cloned().unwrap_or_default();
            let value = operands.get(1).cloned().unwrap_or_default();
            let trigger = operands.get(2).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let prev_trigger = operands.get(3).and_then(|v| v.first()).copied().unwrap_or(0.0);
            let rising = trigger >= 0.5 && prev_trigger < 0.5;
            if rising {
                value
            } else {
                held
            }
        }
    }
}

fn zip_lanes(operands: &[Vec<f64>], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let a = operands.first().cloned().unwrap_or_default();
    let b = operands.get(1).cloned().unwrap_or_default();
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or_else(|| a.first().copied().unwrap_or(0.0));
            let y = b.get(i).copied().unwrap_or_else(|| b.first().copied().unwrap_or(0.0));
            f(x, y)
        })
        .collect()
}

fn hsl_to_rgb(hsl: &[f64]) -> Vec<f64> {
    let h = hsl.first().copied().unwrap_or(0.0).rem_euclid(1.0);
    let s = hsl.get(1).copied().unwrap_or(0.0).clamp(0.0, 1.0);
    let l = hsl.get(2).copied().unwrap_or(0.0).clamp(0.0, 1.0);
    if s <= f64::EPSILON {
        return vec![l, l, l, 1.0];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let hue_to_rgb = |p: f64, q: f64, t: f64| {
        let t = t.rem_euclid(1.0);
        if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        }
    };
    vec![
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
        1.0,
    ]
}

/// Reads a physical slot's lanes out of the value banks. `ctx` selects the
/// element when `slot`'s storage is `Object` (an already-materialized field
/// buffer); ignored for flat scalar/vector banks, which only ever hold one
/// signal's worth of lanes.
fn read_external(
    program: &crate::ir::CompiledProgram,
    banks: &ValueBanks,
    slot: ValueSlot,
    ctx: Option<ElementContext>,
) -> Vec<f64> {
    let meta = program.slot_meta(slot);
    match meta.storage {
        Storage::Object => {
            let stride = stride_of(&meta.ty);
            let index = ctx.map_or(0, |c| c.index) as usize;
            match banks.objects.get(&slot.0) {
                Some(ObjectValue::Field(buf)) => (0..stride)
                    .map(|lane| f64::from(buf.get(index * stride + lane).copied().unwrap_or(0.0)))
                    .collect(),
                _ => vec![0.0; stride],
            }
        }
        Storage::F64 => {
            let stride = stride_of(&meta.ty);
            let offset = meta.offset as usize;
            (0..stride)
                .map(|l| banks.f64.get(offset + l).copied().unwrap_or(0.0))
                .collect()
        }
        Storage::F32 => {
            let stride = stride_of(&meta.ty);
            let offset = meta.offset as usize;
            (0..stride)
                .map(|l| f64::from(banks.f32.get(offset + l).copied().unwrap_or(0.0)))
                .collect()
        }
        Storage::I32 => vec![f64::from(banks.i32.get(meta.offset as usize).copied().unwrap_or(0))],
        Storage::U32 => vec![f64::from(banks.u32.get(meta.offset as usize).copied().unwrap_or(0))],
    }
}

fn time_lane(time: &TimeState, rail: TimeRail) -> Vec<f64> {
    match rail {
        TimeRail::Dt => vec![time.dt],
        TimeRail::PhaseA => vec![time.phase_a],
        TimeRail::PhaseB => vec![time.phase_b],
        TimeRail::WrapEvent => vec![if time.wrap_event { 1.0 } else { 0.0 }],
        TimeRail::Progress01 => vec![time.progress01],
    }
}

fn ctx_for_operand(
    program: &crate::ir::CompiledProgram,
    operand: crate::ident::ValueExprId,
    outer: Option<ElementContext>,
) -> Option<ElementContext> {
    if program.expr(operand).ty.is_field() {
        outer
    } else {
        None
    }
}

/// Evaluates `expr_id` to its lane values at `ctx` (or as a pure signal when
/// `ctx` is `None`). The only recursive, runtime-facing evaluator in the
/// crate \u{2014} every `DerivedKind` is handled here, matching \u{00a7}4.9's
/// "unified \u{2014} no separate evalSig/evalField/evalEvent".
#[must_use]
pub fn eval_expr(
    program: &crate::ir::CompiledProgram,
    banks: &ValueBanks,
    state: &[f64],
    time: &TimeState,
    registry: &InstanceRegistry,
    expr_id: crate::ident::ValueExprId,
    ctx: Option<ElementContext>,
) -> Vec<f64> {
    let expr = program.expr(expr_id);
    match &expr.kind {
        ValueExprKind::Const { const_index } => program
            .constants
            .get(*const_index as usize)
            .map(const_lanes)
            .unwrap_or_default(),
        ValueExprKind::External { slot } => read_external(program, banks, *slot, ctx),
        ValueExprKind::Intrinsic(intrinsic) => eval_intrinsic(*intrinsic, ctx),
        ValueExprKind::Kernel(call) => eval_kernel(program, banks, state, time, registry, call, ctx),
        ValueExprKind::State { resolved_slot, .. } => match resolved_slot {
            Some(slot) => {
                let meta = program.state_slot_meta(*slot);
                let offset = meta.offset as usize;
                let stride = meta.stride as usize;
                (0..stride)
                    .map(|l| state.get(offset + l).copied().unwrap_or(0.0))
                    .collect()
            }
            None => vec![0.0],
        },
        ValueExprKind::Time(rail) => time_lane(time, *rail),
    }
}

fn eval_kernel(
    program: &crate::ir::CompiledProgram,
    banks: &ValueBanks,
    state: &[f64],
    time: &TimeState,
    registry: &InstanceRegistry,
    call: &crate::ir::KernelCall,
    ctx: Option<ElementContext>,
) -> Vec<f64> {
    match call.shape {
        KernelShape::Map | KernelShape::Zip | KernelShape::Broadcast => {
            let operand_lanes: Vec<Vec<f64>> = call
                .operands
                .iter()
                .map(|&op| {
                    let op_ctx = ctx_for_operand(program, op, ctx);
                    eval_expr(program, banks, state, time, registry, op, op_ctx)
                })
                .collect();
            apply_kernel_fn(call.function, &operand_lanes)
        }
        KernelShape::Reduce => {
            let Some(&operand) = call.operands.first() else {
                return vec![0.0];
            };
            let operand_ty = program.expr(operand).ty;
            let count = operand_ty.instance().map_or(0, |i| registry.count_of(i));
            let instance = operand_ty.instance().unwrap_or(crate::ident::InstanceId([0; 32]));
            let mut acc: Option<Vec<f64>> = None;
            for index in 0..count {
                let elem_ctx = Some(ElementContext { index, count, instance });
                let lanes = eval_expr(program, banks, state, time, registry, operand, elem_ctx);
                acc = Some(match acc {
                    None => lanes,
                    Some(prev) => apply_kernel_fn(call.function, &[prev, lanes]),
                });
            }
            acc.unwrap_or_else(|| vec![0.0])
        }
    }
}

/// Writes `expr_id`'s signal-level value straight into `target_slot`
/// (\u{00a7}4.9 `evalValue`).
pub fn eval_value_into_slot(
    program: &crate::ir::CompiledProgram,
    banks: &mut ValueBanks,
    state: &[f64],
    time: &TimeState,
    registry: &InstanceRegistry,
    expr_id: crate::ident::ValueExprId,
    target_slot: ValueSlot,
) {
    let lanes = eval_expr(program, banks, state, time, registry, expr_id, None);
    let meta = program.slot_meta(target_slot);
    let storage = meta.storage;
    let offset = meta.offset;
    banks.write_lanes(storage, offset, &lanes);
}

/// Evaluates `field_expr` over `instance`'s live element count and writes
/// the flattened SoA buffer into the `objects` bank at `target_slot`
/// (\u{00a7}4.9 `materialize`).
pub fn materialize_into_slot(
    program: &crate::ir::CompiledProgram,
    banks: &mut ValueBanks,
    state: &[f64],
    time: &TimeState,
    registry: &InstanceRegistry,
    field_expr: crate::ident::ValueExprId,
    instance: crate::ident::InstanceId,
    target_slot: ValueSlot,
) {
    let count = registry.count_of(instance);
    let stride = stride_of(&program.expr(field_expr).ty);
    let mut buf = Vec::with_capacity(count as usize * stride);
    for index in 0..count {
        let ctx = Some(ElementContext { index, count, instance });
        let lanes = eval_expr(program, banks, state, time, registry, field_expr, ctx);
        for lane in 0..stride {
            #[allow(clippy::cast_possible_truncation)]
            buf.push(lanes.get(lane).copied().unwrap_or(0.0) as f32);
        }
    }
    banks.objects.insert(target_slot.0, ObjectValue::Field(buf));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsl_to_rgb_of_pure_red_matches_expected() {
        let rgb = hsl_to_rgb(&[0.0, 1.0, 0.5]);
        assert!((rgb[0] - 1.0).abs() < 1e-9);
        assert!(rgb[1].abs() < 1e-9);
        assert!(rgb[2].abs() < 1e-9);
    }

    #[test]
    fn random_id_is_stable_and_in_unit_range() {
        let inst = crate::ident::InstanceId(crate::ident::anchor_id("instance", b"", "p"));
        let a = random_id(inst, 3);
        let b = random_id(inst, 3);
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
    }

    #[test]
    fn norm_index_is_zero_for_a_single_element_domain() {
        let inst = crate::ident::InstanceId(crate::ident::anchor_id("instance", b"", "p"));
        let ctx = Some(ElementContext { index: 0, count: 1, instance: inst });
        assert_eq!(eval_intrinsic(Intrinsic::NormIndex, ctx), vec![0.0]);
    }

    #[test]
    fn pad_vec2_to_3_appends_a_zero_z_lane_not_a_repeat_of_x() {
        let out = apply_kernel_fn(KernelFn::PadVec2To3, &[vec![1.0, 2.0]]);
        assert_eq!(out, vec![1.0, 2.0, 0.0]);
    }

    #[test]
    fn truncate_vec3_to_2_drops_z_rather_than_folding_it_into_y() {
        let out = apply_kernel_fn(KernelFn::TruncateVec3To2, &[vec![1.0, 2.0, 3.0]]);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn write_lanes_rounds_into_an_i32_slot_instead_of_truncating() {
        let mut banks = ValueBanks::new();
        banks.reserve(0, 0, 1, 0);
        banks.write_lanes(Storage::I32, 0, &[2.9]);
        assert_eq!(banks.i32[0], 3);

        banks.write_lanes(Storage::I32, 0, &[2.4]);
        assert_eq!(banks.i32[0], 2);

        banks.write_lanes(Storage::I32, 0, &[-2.5]);
        assert_eq!(banks.i32[0], -3);
    }

    #[test]
    fn slew_blends_by_a_dt_over_tau_exponential_factor() {
        let out = apply_kernel_fn(KernelFn::Slew, &[vec![0.0], vec![10.0], vec![120.0], vec![120.0]]);
        let alpha = 1.0 - libm::exp(-1.0);
        assert!((out[0] - 10.0 * alpha).abs() < 1e-9);
    }

    #[test]
    fn slew_is_frame_rate_independent_for_the_same_elapsed_time() {
        let one_big_step = apply_kernel_fn(KernelFn::Slew, &[vec![0.0], vec![10.0], vec![100.0], vec![200.0]]);
        let half_a = apply_kernel_fn(KernelFn::Slew, &[vec![0.0], vec![10.0], vec![50.0], vec![200.0]]);
        let half_b = apply_kernel_fn(KernelFn::Slew, &[half_a, vec![10.0], vec![50.0], vec![200.0]]);
        assert!((one_big_step[0] - half_b[0]).abs() < 1e-9);
    }

    #[test]
    fn lag_exponential_picks_rise_tau_when_rising_and_fall_tau_when_falling() {
        // rising: prev 0 -> target 10, should move by the rise-tau alpha
        let rising = apply_kernel_fn(
            KernelFn::LagExponential,
            &[vec![0.0], vec![10.0], vec![100.0], vec![50.0], vec![500.0]],
        );
        let rise_alpha = 1.0 - libm::exp(-100.0 / 50.0);
        assert!((rising[0] - 10.0 * rise_alpha).abs() < 1e-9);

        // falling: prev 10 -> target 0, should move by the fall-tau alpha instead
        let falling = apply_kernel_fn(
            KernelFn::LagExponential,
            &[vec![10.0], vec![0.0], vec![100.0], vec![50.0], vec![500.0]],
        );
        let fall_alpha = 1.0 - libm::exp(-100.0 / 500.0);
        assert!((falling[0] - (10.0 - 10.0 * fall_alpha)).abs() < 1e-9);
    }

    #[test]
    fn lag_linear_clamps_the_step_to_the_selected_rate() {
        // rise_rate=1/s over dt=100ms allows a max step of 0.1, target is far away
        let out = apply_kernel_fn(
            KernelFn::LagLinear,
            &[vec![0.0], vec![10.0], vec![100.0], vec![1.0], vec![1.0]],
        );
        assert!((out[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn lag_linear_reaches_the_target_exactly_once_within_the_max_step() {
        let out = apply_kernel_fn(
            KernelFn::LagLinear,
            &[vec![9.95], vec![10.0], vec![100.0], vec![1.0], vec![1.0]],
        );
        assert!((out[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sample_and_hold_latches_only_on_the_rising_edge_and_ignores_a_sustained_high_trigger() {
        // frame 1: trigger rises 0 -> 1, latches value 5
        let frame1 = apply_kernel_fn(KernelFn::SampleAndHold, &[vec![0.0], vec![5.0], vec![1.0], vec![0.0]]);
        assert_eq!(frame1, vec![5.0]);

        // frame 2: trigger stays high, value changed to 9 -- must NOT re-latch
        let frame2 = apply_kernel_fn(KernelFn::SampleAndHold, &[frame1.clone(), vec![9.0], vec![1.0], vec![1.0]]);
        assert_eq!(frame2, vec![5.0]);

        // frame 3: trigger falls low, held value still unchanged
        let frame3 = apply_kernel_fn(KernelFn::SampleAndHold, &[frame2.clone(), vec![9.0], vec![0.0], vec![1.0]]);
        assert_eq!(frame3, vec![5.0]);

        // frame 4: trigger rises again, now it latches the new value
        let frame4 = apply_kernel_fn(KernelFn::SampleAndHold, &[frame3, vec![9.0], vec![1.0], vec![0.0]]);
        assert_eq!(frame4, vec![9.0]);
    }
}
