// SPDX-License-Identifier: Apache-2.0
//! Lowering (\u{00a7}4.7): a normalized, typed, cycle-legal patch becomes a flat
//! table of [`ValueExpr`]s plus a set of *requests* \u{2014} effects-as-data,
//! not side effects. Every `lower_*` helper below is a pure function from
//! `(&Block, &LowerScope)` to `LowerResult`; nothing here mutates global
//! state directly, matching the declarative match/execute split the rest of
//! the pipeline follows. Binding (`compiler::bind`) is the only pass allowed
//! to turn a [`PortKey`]/[`StableStateId`] into a physical
//! [`crate::ident::ValueSlot`]/[`crate::ident::StateSlotId`].

use super::constraint_solve::TypeSolveResult;
use super::time_resolve::ResolvedTime;
use crate::continuity::ContinuityPolicy;
use crate::ident::{make_state_id, make_target_id, BlockId, StableStateId, StableTargetId, ValueExprId};
use crate::ir::{ConstValue, KernelCall, KernelFn, KernelShape, Storage, TimeRail, ValueExpr, ValueExprKind};
use crate::patch::normalize::NormalizedPatch;
use crate::patch::{Block, CombineMode, ParamValue};
use crate::types::{Axis, Cardinality, CanonicalType, Payload};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Symbolic address for a value a schedule step reads or writes, before the
/// binding pass assigns it a physical [`crate::ident::ValueSlot`].
pub type PortKey = (BlockId, String);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LowerError {
    /// \u{00a7}4.2: `cameraProjection` has no default and requires an explicit source.
    #[error("no default exists for payload cameraProjection; an explicit source is required")]
    PayloadNotSupportedByDefaultSource,
    /// An edge that normalization and the solver should already guarantee
    /// exists was not found when lowering tried to read it. Indicates a
    /// pipeline invariant violation, not a patch-authoring error.
    #[error("internal lowering error: {0}")]
    Internal(String),
    /// A block's `kind` has no lowering rule.
    #[error("no lowering rule for block kind {0:?}")]
    UnknownBlockKind(String),
}

/// A request to write a step into the schedule, expressed against
/// [`PortKey`]s and [`StableStateId`]s rather than physical slots. The
/// binding pass (\u{00a7}4.8) turns each of these into exactly one
/// [`crate::ir::Step`].
#[derive(Clone, Debug)]
pub enum StepRequest {
    EvalValue {
        expr: ValueExprId,
        target: PortKey,
    },
    Materialize {
        field_expr: ValueExprId,
        instance: crate::ident::InstanceId,
        target: PortKey,
    },
    Render {
        instance: crate::ident::InstanceId,
        position: PortKey,
        color: PortKey,
        size: Option<PortKey>,
        rotation: Option<PortKey>,
        scale2: Option<PortKey>,
        shape: ShapeRequestSource,
    },
    StateWrite {
        state_key: StableStateId,
        value_expr: ValueExprId,
    },
    ContinuityMapBuild {
        instance: crate::ident::InstanceId,
        mapping_output: StableTargetId,
    },
    ContinuityApply {
        target_key: StableTargetId,
        instance: crate::ident::InstanceId,
        policy: ContinuityPolicy,
        base: PortKey,
        output: PortKey,
    },
}

/// Pre-bind mirror of [`crate::ir::ShapeSource`].
#[derive(Clone, Debug)]
pub enum ShapeRequestSource {
    Uniform(u32),
    PerInstance(PortKey),
}

/// A persistent state slot a stateful primitive needs allocated, with its
/// initial value and physical storage class (\u{00a7}4.8 step 1).
#[derive(Clone, Debug)]
pub struct StateDecl {
    pub state_key: StableStateId,
    pub storage: Storage,
    pub init: ConstValue,
}

/// The full output of the lowering pass: ready for the binding pass to
/// resolve every [`PortKey`] and [`StableStateId`] to a physical slot.
#[derive(Clone, Debug, Default)]
pub struct LoweringOutput {
    pub exprs: Vec<ValueExpr>,
    pub constants: Vec<ConstValue>,
    pub port_exprs: FxHashMap<PortKey, ValueExprId>,
    pub step_requests: Vec<StepRequest>,
    pub state_decls: Vec<StateDecl>,
}

struct LowerCtx {
    exprs: Vec<ValueExpr>,
    constants: Vec<ConstValue>,
}

impl LowerCtx {
    fn push_expr(&mut self, kind: ValueExprKind, ty: CanonicalType) -> ValueExprId {
        let id = ValueExprId(self.exprs.len() as u32);
        self.exprs.push(ValueExpr { kind, ty });
        id
    }

    fn push_const(&mut self, value: ConstValue, ty: CanonicalType) -> ValueExprId {
        let idx = self.constants.len() as u32;
        self.constants.push(value);
        self.push_expr(ValueExprKind::Const { const_index: idx }, ty)
    }
}

/// Storage class a payload resolves to for state/slot allocation (\u{00a7}4.11.4).
fn storage_of(payload: Payload) -> Storage {
    match payload {
        Payload::Float => Storage::F64,
        Payload::Int => Storage::I32,
        Payload::Bool => Storage::U32,
        Payload::Vec2 | Payload::Vec3 | Payload::Color => Storage::F32,
        Payload::Shape | Payload::CameraProjection => Storage::Object,
    }
}

fn zero_const(payload: Payload) -> ConstValue {
    match payload {
        Payload::Float => ConstValue::Float(0.0),
        Payload::Int => ConstValue::Int(0),
        Payload::Bool => ConstValue::Bool(false),
        Payload::Vec2 => ConstValue::Vec2([0.0, 0.0]),
        Payload::Vec3 => ConstValue::Vec3([0.0, 0.0, 0.0]),
        Payload::Color => ConstValue::Color([0.0, 0.0, 0.0, 1.0]),
        Payload::Shape | Payload::CameraProjection => ConstValue::Int(0),
    }
}

fn payload_of(ty: &CanonicalType) -> Result<Payload, LowerError> {
    match ty.payload {
        Axis::Inst(p) => Ok(p),
        Axis::Var(_) => Err(LowerError::Internal(
            "lowering reached a block with an unresolved payload axis".into(),
        )),
    }
}

/// Looks up the edge(s) feeding `(block, port)` and folds multiple writers
/// per the port's combine mode. \u{00a7}3.1 defines six combine modes;
/// `Max`/`Min`/`Overlay` have no dedicated kernel in this engine's fixed
/// kernel set (\u{00a7}SPEC_FULL "Kernel purity"), so — like `WriterWins` — they
/// fall back to the canonically-first writer (edges are already sorted by
/// `(toBlock, toPort, fromBlock, fromPort)`, so this is deterministic).
fn resolve_input(
    patch: &NormalizedPatch,
    ctx: &mut LowerCtx,
    port_exprs: &FxHashMap<PortKey, ValueExprId>,
    block: BlockId,
    port: &str,
) -> Result<ValueExprId, LowerError> {
    let writers: Vec<&crate::patch::Edge> = patch
        .edges
        .iter()
        .filter(|e| e.enabled && e.to_block == block && e.to_port == port)
        .collect();
    if writers.is_empty() {
        return Err(LowerError::Internal(format!(
            "no writer for {block:?}.{port}: default-source insertion should have guaranteed one"
        )));
    }
    let mut exprs = Vec::with_capacity(writers.len());
    for w in &writers {
        let key = (w.from_block, w.from_port.clone());
        let id = port_exprs.get(&key).copied().ok_or_else(|| {
            LowerError::Internal(format!(
                "{:?}.{} lowered after its consumer {block:?}.{port}",
                w.from_block, w.from_port
            ))
        })?;
        exprs.push(id);
    }
    if exprs.len() == 1 {
        return Ok(exprs[0]);
    }
    let ty = ctx.exprs[exprs[0].0 as usize].ty;
    let mode = writers[0].combine_mode;
    let function = match mode {
        CombineMode::Additive => KernelFn::Add,
        CombineMode::Mul => KernelFn::Mul,
        CombineMode::WriterWins | CombineMode::Max | CombineMode::Min | CombineMode::Overlay => {
            return Ok(exprs[0])
        }
    };
    let mut acc = exprs[0];
    for &next in &exprs[1..] {
        acc = ctx.push_expr(
            ValueExprKind::Kernel(KernelCall {
                shape: KernelShape::Zip,
                function,
                operands: vec![acc, next],
            }),
            ty,
        );
    }
    Ok(acc)
}

/// Lowers every block in a normalized, type-solved, adapter-expanded,
/// time-resolved, cycle-legal patch. Blocks are visited in the patch's
/// existing order (acyclic prefix topological, per [`crate::patch::normalize`]);
/// the only inputs a block may need that are not yet lowered are its own
/// previous-frame state, which [`ValueExprKind::State`] reads without
/// needing this frame's value — exactly the property [`super::dependency_graph`]
/// validated.
///
/// # Errors
/// Any [`LowerError`] raised by an individual block's lowering rule.
pub fn lower(
    patch: &NormalizedPatch,
    types: &TypeSolveResult,
    time: &ResolvedTime,
) -> Result<LoweringOutput, LowerError> {
    let mut ctx = LowerCtx {
        exprs: Vec::new(),
        constants: Vec::new(),
    };
    let mut port_exprs: FxHashMap<PortKey, ValueExprId> = FxHashMap::default();
    let mut step_requests = Vec::new();
    let mut state_decls = Vec::new();

    for block in &patch.blocks {
        lower_block(
            block,
            patch,
            types,
            time,
            &mut ctx,
            &mut port_exprs,
            &mut step_requests,
            &mut state_decls,
        )?;
    }

    Ok(LoweringOutput {
        exprs: ctx.exprs,
        constants: ctx.constants,
        port_exprs,
        step_requests,
        state_decls,
    })
}

#[allow(clippy::too_many_arguments)]
fn lower_block(
    block: &Block,
    patch: &NormalizedPatch,
    types: &TypeSolveResult,
    time: &ResolvedTime,
    ctx: &mut LowerCtx,
    port_exprs: &mut FxHashMap<PortKey, ValueExprId>,
    step_requests: &mut Vec<StepRequest>,
    state_decls: &mut Vec<StateDecl>,
) -> Result<(), LowerError> {
    let out_ty = |port: &str| -> Result<CanonicalType, LowerError> {
        types
            .port_type(block.id, false, port)
            .ok_or_else(|| LowerError::Internal(format!("{:?}.{port} never resolved", block.id)))
    };
    let in_expr = |ctx: &mut LowerCtx, port_exprs: &FxHashMap<PortKey, ValueExprId>, port: &str| {
        resolve_input(patch, ctx, port_exprs, block.id, port)
    };

    match block.kind.as_str() {
        super::time_resolve::TIME_ROOT_KIND => {
            for port in &block.output_ports {
                let rail = match port.id.as_str() {
                    "dt" => TimeRail::Dt,
                    "phaseA" => TimeRail::PhaseA,
                    "phaseB" => TimeRail::PhaseB,
                    "wrapEvent" => TimeRail::WrapEvent,
                    "progress01" => TimeRail::Progress01,
                    other => {
                        return Err(LowerError::Internal(format!(
                            "TimeRoot has no rail named {other:?}"
                        )))
                    }
                };
                let ty = out_ty(&port.id)?;
                let id = ctx.push_expr(ValueExprKind::Time(rail), ty);
                port_exprs.insert((block.id, port.id.clone()), id);
            }
        }

        super::default_source::DEFAULT_SOURCE_KIND => {
            let ty = out_ty("out")?;
            let plan = super::default_source::default_plan(&ty)?;
            let id = lower_default_plan(ctx, plan, ty, time);
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        kind if kind.starts_with("__adapter_") => {
            let from_ty = types
                .port_type(block.id, true, "in")
                .ok_or_else(|| LowerError::Internal(format!("{:?}.in never resolved", block.id)))?;
            let to_ty = out_ty("out")?;
            let input = in_expr(ctx, port_exprs, "in")?;
            let rule_id = kind.trim_start_matches("__adapter_");
            // vec2\u{2194}vec3 change stride, so they get their own explicit
            // pad/truncate kernel rather than the generic zero-add trick below
            // (\u{00a7}4.4 seed set: "vec2\u{2194}vec3 (pad/drop z)") \u{2014} folding them
            // through `zip_lanes`'s shorter-operand-repeats-its-own-lane
            // fallback would produce a mis-sized lane count for the target's
            // allocated stride.
            let id = match rule_id {
                "vec2_to_vec3" => ctx.push_expr(
                    ValueExprKind::Kernel(KernelCall {
                        shape: KernelShape::Map,
                        function: KernelFn::PadVec2To3,
                        operands: vec![input],
                    }),
                    to_ty,
                ),
                "vec3_to_vec2" => ctx.push_expr(
                    ValueExprKind::Kernel(KernelCall {
                        shape: KernelShape::Map,
                        function: KernelFn::TruncateVec3To2,
                        operands: vec![input],
                    }),
                    to_ty,
                ),
                _ => {
                    let payload = payload_of(&to_ty)?;
                    let zero = ctx.push_const(zero_const(payload), to_ty);
                    let shape = if from_ty.extent.cardinality != to_ty.extent.cardinality {
                        KernelShape::Broadcast
                    } else {
                        KernelShape::Map
                    };
                    ctx.push_expr(
                        ValueExprKind::Kernel(KernelCall {
                            shape,
                            function: KernelFn::Add,
                            operands: vec![input, zero],
                        }),
                        to_ty,
                    )
                }
            };
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        "Array" => {
            let ty = out_ty("out")?;
            let intrinsic = match block.params.get("intrinsic") {
                Some(ParamValue::Text(t)) => match t.as_str() {
                    "normIndex" => crate::ir::Intrinsic::NormIndex,
                    "randomId" => crate::ir::Intrinsic::RandomId,
                    "uv" => crate::ir::Intrinsic::Uv,
                    "rank" => crate::ir::Intrinsic::Rank,
                    "seed" => crate::ir::Intrinsic::Seed,
                    _ => crate::ir::Intrinsic::Index,
                },
                _ => crate::ir::Intrinsic::Index,
            };
            let id = ctx.push_expr(ValueExprKind::Intrinsic(intrinsic), ty);
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        "Polygon" => {
            let ty = out_ty("out")?;
            let sides = match block.params.get("sides") {
                Some(ParamValue::Int(i)) => *i,
                Some(ParamValue::Float(f)) => *f as i64,
                _ => 3,
            };
            let id = ctx.push_const(ConstValue::Int(sides), ty);
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        "Const" => {
            let ty = out_ty("out")?;
            let payload = payload_of(&ty)?;
            let value = match (block.params.get("value"), payload) {
                (Some(ParamValue::Float(f)), _) => ConstValue::Float(*f),
                (Some(ParamValue::Int(i)), _) => ConstValue::Int(*i),
                (Some(ParamValue::Bool(b)), _) => ConstValue::Bool(*b),
                _ => zero_const(payload),
            };
            let id = ctx.push_const(value, ty);
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        "UnitDelay" => {
            let ty = out_ty("out")?;
            let state_key = make_state_id(block.id, "unit_delay");
            let input = in_expr(ctx, port_exprs, "in")?;
            let read = ctx.push_expr(
                ValueExprKind::State {
                    state_key,
                    resolved_slot: None,
                },
                ty,
            );
            port_exprs.insert((block.id, "out".to_string()), read);
            state_decls.push(StateDecl {
                state_key,
                storage: storage_of(payload_of(&ty)?),
                init: zero_const(payload_of(&ty)?),
            });
            step_requests.push(StepRequest::StateWrite {
                state_key,
                value_expr: input,
            });
        }

        "Slew" => {
            // \u{00a7}4.7.1: "First-order low-pass over time model time;
            // parameterized by \u{03c4}" \u{2014} the same `1 - exp(-dt/\u{03c4})` formula the
            // continuity system's own slew policy uses, here over `dt` rather
            // than a fixed per-frame blend so the result is frame-rate
            // independent.
            let ty = out_ty("out")?;
            let state_key = make_state_id(block.id, "slew");
            let input = in_expr(ctx, port_exprs, "in")?;
            let tau_ms = param_float(block, "tauMs", 120.0);
            let const_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::constant());
            let tau_expr = ctx.push_const(ConstValue::Float(tau_ms), const_ty);
            let dt_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::signal());
            let dt_expr = ctx.push_expr(ValueExprKind::Time(TimeRail::Dt), dt_ty);
            let state_read = ctx.push_expr(
                ValueExprKind::State {
                    state_key,
                    resolved_slot: None,
                },
                ty,
            );
            let blended = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Zip,
                    function: KernelFn::Slew,
                    operands: vec![state_read, input, dt_expr, tau_expr],
                }),
                ty,
            );
            port_exprs.insert((block.id, "out".to_string()), blended);
            state_decls.push(StateDecl {
                state_key,
                storage: storage_of(payload_of(&ty)?),
                init: zero_const(payload_of(&ty)?),
            });
            step_requests.push(StepRequest::StateWrite {
                state_key,
                value_expr: blended,
            });
        }

        "Lag" => {
            // \u{00a7}4.7.1: "Smooth toward target with separate rise/fall time
            // constants, linear or exponential." `mode` selects the kernel;
            // each lane picks its rise or fall constant by the sign of
            // `target - prev`, so rising and falling transitions can move at
            // different rates (unlike `Slew`'s single \u{03c4}).
            let ty = out_ty("out")?;
            let state_key = make_state_id(block.id, "lag");
            let input = in_expr(ctx, port_exprs, "in")?;
            let linear = matches!(block.params.get("mode"), Some(ParamValue::Text(t)) if t == "linear");
            let const_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::constant());
            let (rise, fall, function) = if linear {
                (
                    param_float(block, "riseRate", 1.0),
                    param_float(block, "fallRate", 1.0),
                    KernelFn::LagLinear,
                )
            } else {
                (
                    param_float(block, "riseTauMs", 150.0),
                    param_float(block, "fallTauMs", 300.0),
                    KernelFn::LagExponential,
                )
            };
            let rise_expr = ctx.push_const(ConstValue::Float(rise), const_ty);
            let fall_expr = ctx.push_const(ConstValue::Float(fall), const_ty);
            let dt_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::signal());
            let dt_expr = ctx.push_expr(ValueExprKind::Time(TimeRail::Dt), dt_ty);
            let state_read = ctx.push_expr(
                ValueExprKind::State {
                    state_key,
                    resolved_slot: None,
                },
                ty,
            );
            let blended = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Zip,
                    function,
                    operands: vec![state_read, input, dt_expr, rise_expr, fall_expr],
                }),
                ty,
            );
            port_exprs.insert((block.id, "out".to_string()), blended);
            state_decls.push(StateDecl {
                state_key,
                storage: storage_of(payload_of(&ty)?),
                init: zero_const(payload_of(&ty)?),
            });
            step_requests.push(StepRequest::StateWrite {
                state_key,
                value_expr: blended,
            });
        }

        "Phasor" | "Accumulator" => {
            let ty = out_ty("out")?;
            let kind_tag = if block.kind == "Phasor" { "phasor" } else { "accumulator" };
            let state_key = make_state_id(block.id, kind_tag);
            let rate_param = if block.kind == "Phasor" { "freq" } else { "rate" };
            let rate = param_float(block, rate_param, 1.0);
            let rate_expr = ctx.push_const(
                ConstValue::Float(rate),
                CanonicalType::concrete(Payload::Float, crate::types::Extent::constant()),
            );
            let dt_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::signal());
            let dt_expr = ctx.push_expr(ValueExprKind::Time(TimeRail::Dt), dt_ty);
            let state_read = ctx.push_expr(
                ValueExprKind::State {
                    state_key,
                    resolved_slot: None,
                },
                ty,
            );
            let step = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Zip,
                    function: KernelFn::Mul,
                    operands: vec![dt_expr, rate_expr],
                }),
                dt_ty,
            );
            let summed = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Zip,
                    function: KernelFn::Add,
                    operands: vec![state_read, step],
                }),
                ty,
            );
            let value = if block.kind == "Phasor" {
                ctx.push_expr(
                    ValueExprKind::Kernel(KernelCall {
                        shape: KernelShape::Map,
                        function: KernelFn::Frac,
                        operands: vec![summed],
                    }),
                    ty,
                )
            } else {
                summed
            };
            port_exprs.insert((block.id, "out".to_string()), value);
            state_decls.push(StateDecl {
                state_key,
                storage: storage_of(payload_of(&ty)?),
                init: zero_const(payload_of(&ty)?),
            });
            step_requests.push(StepRequest::StateWrite {
                state_key,
                value_expr: value,
            });
        }

        "SampleAndHold" => {
            // \u{00a7}4.7.1: "Latches input when trigger transitions high" \u{2014} a
            // single low\u{2192}high edge, not a re-sample on every frame the
            // trigger happens to read high. Tracking the previous frame's
            // trigger value in its own state slot is what makes the edge
            // detectable; the held value's own state read is not enough, since
            // it never observes `trigger` at all.
            let ty = out_ty("out")?;
            let state_key = make_state_id(block.id, "sample_and_hold");
            let trigger_state_key = make_state_id(block.id, "sample_and_hold_trigger");
            let value = in_expr(ctx, port_exprs, "value")?;
            let trigger = in_expr(ctx, port_exprs, "trigger")?;
            let bool_ty = CanonicalType::concrete(Payload::Bool, crate::types::Extent::signal());
            let state_read = ctx.push_expr(
                ValueExprKind::State {
                    state_key,
                    resolved_slot: None,
                },
                ty,
            );
            let prev_trigger_read = ctx.push_expr(
                ValueExprKind::State {
                    state_key: trigger_state_key,
                    resolved_slot: None,
                },
                bool_ty,
            );
            let held = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Zip,
                    function: KernelFn::SampleAndHold,
                    operands: vec![state_read, value, trigger, prev_trigger_read],
                }),
                ty,
            );
            port_exprs.insert((block.id, "out".to_string()), held);
            state_decls.push(StateDecl {
                state_key,
                storage: storage_of(payload_of(&ty)?),
                init: zero_const(payload_of(&ty)?),
            });
            state_decls.push(StateDecl {
                state_key: trigger_state_key,
                storage: storage_of(Payload::Bool),
                init: zero_const(Payload::Bool),
            });
            step_requests.push(StepRequest::StateWrite {
                state_key,
                value_expr: held,
            });
            step_requests.push(StepRequest::StateWrite {
                state_key: trigger_state_key,
                value_expr: trigger,
            });
        }

        "RenderInstances" => {
            lower_render_instances(block, ctx, port_exprs, step_requests, &out_ty)?;
        }

        kernel_kind @ ("Add" | "Sub" | "Mul" | "Div" | "Lerp" | "Clamp01" | "Sin" | "Cos" | "Frac"
        | "HslToRgb" | "Length" | "Normalize") => {
            let ty = out_ty("out")?;
            let function = match kernel_kind {
                "Add" => KernelFn::Add,
                "Sub" => KernelFn::Sub,
                "Mul" => KernelFn::Mul,
                "Div" => KernelFn::Div,
                "Lerp" => KernelFn::Lerp,
                "Clamp01" => KernelFn::Clamp01,
                "Sin" => KernelFn::Sin,
                "Cos" => KernelFn::Cos,
                "Frac" => KernelFn::Frac,
                "HslToRgb" => KernelFn::HslToRgb,
                "Length" => KernelFn::Length,
                _ => KernelFn::Normalize,
            };
            let mut ports: Vec<&crate::patch::Port> = block.input_ports.iter().collect();
            ports.sort_by(|a, b| a.id.cmp(&b.id));
            let mut operands = Vec::with_capacity(ports.len());
            for p in &ports {
                operands.push(in_expr(ctx, port_exprs, &p.id)?);
            }
            let shape = match operands.len() {
                1 => KernelShape::Map,
                _ => KernelShape::Zip,
            };
            let id = ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape,
                    function,
                    operands,
                }),
                ty,
            );
            port_exprs.insert((block.id, "out".to_string()), id);
        }

        other => return Err(LowerError::UnknownBlockKind(other.to_string())),
    }

    Ok(())
}

fn param_float(block: &Block, name: &str, default: f64) -> f64 {
    match block.params.get(name) {
        Some(ParamValue::Float(f)) => *f,
        Some(ParamValue::Int(i)) => *i as f64,
        _ => default,
    }
}

fn lower_default_plan(
    ctx: &mut LowerCtx,
    plan: super::default_source::DefaultPlan,
    ty: CanonicalType,
    time: &ResolvedTime,
) -> ValueExprId {
    use super::default_source::DefaultPlan;
    match plan {
        DefaultPlan::ConstFloat(f) => ctx.push_const(ConstValue::Float(f), ty),
        DefaultPlan::ConstInt(i) => ctx.push_const(ConstValue::Int(i), ty),
        DefaultPlan::ConstBool(b) => ctx.push_const(ConstValue::Bool(b), ty),
        DefaultPlan::ConstVec2(v) => ctx.push_const(ConstValue::Vec2(v), ty),
        DefaultPlan::ConstVec3(v) => ctx.push_const(ConstValue::Vec3(v), ty),
        DefaultPlan::EventNever => ctx.push_const(ConstValue::Bool(false), ty),
        DefaultPlan::PaletteCycle => {
            let _ = time;
            let phase_ty = CanonicalType::concrete(Payload::Float, crate::types::Extent::signal());
            let phase = ctx.push_expr(ValueExprKind::Time(TimeRail::PhaseA), phase_ty);
            ctx.push_expr(
                ValueExprKind::Kernel(KernelCall {
                    shape: KernelShape::Map,
                    function: KernelFn::HslToRgb,
                    operands: vec![phase],
                }),
                ty,
            )
        }
    }
}

fn lower_render_instances(
    block: &Block,
    ctx: &mut LowerCtx,
    port_exprs: &mut FxHashMap<PortKey, ValueExprId>,
    step_requests: &mut Vec<StepRequest>,
    out_ty: &dyn Fn(&str) -> Result<CanonicalType, LowerError>,
) -> Result<(), LowerError> {
    let position_ty = out_ty("position").unwrap_or_else(|_| {
        CanonicalType::concrete(Payload::Vec2, crate::types::Extent::signal())
    });
    let instance = position_ty.instance().ok_or_else(|| {
        LowerError::Internal(format!(
            "RenderInstances block {:?} has no instance-cardinality position input",
            block.id
        ))
    })?;

    let position_key = (block.id, "position".to_string());
    let color_key = (block.id, "color".to_string());
    let size_key = block
        .input_port("size")
        .map(|_| (block.id, "size".to_string()));
    let rotation_key = block
        .input_port("rotation")
        .map(|_| (block.id, "rotation".to_string()));
    let scale2_key = block
        .input_port("scale2")
        .map(|_| (block.id, "scale2".to_string()));

    let position_target = make_target_id("position", block.id, "position", instance.as_bytes());
    let color_target = make_target_id("color", block.id, "color", instance.as_bytes());

    step_requests.push(StepRequest::ContinuityMapBuild {
        instance,
        mapping_output: position_target,
    });
    step_requests.push(StepRequest::ContinuityApply {
        target_key: position_target,
        instance,
        policy: ContinuityPolicy::Preserve,
        base: position_key.clone(),
        output: position_key.clone(),
    });
    step_requests.push(StepRequest::ContinuityApply {
        target_key: color_target,
        instance,
        policy: ContinuityPolicy::Preserve,
        base: color_key.clone(),
        output: color_key.clone(),
    });

    let shape = if let Some(shape_port) = block.input_port("shape") {
        let _ = shape_port;
        ShapeRequestSource::PerInstance((block.id, "shape".to_string()))
    } else {
        ShapeRequestSource::Uniform(0)
    };

    let _ = ctx;
    let _ = port_exprs;
    step_requests.push(StepRequest::Render {
        instance,
        position: position_key,
        color: color_key,
        size: size_key,
        rotation: rotation_key,
        scale2: scale2_key,
        shape,
    });
    Ok(())
}
