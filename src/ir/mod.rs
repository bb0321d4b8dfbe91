// SPDX-License-Identifier: Apache-2.0
//! The intermediate representation (\u{00a7}3.3): the output of the compiler
//! pipeline and the only thing the runtime ever executes.
//!
//! A [`CompiledProgram`] is a flat, typed, fully-bound artifact: a
//! [`ValueExpr`] table, a [`Schedule`] of typed steps, a [`SlotMeta`] table
//! with required offsets, and a [`DebugIndex`] mapping steps/slots back to
//! authored block identity. Forbidden here (per \u{00a7}3.3): separate
//! `nodes`/`buses`, typed constant pools beyond `constants`, or redundant
//! instance ids alongside `type`.

use crate::ident::{BlockId, InstanceId, StableStateId, StateSlotId, ValueExprId, ValueSlot};
use crate::patch::ParamValue;
use crate::types::CanonicalType;
use rustc_hash::FxHashMap;

/// Bumped whenever the shape of [`CompiledProgram`] changes in a way that
/// would break a runtime built against an older layout.
pub const IR_VERSION: u32 = 1;

/// A registry key into the fixed table of pure kernel functions (\u{00a7}SPEC_FULL
/// "Kernel purity"): map/zip/reduce/broadcast bodies are named, not closures,
/// so `ValueExpr` stays `Clone`/hashable and the IR stays serializable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelFn {
    Add,
    Sub,
    Mul,
    Div,
    Lerp,
    Clamp01,
    Sin,
    Cos,
    Frac,
    HslToRgb,
    Length,
    Normalize,
    /// `vec2 -> vec3`: appends a `0` z-lane rather than repeating `x` (\u{00a7}4.4
    /// adapter seed set: "vec2\u{2194}vec3 (pad/drop z)").
    PadVec2To3,
    /// `vec3 -> vec2`: drops the z-lane rather than folding it into `y`.
    TruncateVec3To2,
    /// `Slew` (\u{00a7}4.7.1): operands `[prev, target, dt, tau]`, first-order
    /// low-pass `prev + (1 - exp(-dt/tau)) * (target - prev)`.
    Slew,
    /// `Lag` (\u{00a7}4.7.1), exponential mode: operands
    /// `[prev, target, dt, riseTau, fallTau]`, selecting the time constant by
    /// the sign of `target - prev` each lane.
    LagExponential,
    /// `Lag` (\u{00a7}4.7.1), linear mode: operands
    /// `[prev, target, dt, riseRate, fallRate]`, clamping the step to
    /// `rate * dt` per lane.
    LagLinear,
    /// `SampleAndHold` (\u{00a7}4.7.1): operands
    /// `[held, value, trigger, prevTrigger]`, latching `value` only on the
    /// low\u{2192}high transition of `trigger`.
    SampleAndHold,
}

/// The fixed intrinsic value set (\u{00a7}3.3 `Intrinsic`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Intrinsic {
    /// This element's position in its domain.
    Index,
    /// `index / count`, `0` when `count <= 1`.
    NormIndex,
    /// Stable per-element hash-derived float in `[0, 1)`.
    RandomId,
    Uv,
    /// Stable sort-order position when a domain declares an ordering key.
    Rank,
    /// Compile-time or patch-level random seed.
    Seed,
}

/// Combinator shape for a [`ValueExpr::Kernel`] node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelShape {
    /// Elementwise over one field, or a no-op over a signal.
    Map,
    /// Elementwise over two operands of matching cardinality.
    Zip,
    /// Folds a field down to a single scalar.
    Reduce,
    /// Lifts a lower-cardinality operand up to a field's cardinality.
    Broadcast,
}

/// A kernel invocation: a pure function applied to its operands with a
/// fixed combinator shape.
#[derive(Clone, Debug)]
pub struct KernelCall {
    pub shape: KernelShape,
    pub function: KernelFn,
    pub operands: Vec<ValueExprId>,
}

/// A single unified expression in the program's value-expression table.
/// Every variant carries its resolved [`CanonicalType`]; `kind` (the
/// enum discriminant) is what the runtime evaluator dispatches on
/// (\u{00a7}4.9 `evalValue`: "Dispatch at runtime on derived kind").
#[derive(Clone, Debug)]
pub enum ValueExprKind {
    /// A compile-time constant, addressed by index into `constants`.
    Const { const_index: u32 },
    /// A read from a physical value slot bound by an earlier step.
    External { slot: ValueSlot },
    Intrinsic(Intrinsic),
    Kernel(KernelCall),
    /// Stateful read. `state_key` is the symbolic handle; `resolved_slot` is
    /// filled in by the binding pass (\u{00a7}4.8 step 2) and must never be
    /// read before binding completes.
    State {
        state_key: StableStateId,
        resolved_slot: Option<StateSlotId>,
    },
    /// The canonical time rails derived by time resolution (\u{00a7}4.5).
    Time(TimeRail),
}

/// Which canonical time signal a [`ValueExprKind::Time`] expression reads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeRail {
    Dt,
    PhaseA,
    PhaseB,
    WrapEvent,
    Progress01,
}

/// A typed entry in the program's value-expression table.
#[derive(Clone, Debug)]
pub struct ValueExpr {
    pub kind: ValueExprKind,
    pub ty: CanonicalType,
}

/// A compile-time constant value, addressed from `ValueExprKind::Const` by
/// index. Stored as canonical JSON-shaped values so the table round-trips
/// through `constants.json` (\u{00a7}3.3) without a typed-pool dependency.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Color([f64; 4]),
}

impl From<ParamValue> for ConstValue {
    fn from(p: ParamValue) -> Self {
        match p {
            ParamValue::Float(f) => Self::Float(f),
            ParamValue::Int(i) => Self::Int(i),
            ParamValue::Bool(b) => Self::Bool(b),
            ParamValue::Text(_) => Self::Int(0),
        }
    }
}

/// The time model the patch's single `TimeRoot` block declared (\u{00a7}4.5),
/// carried on the compiled program itself so the runtime can re-derive
/// `dt`/`phaseA` every frame without ever consulting the authored patch
/// again (\u{00a7}4.10: "the runtime executes exactly this each frame").
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeModel {
    Infinite { speed: f64 },
    Finite { period_ms: f64 },
    Driven,
}

/// Physical storage bank a [`ValueSlot`] is allocated in (\u{00a7}3.3 `SlotMeta`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Storage {
    F64,
    F32,
    I32,
    U32,
    Object,
}

/// Per-slot metadata. Offsets are computed once by the binding pass and
/// never recomputed at runtime (\u{00a7}3.3: "Offsets are required; runtime
/// never recomputes them").
#[derive(Clone, Debug)]
pub struct SlotMeta {
    pub slot: ValueSlot,
    pub storage: Storage,
    pub offset: u32,
    pub ty: CanonicalType,
    pub debug_name: Option<String>,
}

/// Per-slot metadata for a persistent state slot (\u{00a7}4.8 step 1). Unlike
/// [`SlotMeta`], state slots are always addressed into the single `f64`
/// state array (\u{00a7}3.4: "`state`: `Float64Array`"), so `stride` (not a
/// storage bank) tells the runtime how many contiguous `f64` lanes the
/// slot's stateful primitive owns — `1` for scalar payloads, up to `4` for
/// `color`.
#[derive(Clone, Debug)]
pub struct StateSlotMeta {
    pub slot: StateSlotId,
    pub offset: u32,
    pub stride: u8,
    pub init: ConstValue,
}

/// How a render op's shape is resolved: a single shared topology, or a
/// per-instance packed shape buffer (\u{00a7}4.12).
#[derive(Clone, Copy, Debug)]
pub enum ShapeSource {
    Uniform(u32),
    PerInstanceSlot(ValueSlot),
}

/// A single ordered step in the compiled [`Schedule`] (\u{00a7}4.9).
#[derive(Clone, Debug)]
pub enum Step {
    EvalValue {
        expr: ValueExprId,
        target_slot: ValueSlot,
    },
    Materialize {
        field_expr: ValueExprId,
        instance: InstanceId,
        target_slot: ValueSlot,
    },
    Render {
        instance: InstanceId,
        position_slot: ValueSlot,
        color_slot: ValueSlot,
        size_slot: Option<ValueSlot>,
        rotation_slot: Option<ValueSlot>,
        scale2_slot: Option<ValueSlot>,
        shape: ShapeSource,
    },
    StateWrite {
        state_slot: StateSlotId,
        value_expr: ValueExprId,
    },
    FieldStateWrite {
        base_slot: ValueSlot,
        instance: InstanceId,
        value_expr: ValueExprId,
    },
    ContinuityMapBuild {
        instance: InstanceId,
        mapping_output: crate::ident::StableTargetId,
    },
    ContinuityApply {
        target_key: crate::ident::StableTargetId,
        instance: InstanceId,
        policy: crate::continuity::ContinuityPolicy,
        base_slot: ValueSlot,
        output_slot: ValueSlot,
    },
}

/// Output descriptor: what a [`CompiledProgram`] ultimately produces.
#[derive(Clone, Debug)]
pub enum ProgramOutput {
    RenderFrame { slot: ValueSlot },
}

/// Debug-only index mapping IR artifacts back to the authored patch, used
/// by diagnostics and by continuity rebind-on-hot-swap (\u{00a7}4.11.3).
#[derive(Clone, Debug, Default)]
pub struct DebugIndex {
    pub step_to_block: FxHashMap<usize, BlockId>,
    pub slot_to_block: FxHashMap<u32, BlockId>,
    pub port_bindings: FxHashMap<(BlockId, String), ValueSlot>,
}

/// The final, fully-bound artifact a Patch compiles to. The runtime executes
/// exactly this each frame; it never consults the Patch again.
#[derive(Clone, Debug)]
pub struct CompiledProgram {
    pub ir_version: u32,
    pub exprs: Vec<ValueExpr>,
    pub constants: Vec<ConstValue>,
    pub schedule: Vec<Step>,
    pub slot_meta: Vec<SlotMeta>,
    pub state_meta: Vec<StateSlotMeta>,
    pub time_model: TimeModel,
    pub outputs: Vec<ProgramOutput>,
    pub debug_index: DebugIndex,
}

impl CompiledProgram {
    #[must_use]
    pub fn expr(&self, id: ValueExprId) -> &ValueExpr {
        &self.exprs[id.0 as usize]
    }

    #[must_use]
    pub fn slot_meta(&self, slot: ValueSlot) -> &SlotMeta {
        &self.slot_meta[slot.0 as usize]
    }

    #[must_use]
    pub fn state_slot_meta(&self, slot: StateSlotId) -> &StateSlotMeta {
        &self.state_meta[slot.0 as usize]
    }

    /// \u{00a7}8 invariant 4 ("no var escape"): `true` iff every expression's
    /// type and every slot's type is fully concrete. A compiled program
    /// failing this check indicates a binding-pass bug, not authored-content
    /// error \u{2014} the type solver (\u{00a7}4.3 step 4) should have already
    /// rejected any patch that would produce one.
    #[must_use]
    pub fn has_no_var_escape(&self) -> bool {
        self.exprs.iter().all(|e| e.ty.is_fully_concrete())
            && self.slot_meta.iter().all(|s| s.ty.is_fully_concrete())
    }
}

/// Classification an evaluator dispatches on at runtime, derived purely from
/// a [`ValueExprKind`]'s discriminant (never stored separately, per \u{00a7}4.9:
/// "unified \u{2014} no separate evalSig/evalField/evalEvent").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DerivedKind {
    Const,
    External,
    Intrinsic,
    Kernel,
    State,
    Time,
}

#[must_use]
pub fn derive_kind(expr: &ValueExprKind) -> DerivedKind {
    match expr {
        ValueExprKind::Const { .. } => DerivedKind::Const,
        ValueExprKind::External { .. } => DerivedKind::External,
        ValueExprKind::Intrinsic(_) => DerivedKind::Intrinsic,
        ValueExprKind::Kernel(_) => DerivedKind::Kernel,
        ValueExprKind::State { .. } => DerivedKind::State,
        ValueExprKind::Time(_) => DerivedKind::Time,
    }
}
