// SPDX-License-Identifier: Apache-2.0
//! Binding (\u{00a7}4.8): the lowering pass's symbolic [`PortKey`]s and
//! [`StableStateId`]s become physical [`ValueSlot`]s and [`StateSlotId`]s.
//!
//! Two allocations, both deterministic and both sorted so recompiling the
//! same patch always produces the same physical layout (\u{00a7}8 invariant:
//! determinism):
//! 1. Persistent state slots, one per unique [`StableStateId`] in
//!    [`StateDecl`] order, sorted by the id itself.
//! 2. Value slots, one per [`PortKey`] that any step or port-expression
//!    table entry references, sorted by `(blockIndex, portId)`.
//!
//! This is also where every port's computed value gets an explicit write:
//! lowering only emits steps for effects with runtime consequences beyond
//! "this value exists" (state updates, render, continuity); binding adds one
//! [`crate::ir::Step::EvalValue`] or [`crate::ir::Step::Materialize`] per
//! port so every slot is actually populated each frame.

use super::lower::{LoweringOutput, PortKey, ShapeRequestSource, StepRequest};
use crate::ident::{BlockIndex, StateSlotId, ValueSlot};
use crate::ir::{DebugIndex, ShapeSource, SlotMeta, StateSlotMeta, Step, Storage};
use crate::patch::normalize::NormalizedPatch;
use crate::types::{CanonicalType, Payload};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("step referenced port {0:?}.{1} which no block declares")]
    UnknownPort(crate::ident::BlockId, String),
}

/// The output of binding: a fully physical, still-unordered set of steps and
/// slot metadata. [`super::schedule`] gives these their final frame order.
#[derive(Clone, Debug)]
pub struct BoundProgram {
    pub exprs: Vec<crate::ir::ValueExpr>,
    pub steps: Vec<Step>,
    pub slot_meta: Vec<SlotMeta>,
    pub state_meta: Vec<StateSlotMeta>,
    pub debug_index: DebugIndex,
}

fn storage_of(payload: Payload) -> Storage {
    match payload {
        Payload::Float => Storage::F64,
        Payload::Int => Storage::I32,
        Payload::Bool => Storage::U32,
        Payload::Vec2 | Payload::Vec3 | Payload::Color => Storage::F32,
        Payload::Shape | Payload::CameraProjection => Storage::Object,
    }
}

/// A [`ValueSlot`] whose type is a field (\u{00a7}3.1's *Field* classification)
/// is dynamically sized \u{2014} its element count tracks its instance's current
/// count, which is not known until runtime. Such slots live in the `objects`
/// bank (\u{00a7}3.4: "objects: Map<slot, any> (holds field buffers ...)"),
/// addressed directly by slot number rather than a fixed offset into one of
/// the scalar SoA arrays.
fn storage_for_slot(ty: &CanonicalType) -> Storage {
    if ty.is_field() {
        Storage::Object
    } else {
        storage_of(ty.payload.inst().unwrap_or(Payload::Float))
    }
}

fn const_value_stride(v: &crate::ir::ConstValue) -> u8 {
    use crate::ir::ConstValue;
    match v {
        ConstValue::Float(_) | ConstValue::Int(_) | ConstValue::Bool(_) => 1,
        ConstValue::Vec2(_) => 2,
        ConstValue::Vec3(_) => 3,
        ConstValue::Color(_) => 4,
    }
}

fn port_type(patch: &NormalizedPatch, key: &PortKey) -> Option<CanonicalType> {
    let block = patch.blocks.iter().find(|b| b.id == key.0)?;
    block
        .output_port(&key.1)
        .or_else(|| block.input_port(&key.1))
        .map(|p| p.declared_type)
}

fn block_index(patch: &NormalizedPatch, key: &PortKey) -> BlockIndex {
    patch.index_of(key.0).unwrap_or(BlockIndex(u32::MAX))
}

/// Runs the binding pass.
///
/// # Errors
/// [`BindError::UnknownPort`] if a step addresses a port that does not
/// exist on its block — a pipeline invariant violation, since every
/// [`PortKey`] lowering emits corresponds to a real port.
pub fn bind(patch: &NormalizedPatch, lowered: &LoweringOutput) -> Result<BoundProgram, BindError> {
    let mut exprs = lowered.exprs.clone();

    let mut first_decl: std::collections::BTreeMap<_, &crate::ir::ConstValue> =
        std::collections::BTreeMap::new();
    for decl in &lowered.state_decls {
        first_decl.entry(decl.state_key).or_insert(&decl.init);
    }
    let state_keys: Vec<_> = first_decl.keys().copied().collect();
    let state_slot_of: FxHashMap<_, _> = state_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (*k, StateSlotId(i as u32)))
        .collect();

    let mut state_meta = Vec::with_capacity(state_keys.len());
    let mut state_offset = 0u32;
    for key in &state_keys {
        let init = first_decl[key].clone();
        let stride = const_value_stride(&init);
        state_meta.push(StateSlotMeta {
            slot: state_slot_of[key],
            offset: state_offset,
            stride,
            init,
        });
        state_offset += u32::from(stride);
    }

    for expr in &mut exprs {
        if let crate::ir::ValueExprKind::State {
            state_key,
            resolved_slot,
        } = &mut expr.kind
        {
            *resolved_slot = state_slot_of.get(state_key).copied();
        }
    }

    let mut keys: Vec<PortKey> = lowered.port_exprs.keys().cloned().collect();
    for req in &lowered.step_requests {
        collect_port_keys(req, &mut keys);
    }
    keys.sort_by(|a, b| {
        (block_index(patch, a).0, a.1.clone()).cmp(&(block_index(patch, b).0, b.1.clone()))
    });
    keys.dedup();

    let mut slot_of: FxHashMap<PortKey, ValueSlot> = FxHashMap::default();
    let mut slot_meta = Vec::with_capacity(keys.len());
    let mut offset = 0u32;
    for (i, key) in keys.iter().enumerate() {
        let slot = ValueSlot(i as u32);
        let ty = port_type(patch, key)
            .ok_or_else(|| BindError::UnknownPort(key.0, key.1.clone()))?;
        let storage = storage_for_slot(&ty);
        let this_offset = offset;
        slot_meta.push(SlotMeta {
            slot,
            storage,
            offset: this_offset,
            ty,
            debug_name: Some(format!("{}.{}", key.0, key.1)),
        });
        if storage != Storage::Object {
            let payload = ty.payload.inst().unwrap_or(Payload::Float);
            offset += u32::from(payload.float_stride().unwrap_or(1));
        }
        slot_of.insert(key.clone(), slot);
    }

    let mut steps = Vec::with_capacity(lowered.port_exprs.len() + lowered.step_requests.len());
    let mut sorted_port_exprs: Vec<_> = lowered.port_exprs.iter().collect();
    sorted_port_exprs.sort_by(|(a, _), (b, _)| {
        (block_index(patch, a).0, a.1.clone()).cmp(&(block_index(patch, b).0, b.1.clone()))
    });
    for (key, expr_id) in sorted_port_exprs {
        let ty = port_type(patch, key).ok_or_else(|| BindError::UnknownPort(key.0, key.1.clone()))?;
        let target_slot = *slot_of
            .get(key)
            .ok_or_else(|| BindError::UnknownPort(key.0, key.1.clone()))?;
        if ty.is_field() {
            let instance = ty.instance().unwrap_or(crate::ident::InstanceId([0; 32]));
            steps.push(Step::Materialize {
                field_expr: *expr_id,
                instance,
                target_slot,
            });
        } else {
            steps.push(Step::EvalValue {
                expr: *expr_id,
                target_slot,
            });
        }
    }

    for req in &lowered.step_requests {
        steps.push(bind_step_request(req, &slot_of, &state_slot_of)?);
    }

    let mut debug_index = DebugIndex::default();
    for (key, slot) in &slot_of {
        debug_index.slot_to_block.insert(slot.0, key.0);
        debug_index
            .port_bindings
            .insert((key.0, key.1.clone()), *slot);
    }

    Ok(BoundProgram {
        exprs,
        steps,
        slot_meta,
        state_meta,
        debug_index,
    })
}

fn collect_port_keys(req: &StepRequest, out: &mut Vec<PortKey>) {
    match req {
        StepRequest::EvalValue { target, .. } => out.push(target.clone()),
        StepRequest::Materialize { target, .. } => out.push(target.clone()),
        StepRequest::Render {
            position,
            color,
            size,
            rotation,
            scale2,
            shape,
            ..
        } => {
            out.push(position.clone());
            out.push(color.clone());
            if let Some(k) = size {
                out.push(k.clone());
            }
            if let Some(k) = rotation {
                out.push(k.clone());
            }
            if let Some(k) = scale2 {
                out.push(k.clone());
            }
            if let ShapeRequestSource::PerInstance(k) = shape {
                out.push(k.clone());
            }
        }
        StepRequest::StateWrite { .. } | StepRequest::ContinuityMapBuild { .. } => {}
        StepRequest::ContinuityApply { base, output, .. } => {
            out.push(base.clone());
            out.push(output.clone());
        }
    }
}

fn bind_step_request(
    req: &StepRequest,
    slot_of: &FxHashMap<PortKey, ValueSlot>,
    state_slot_of: &FxHashMap<crate::ident::StableStateId, StateSlotId>,
) -> Result<Step, BindError> {
    let lookup = |k: &PortKey| -> Result<ValueSlot, BindError> {
        slot_of
            .get(k)
            .copied()
            .ok_or_else(|| BindError::UnknownPort(k.0, k.1.clone()))
    };
    Ok(match req {
        StepRequest::EvalValue { expr, target } => Step::EvalValue {
            expr: *expr,
            target_slot: lookup(target)?,
        },
        StepRequest::Materialize {
            field_expr,
            instance,
            target,
        } => Step::Materialize {
            field_expr: *field_expr,
            instance: *instance,
            target_slot: lookup(target)?,
        },
        StepRequest::Render {
            instance,
            position,
            color,
            size,
            rotation,
            scale2,
            shape,
        } => Step::Render {
            instance: *instance,
            position_slot: lookup(position)?,
            color_slot: lookup(color)?,
            size_slot: size.as_ref().map(lookup).transpose()?,
            rotation_slot: rotation.as_ref().map(lookup).transpose()?,
            scale2_slot: scale2.as_ref().map(lookup).transpose()?,
            shape: match shape {
                ShapeRequestSource::Uniform(id) => ShapeSource::Uniform(*id),
                ShapeRequestSource::PerInstance(k) => ShapeSource::PerInstanceSlot(lookup(k)?),
            },
        },
        StepRequest::StateWrite {
            state_key,
            value_expr,
        } => Step::StateWrite {
            state_slot: state_slot_of
                .get(state_key)
                .copied()
                .unwrap_or(StateSlotId(0)),
            value_expr: *value_expr,
        },
        StepRequest::ContinuityMapBuild {
            instance,
            mapping_output,
        } => Step::ContinuityMapBuild {
            instance: *instance,
            mapping_output: *mapping_output,
        },
        StepRequest::ContinuityApply {
            target_key,
            instance,
            policy,
            base,
            output,
        } => Step::ContinuityApply {
            target_key: *target_key,
            instance: *instance,
            policy: *policy,
            base_slot: lookup(base)?,
            output_slot: lookup(output)?,
        },
    })
}
