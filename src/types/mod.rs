// SPDX-License-Identifier: Apache-2.0
//! The five-axis canonical type system (\u{00a7}3.1).
//!
//! Every typed value in a Patch carries a [`CanonicalType`]: a [`Payload`]
//! plus an [`Extent`] over five independent axes. Each axis value is either
//! concrete ([`Axis::Inst`]) or a unification variable ([`Axis::Var`]); the
//! [`unify`](unify::Unifier) module resolves variables to fixpoint. Any axis
//! still a `Var` when the backend lowers the program is a hard compiler bug,
//! not a user-facing error — it means a pass ran lowering before the solver
//! validated (\u{00a7}4.3 step 4, invariant 4 in \u{00a7}8).

pub mod unify;

use crate::ident::{InstanceId, TypeVarId};

/// The structural payload of a typed value. Has a fixed stride once resolved.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Color,
    Shape,
    CameraProjection,
}

impl Payload {
    /// Number of `f32` lanes this payload occupies when stored SoA (\u{00a7}4.11.4).
    /// `Shape` and `CameraProjection` are object-bank payloads and have no
    /// fixed float stride; callers must not call this for those variants.
    #[must_use]
    pub const fn float_stride(self) -> Option<u8> {
        match self {
            Self::Float | Self::Int | Self::Bool => Some(1),
            Self::Vec2 => Some(2),
            Self::Vec3 => Some(3),
            Self::Color => Some(4),
            Self::Shape | Self::CameraProjection => None,
        }
    }
}

/// Compile-time constant vs. per-frame signal lane vs. per-element field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cardinality {
    Zero,
    One,
    Many(InstanceId),
}

/// Never-changing vs. per-frame vs. event-instant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Temporality {
    Static,
    Continuous,
    Discrete,
}

/// Whether per-element lanes are independent of one another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Binding {
    LaneLocal,
    LaneShared,
}

/// Reserved axis; only `Default` is legal in this version (\u{00a7}3.1, Non-goals \u{00a7}1).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Perspective {
    Default,
}

/// Reserved axis; only `Default` is legal in this version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Branch {
    Default,
}

/// An axis value that is either concrete or a unification variable awaiting
/// resolution. `T` is one of the five axis value types above.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis<T> {
    Inst(T),
    Var(TypeVarId),
}

impl<T: Copy> Axis<T> {
    /// Returns the concrete value, or `None` if still unresolved.
    #[must_use]
    pub const fn inst(self) -> Option<T>
    where
        T: Copy,
    {
        match self {
            Self::Inst(v) => Some(v),
            Self::Var(_) => None,
        }
    }

    #[must_use]
    pub const fn is_var(self) -> bool {
        matches!(self, Self::Var(_))
    }
}

/// The five-axis extent of a [`CanonicalType`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent {
    pub cardinality: Axis<Cardinality>,
    pub temporality: Axis<Temporality>,
    pub binding: Axis<Binding>,
    pub perspective: Axis<Perspective>,
    pub branch: Axis<Branch>,
}

impl Extent {
    /// The extent of a fully-concrete laneLocal, default-perspective,
    /// default-branch signal (one / continuous).
    #[must_use]
    pub const fn signal() -> Self {
        Self {
            cardinality: Axis::Inst(Cardinality::One),
            temporality: Axis::Inst(Temporality::Continuous),
            binding: Axis::Inst(Binding::LaneLocal),
            perspective: Axis::Inst(Perspective::Default),
            branch: Axis::Inst(Branch::Default),
        }
    }

    #[must_use]
    pub const fn field(instance: InstanceId) -> Self {
        Self {
            cardinality: Axis::Inst(Cardinality::Many(instance)),
            temporality: Axis::Inst(Temporality::Continuous),
            binding: Axis::Inst(Binding::LaneLocal),
            perspective: Axis::Inst(Perspective::Default),
            branch: Axis::Inst(Branch::Default),
        }
    }

    #[must_use]
    pub const fn constant() -> Self {
        Self {
            cardinality: Axis::Inst(Cardinality::Zero),
            temporality: Axis::Inst(Temporality::Static),
            binding: Axis::Inst(Binding::LaneLocal),
            perspective: Axis::Inst(Perspective::Default),
            branch: Axis::Inst(Branch::Default),
        }
    }

    #[must_use]
    pub const fn event() -> Self {
        Self {
            cardinality: Axis::Inst(Cardinality::One),
            temporality: Axis::Inst(Temporality::Discrete),
            binding: Axis::Inst(Binding::LaneLocal),
            perspective: Axis::Inst(Perspective::Default),
            branch: Axis::Inst(Branch::Default),
        }
    }

    /// `true` if every axis is resolved to a concrete value.
    #[must_use]
    pub const fn is_fully_concrete(&self) -> bool {
        !self.cardinality.is_var()
            && !self.temporality.is_var()
            && !self.binding.is_var()
            && !self.perspective.is_var()
            && !self.branch.is_var()
    }
}

/// A fully-typed value: payload plus extent. Every port, `ValueExpr`, and
/// schedule step's slot carries exactly one of these (\u{00a7}3.1 invariant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanonicalType {
    pub payload: Axis<Payload>,
    pub extent: Extent,
}

impl CanonicalType {
    #[must_use]
    pub const fn concrete(payload: Payload, extent: Extent) -> Self {
        Self {
            payload: Axis::Inst(payload),
            extent,
        }
    }

    /// *Signal* = `cardinality:one \u{2227} temporality:continuous`.
    #[must_use]
    pub fn is_signal(&self) -> bool {
        matches!(self.extent.cardinality, Axis::Inst(Cardinality::One))
            && matches!(self.extent.temporality, Axis::Inst(Temporality::Continuous))
    }

    /// *Field* = `cardinality:many(_) \u{2227} temporality:continuous`.
    #[must_use]
    pub fn is_field(&self) -> bool {
        matches!(self.extent.cardinality, Axis::Inst(Cardinality::Many(_)))
            && matches!(self.extent.temporality, Axis::Inst(Temporality::Continuous))
    }

    /// *Event* = `temporality:discrete`.
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self.extent.temporality, Axis::Inst(Temporality::Discrete))
    }

    /// *Const* = `cardinality:zero`.
    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(self.extent.cardinality, Axis::Inst(Cardinality::Zero))
    }

    /// `true` if the payload axis and every extent axis are concrete.
    #[must_use]
    pub const fn is_fully_concrete(&self) -> bool {
        !self.payload.is_var() && self.extent.is_fully_concrete()
    }

    /// The instance this type's field is materialized over, if it is a field.
    #[must_use]
    pub fn instance(&self) -> Option<InstanceId> {
        match self.extent.cardinality {
            Axis::Inst(Cardinality::Many(i)) => Some(i),
            _ => None,
        }
    }
}
