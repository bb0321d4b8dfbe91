// SPDX-License-Identifier: Apache-2.0
//! Oscilla core: a deterministic compiler and runtime for live-editable
//! Patch graphs.
//!
//! A host authors a [`patch::Patch`] — blocks and edges over the five-axis
//! canonical [`types::CanonicalType`] system — and hands it to
//! [`compiler::compile`], which produces an [`ir::CompiledProgram`] the
//! [`runtime::RuntimeState`] executes frame by frame. A hot edit recompiles
//! the patch into a fresh program and swaps it in at the next frame boundary
//! without losing per-element visual continuity ([`continuity`]); the
//! [`diagnostics`] hub surfaces both compile-time and runtime faults under
//! one stably-keyed model.
//!
//! Module order below mirrors the pipeline a Patch flows through: identity
//! and typing first, then authoring, then compilation, then the IR it
//! produces, then everything the runtime needs to execute that IR each
//! frame.

pub mod ident;
pub mod types;

pub mod patch;

pub mod compiler;
pub mod ir;

pub mod continuity;
pub mod diagnostics;
pub mod render;
pub mod runtime;

#[cfg(feature = "telemetry")]
pub mod telemetry;
