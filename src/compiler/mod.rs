// SPDX-License-Identifier: Apache-2.0
//! The compiler pipeline (§4): turns an authored [`crate::patch::Patch`] into
//! a [`crate::ir::CompiledProgram`] the runtime can execute without ever
//! consulting the patch again.
//!
//! [`compile`] chains every pass in the fixed order §4's overview lays out;
//! each pass is a free function in its own module, kept separate so a
//! targeted unit test can exercise one pass without running the whole
//! pipeline. Passes never call each other directly — only this module
//! sequences them — so the order itself stays a single, auditable spot.

pub mod adapter;
pub mod bind;
pub mod constraint_solve;
pub mod default_source;
pub mod dependency_graph;
pub mod lower;
pub mod schedule;
pub mod time_resolve;

use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticScope, Domain, PrimaryTarget, Severity};
use crate::ir::{CompiledProgram, ProgramOutput, Step};
use crate::patch::normalize::NormalizeError;
use crate::patch::Patch;
use thiserror::Error;

/// The engine's current compiled-IR format version (§3.3: `irVersion: 1`).
/// A host persisting canonical tables across sessions must treat a bump here
/// as a migration boundary.
pub const IR_VERSION: u32 = 1;

/// Reserved compile-time knobs (§SPEC_FULL "Configuration"). Every field is
/// currently advisory only — defaults are the only implemented behavior —
/// kept as a stable struct so a future adapter-table override or solver
/// iteration cap doesn't need to change `compile`'s signature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Reserved: a future solver may iterate to a fixpoint rather than the
    /// current single pass; this caps that loop once it exists.
    pub max_solver_iterations: Option<u32>,
    /// Reserved: a future release may let a host graft extra rules onto
    /// [`adapter::rule_table`] ahead of the built-in set, selected by count
    /// here until the override table itself is implemented.
    pub extra_adapter_rule_budget: Option<u32>,
}

/// Every fault any pass in the pipeline can raise, collected under one type
/// so a host can match on `compile`'s error without reaching into each
/// pass's module.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("one or more type constraints could not be resolved")]
    TypeSolve(Vec<constraint_solve::TypeSolveError>),
    #[error("one or more edges have no adapter bridging their types")]
    Adapter(Vec<adapter::AdapterError>),
    #[error(transparent)]
    TimeResolve(#[from] time_resolve::TimeResolveError),
    #[error(transparent)]
    Cycle(#[from] dependency_graph::CycleError),
    #[error(transparent)]
    Lower(#[from] lower::LowerError),
    #[error(transparent)]
    Bind(#[from] bind::BindError),
}

impl From<Vec<constraint_solve::TypeSolveError>> for CompileError {
    fn from(errs: Vec<constraint_solve::TypeSolveError>) -> Self {
        Self::TypeSolve(errs)
    }
}

impl From<Vec<adapter::AdapterError>> for CompileError {
    fn from(errs: Vec<adapter::AdapterError>) -> Self {
        Self::Adapter(errs)
    }
}

impl CompileError {
    /// Renders this error as the one or more [`Diagnostic`]s a host's
    /// problem panel would show (§4.13, §7's error taxonomy), scoped to the
    /// compile attempt that produced it.
    #[must_use]
    pub fn to_diagnostics(&self, scope: DiagnosticScope) -> Vec<Diagnostic> {
        let fatal = |code: DiagnosticCode, target: PrimaryTarget, title: &str, message: String| {
            Diagnostic::new(code, Severity::Fatal, Domain::Compile, target, scope, title, message)
        };
        match self {
            Self::Normalize(e) => vec![fatal(
                DiagnosticCode::DanglingEdge,
                PrimaryTarget::Patch,
                "Patch failed normalization",
                e.to_string(),
            )],
            Self::TypeSolve(errs) => errs
                .iter()
                .map(|e| {
                    fatal(
                        DiagnosticCode::UnresolvedType,
                        PrimaryTarget::Patch,
                        "Unresolved type constraint",
                        e.to_string(),
                    )
                })
                .collect(),
            Self::Adapter(errs) => errs
                .iter()
                .map(|e| {
                    fatal(
                        DiagnosticCode::Unbridgeable,
                        PrimaryTarget::Block(e.from_block),
                        "No adapter bridges this connection",
                        e.to_string(),
                    )
                })
                .collect(),
            Self::TimeResolve(e) => {
                let code = match e {
                    time_resolve::TimeResolveError::NoTimeRoot => DiagnosticCode::NoTimeRoot,
                    time_resolve::TimeResolveError::MultipleTimeRoots(_) => DiagnosticCode::MultipleTimeRoots,
                    time_resolve::TimeResolveError::AlgebraicLoop(_) => DiagnosticCode::TimeAlgebraicLoop,
                };
                vec![fatal(code, PrimaryTarget::Patch, "Time resolution failed", e.to_string())]
            }
            Self::Cycle(dependency_graph::CycleError::CycleIllegal { blocks }) => vec![fatal(
                DiagnosticCode::CycleIllegal,
                blocks.first().map_or(PrimaryTarget::Patch, |b| PrimaryTarget::Block(*b)),
                "Illegal cycle with no memory-boundary primitive",
                self.to_string(),
            )],
            Self::Lower(e) => {
                let code = match e {
                    lower::LowerError::PayloadNotSupportedByDefaultSource => {
                        DiagnosticCode::PayloadNotSupportedByDefaultSource
                    }
                    lower::LowerError::Internal(_) | lower::LowerError::UnknownBlockKind(_) => {
                        DiagnosticCode::UnknownBlockType
                    }
                };
                vec![fatal(code, PrimaryTarget::Patch, "Lowering failed", e.to_string())]
            }
            Self::Bind(e) => vec![fatal(DiagnosticCode::UnknownBlockType, PrimaryTarget::Patch, "Binding failed", e.to_string())],
        }
    }
}

/// Builds the `outputs` descriptor table (§3.3: "minimally one
/// `{ kind: 'renderFrame', slot }`"): one [`ProgramOutput::RenderFrame`] per
/// `Render` step, keyed off that step's position slot since a render op has
/// no single dedicated output slot of its own — the frame is assembled by
/// the runtime from each `Render` step's resolved slots, not read back out
/// of the value banks.
fn collect_outputs(schedule: &[Step]) -> Vec<ProgramOutput> {
    schedule
        .iter()
        .filter_map(|step| match step {
            Step::Render { position_slot, .. } => Some(ProgramOutput::RenderFrame { slot: *position_slot }),
            _ => None,
        })
        .collect()
}

/// Runs every compiler pass in order and returns the fully bound, scheduled
/// [`CompiledProgram`] the runtime can execute.
///
/// # Errors
/// The first [`CompileError`] any pass raises, in pipeline order: normalize,
/// type solve, adapter insertion, time resolution, cycle legality, lowering,
/// binding. Scheduling itself cannot fail.
pub fn compile(patch: &Patch, _options: &CompileOptions) -> Result<CompiledProgram, CompileError> {
    let normalized = crate::patch::normalize::normalize(patch)?;
    let with_defaults = default_source::insert_default_sources(&normalized);
    let types = constraint_solve::solve(&with_defaults)?;
    let (adapted, types) = adapter::insert_adapters(&with_defaults, &types)?;
    let time = time_resolve::resolve(&adapted)?;
    dependency_graph::analyze(&adapted)?;
    let lowered = lower::lower(&adapted, &types, &time)?;
    let bound = bind::bind(&adapted, &lowered)?;
    let time_model = time.model;
    let debug_index = bound.debug_index.clone();
    let slot_meta = bound.slot_meta.clone();
    let state_meta = bound.state_meta.clone();
    let exprs = bound.exprs.clone();
    let schedule = schedule::schedule(bound);
    let outputs = collect_outputs(&schedule);

    Ok(CompiledProgram {
        ir_version: IR_VERSION,
        exprs,
        constants: lowered.constants,
        schedule,
        slot_meta,
        state_meta,
        time_model,
        outputs,
        debug_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Block, CombineMode, Edge, ParamValue, Port};
    use crate::types::{CanonicalType, Extent, Payload};

    fn time_root() -> Block {
        let mut params = rustc_hash::FxHashMap::default();
        params.insert("mode".to_string(), ParamValue::Text("infinite".to_string()));
        Block {
            id: crate::ident::BlockId(crate::ident::anchor_id("block", b"", "time_root")),
            kind: time_resolve::TIME_ROOT_KIND.to_string(),
            params,
            input_ports: vec![],
            output_ports: vec![Port {
                id: "dt".to_string(),
                declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
            }],
            display_name: None,
        }
    }

    #[test]
    fn a_patch_with_only_a_time_root_compiles_to_an_empty_schedule() {
        let patch = Patch {
            blocks: vec![time_root()],
            edges: vec![],
        };
        let program = compile(&patch, &CompileOptions::default()).unwrap();
        assert_eq!(program.ir_version, IR_VERSION);
        assert!(program.outputs.is_empty());
    }

    #[test]
    fn a_patch_with_no_time_root_fails_to_compile() {
        let patch = Patch {
            blocks: vec![],
            edges: vec![],
        };
        let err = compile(&patch, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TimeResolve(time_resolve::TimeResolveError::NoTimeRoot)));
        let diags = err.to_diagnostics(DiagnosticScope::default());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, DiagnosticCode::NoTimeRoot);
    }

    #[test]
    fn an_unbridgeable_edge_fails_to_compile_with_an_adapter_error() {
        let mut patch = Patch {
            blocks: vec![time_root()],
            edges: vec![],
        };
        let src = Block {
            id: crate::ident::BlockId(crate::ident::anchor_id("block", b"", "src")),
            kind: "test".into(),
            params: Default::default(),
            input_ports: vec![],
            output_ports: vec![Port {
                id: "out".into(),
                declared_type: CanonicalType::concrete(Payload::Shape, Extent::signal()),
            }],
            display_name: None,
        };
        let dst = Block {
            id: crate::ident::BlockId(crate::ident::anchor_id("block", b"", "dst")),
            kind: "test".into(),
            params: Default::default(),
            input_ports: vec![Port {
                id: "in".into(),
                declared_type: CanonicalType::concrete(Payload::CameraProjection, Extent::signal()),
            }],
            output_ports: vec![],
            display_name: None,
        };
        patch.edges.push(Edge {
            from_block: src.id,
            from_port: "out".into(),
            to_block: dst.id,
            to_port: "in".into(),
            combine_mode: CombineMode::WriterWins,
            enabled: true,
        });
        patch.blocks.push(src);
        patch.blocks.push(dst);
        let err = compile(&patch, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Adapter(_)));
    }
}
