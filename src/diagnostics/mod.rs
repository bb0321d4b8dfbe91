// SPDX-License-Identifier: Apache-2.0
//! Diagnostics (\u{00a7}4.13): structured, stably-keyed faults surfaced to the
//! host across both compile-time and runtime.
//!
//! A [`Diagnostic`] is addressed by `(code, primary_target, revision)`
//! (\u{00a7}7: "the same underlying fault does not multiply"), so the
//! [`DiagnosticHub`] stores them in a `BTreeMap` keyed exactly that way
//! rather than appending to a growing log. Five event kinds drive every
//! mutation of that map; nothing else writes to it directly \u{2014} not even
//! the compiler or runtime call sites, which only ever feed one of these
//! events in (\u{00a7}4.13's `CompileBegin`/`CompileEnd`/`GraphCommitted`/
//! `RuntimeHealthSnapshot`/`ProgramSwapped`).

use crate::ident::{BlockId, Hash};
use std::collections::BTreeMap;

/// Stable error/warning code (\u{00a7}7's error taxonomy, plus perf codes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticCode {
    DanglingEdge,
    DuplicateBlockId,
    UnknownBlockType,
    TypeMismatch,
    UnresolvedType,
    ConflictingPayloads,
    PayloadNotSupportedByDefaultSource,
    CycleIllegal,
    NoTimeRoot,
    MultipleTimeRoots,
    TimeAlgebraicLoop,
    Unbridgeable,
    NaN,
    Inf,
    FrameBudget,
    DomainMismatch,
    HeavyMaterialization,
}

impl DiagnosticCode {
    /// Whether this code's class of fault halts compilation, as opposed to
    /// a non-fatal runtime-health observation (\u{00a7}7: "Runtime health
    /// (non-fatal)").
    #[must_use]
    pub const fn is_runtime_health(self) -> bool {
        matches!(
            self,
            Self::NaN | Self::Inf | Self::FrameBudget | Self::DomainMismatch | Self::HeavyMaterialization
        )
    }
}

/// How serious a diagnostic is; purely advisory for host UI sorting.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// Which stage of the pipeline a diagnostic concerns, for host-side filtering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Domain {
    Authoring,
    Compile,
    Runtime,
}

/// What a diagnostic's primary target refers to: most commonly a block, but
/// runtime-health diagnostics may instead key off a continuity target or
/// slot with no single owning block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimaryTarget {
    Block(BlockId),
    /// A synthetic target for faults with no single owning block (e.g. "no
    /// TimeRoot exists" has no block to point at).
    Patch,
}

/// The revision scope a diagnostic was produced under: which patch edit,
/// which compile attempt, and which live runtime session, so a hot-swap
/// correctly invalidates the diagnostics from a prior compile (\u{00a7}4.13
/// `ProgramSwapped`: "rebind diagnostics to the new revision").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct DiagnosticScope {
    pub patch_revision: u64,
    pub compile_id: Option<u64>,
    pub runtime_session_id: Option<u64>,
}

/// An action a host may offer the user in response to a diagnostic (\u{00a7}4.13).
#[derive(Clone, Debug, PartialEq)]
pub enum DiagnosticAction {
    GoToTarget(PrimaryTarget),
    InsertBlock { kind: String, anchor: BlockId },
    AddAdapter { from: BlockId, to: BlockId },
    CreateTimeRoot,
    MuteDiagnostic,
}

/// Structured context a diagnostic carries beyond its human-readable message,
/// so a host can render rich UI (e.g. highlight both endpoints of a type
/// mismatch) without parsing `message`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiagnosticPayload {
    pub related_blocks: Vec<BlockId>,
    pub related_ports: Vec<(BlockId, String)>,
    pub numeric: Vec<(String, f64)>,
    pub text: Vec<(String, String)>,
}

/// A single structured diagnostic (\u{00a7}4.13).
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub id: Hash,
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub domain: Domain,
    pub primary_target: PrimaryTarget,
    pub scope: DiagnosticScope,
    pub title: String,
    pub message: String,
    pub payload: DiagnosticPayload,
    pub actions: Vec<DiagnosticAction>,
}

impl Diagnostic {
    /// Builds a diagnostic, deriving its stable id per \u{00a7}4.13:
    /// `stableHash(code, targetStr, revision)`.
    #[must_use]
    pub fn new(
        code: DiagnosticCode,
        severity: Severity,
        domain: Domain,
        primary_target: PrimaryTarget,
        scope: DiagnosticScope,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let target_str = match primary_target {
            PrimaryTarget::Block(b) => format!("{b}"),
            PrimaryTarget::Patch => "patch".to_string(),
        };
        let id = crate::ident::anchor_id(
            "diagnostic",
            format!("{code:?}\0{}", scope.patch_revision).as_bytes(),
            &target_str,
        );
        Self {
            id,
            code,
            severity,
            domain,
            primary_target,
            scope,
            title: title.into(),
            message: message.into(),
            payload: DiagnosticPayload::default(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: DiagnosticPayload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Vec<DiagnosticAction>) -> Self {
        self.actions = actions;
        self
    }

    /// The `(code, primary_target)` key diagnostics are deduplicated by,
    /// independent of revision \u{2014} used when a new compile's fault should
    /// *replace* rather than accumulate alongside the old one at the same site.
    #[must_use]
    fn dedup_key(&self) -> (DiagnosticCode, PrimaryTarget) {
        (self.code, self.primary_target)
    }
}

/// One of the five events that mutate a [`DiagnosticHub`] (\u{00a7}4.13).
#[derive(Debug)]
pub enum DiagnosticEvent {
    CompileBegin { revision: u64 },
    CompileEnd { status: CompileStatus, diagnostics: Vec<Diagnostic> },
    GraphCommitted { reason: String, diagnostics: Vec<Diagnostic> },
    RuntimeHealthSnapshot { frame_id: u64, diagnostics: Vec<Diagnostic> },
    ProgramSwapped { swap_mode: SwapMode, new_revision: u64 },
}

/// Outcome of a `CompileEnd` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    Failure,
}

/// How a hot-swap replaced the running program (\u{00a7}6.1 `loadProgram` strategy).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapMode {
    Fresh,
    PreserveContinuity,
}

/// Rolling TTL window (in frames) a runtime-health diagnostic survives
/// without being refreshed by a new `RuntimeHealthSnapshot` before it expires
/// (\u{00a7}4.13: "expire after a TTL window").
pub const RUNTIME_HEALTH_TTL_FRAMES: u64 = 180;

struct TrackedDiagnostic {
    diagnostic: Diagnostic,
    last_seen_frame: u64,
}

/// Event-driven store of live diagnostics, keyed `(code, primary_target)`
/// (\u{00a7}4.13, \u{00a7}SPEC_FULL "DiagnosticHub internal storage").
#[derive(Default)]
pub struct DiagnosticHub {
    authoring: BTreeMap<(DiagnosticCode, PrimaryTarget), Diagnostic>,
    runtime: BTreeMap<(DiagnosticCode, PrimaryTarget), TrackedDiagnostic>,
    current_revision: u64,
    listeners: Vec<Box<dyn FnMut(&[Diagnostic])>>,
}

impl DiagnosticHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one [`DiagnosticEvent`], mutating the hub's live state.
    pub fn apply(&mut self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::CompileBegin { revision } => {
                #[cfg(feature = "telemetry")]
                crate::telemetry::compile_begin(revision);
                self.current_revision = revision;
            }
            DiagnosticEvent::CompileEnd { status, diagnostics } => {
                #[cfg(feature = "telemetry")]
                crate::telemetry::compile_end(self.current_revision, status, &diagnostics);
                let _ = status;
                // A compile snapshot replaces authoring diagnostics wholesale
                // rather than merging (\u{00a7}4.13: "replaces authoring
                // diagnostics (not merge)").
                self.authoring.clear();
                for d in diagnostics {
                    self.authoring.insert(d.dedup_key(), d);
                }
            }
            DiagnosticEvent::GraphCommitted { diagnostics, .. } => {
                self.authoring.clear();
                for d in diagnostics {
                    self.authoring.insert(d.dedup_key(), d);
                }
            }
            DiagnosticEvent::RuntimeHealthSnapshot { frame_id, diagnostics } => {
                #[cfg(feature = "telemetry")]
                crate::telemetry::runtime_health_snapshot(frame_id, &diagnostics);
                for d in diagnostics {
                    let key = d.dedup_key();
                    self.runtime.insert(
                        key,
                        TrackedDiagnostic {
                            diagnostic: d,
                            last_seen_frame: frame_id,
                        },
                    );
                }
                self.expire_stale(frame_id);
            }
            DiagnosticEvent::ProgramSwapped { swap_mode, new_revision } => {
                #[cfg(feature = "telemetry")]
                crate::telemetry::program_swapped(new_revision, swap_mode);
                let _ = swap_mode;
                self.current_revision = new_revision;
                for d in self.authoring.values_mut() {
                    d.scope.compile_id = Some(new_revision);
                }
                for t in self.runtime.values_mut() {
                    t.diagnostic.scope.runtime_session_id = Some(new_revision);
                }
            }
        }
        self.notify_listeners();
    }

    /// \u{00a7}6.1 `subscribeDiagnostics`: registers a listener called with every
    /// currently-live diagnostic after each event this hub applies. Order of
    /// delivery follows [`Self::live`]'s order; a listener registered mid-run
    /// only sees events from that point on.
    pub fn subscribe(&mut self, listener: impl FnMut(&[Diagnostic]) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify_listeners(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let live: Vec<Diagnostic> = self.live().into_iter().cloned().collect();
        for listener in &mut self.listeners {
            listener(&live);
        }
    }

    fn expire_stale(&mut self, current_frame: u64) {
        self.runtime
            .retain(|_, t| current_frame.saturating_sub(t.last_seen_frame) < RUNTIME_HEALTH_TTL_FRAMES);
    }

    /// All currently live diagnostics, authoring first then runtime, each
    /// group in key order (deterministic for snapshot comparisons in tests).
    #[must_use]
    pub fn live(&self) -> Vec<&Diagnostic> {
        self.authoring
            .values()
            .chain(self.runtime.values().map(|t| &t.diagnostic))
            .collect()
    }

    #[must_use]
    pub fn current_revision(&self) -> u64 {
        self.current_revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_diag(code: DiagnosticCode, revision: u64) -> Diagnostic {
        Diagnostic::new(
            code,
            Severity::Error,
            Domain::Compile,
            PrimaryTarget::Patch,
            DiagnosticScope {
                patch_revision: revision,
                compile_id: None,
                runtime_session_id: None,
            },
            "title",
            "message",
        )
    }

    #[test]
    fn compile_end_replaces_rather_than_merges_authoring_diagnostics() {
        let mut hub = DiagnosticHub::new();
        hub.apply(DiagnosticEvent::CompileEnd {
            status: CompileStatus::Failure,
            diagnostics: vec![patch_diag(DiagnosticCode::NoTimeRoot, 1)],
        });
        assert_eq!(hub.live().len(), 1);
        hub.apply(DiagnosticEvent::CompileEnd {
            status: CompileStatus::Success,
            diagnostics: vec![],
        });
        assert!(hub.live().is_empty());
    }

    #[test]
    fn runtime_health_diagnostics_expire_after_the_ttl_window() {
        let mut hub = DiagnosticHub::new();
        hub.apply(DiagnosticEvent::RuntimeHealthSnapshot {
            frame_id: 0,
            diagnostics: vec![patch_diag(DiagnosticCode::NaN, 1)],
        });
        assert_eq!(hub.live().len(), 1);
        hub.apply(DiagnosticEvent::RuntimeHealthSnapshot {
            frame_id: RUNTIME_HEALTH_TTL_FRAMES + 1,
            diagnostics: vec![],
        });
        assert!(hub.live().is_empty());
    }

    #[test]
    fn same_code_and_target_does_not_multiply_entries() {
        let mut hub = DiagnosticHub::new();
        hub.apply(DiagnosticEvent::RuntimeHealthSnapshot {
            frame_id: 0,
            diagnostics: vec![patch_diag(DiagnosticCode::NaN, 1)],
        });
        hub.apply(DiagnosticEvent::RuntimeHealthSnapshot {
            frame_id: 1,
            diagnostics: vec![patch_diag(DiagnosticCode::NaN, 1)],
        });
        assert_eq!(hub.live().len(), 1);
    }
}
