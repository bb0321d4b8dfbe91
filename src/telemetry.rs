// SPDX-License-Identifier: Apache-2.0
//! JSONL telemetry for compile/runtime health events, gated behind the
//! `telemetry` feature (off by default \u{2014} embedding hosts opt in).
//!
//! Manually formats JSON rather than pulling in `serde_json`, matching
//! \u{00a7}4.13's event-driven diagnostics model: these functions are thin
//! best-effort mirrors of [`crate::diagnostics::DiagnosticEvent`]s onto
//! stdout, not a second source of truth.

use crate::diagnostics::{CompileStatus, Diagnostic, PrimaryTarget, SwapMode};
use crate::ident::Hash;

#[inline]
fn short_id(h: &Hash) -> String {
    let mut short = [0u8; 8];
    short.copy_from_slice(&h[0..8]);
    hex::encode(short)
}

fn ts_micros() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}

fn target_str(target: PrimaryTarget) -> String {
    match target {
        PrimaryTarget::Block(b) => short_id(b.as_bytes()),
        PrimaryTarget::Patch => "patch".to_string(),
    }
}

fn emit_line(line: &str) {
    use std::io::Write as _;
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(line.as_bytes());
    let _ = out.write_all(b"\n");
}

/// Emits a `compile_begin` event at the start of a compile attempt.
pub fn compile_begin(revision: u64) {
    emit_line(&format!(
        r#"{{"timestamp_micros":{},"event":"compile_begin","revision":{}}}"#,
        ts_micros(),
        revision
    ));
}

/// Emits a `compile_end` event with the outcome and diagnostic count.
pub fn compile_end(revision: u64, status: CompileStatus, diagnostics: &[Diagnostic]) {
    let status_str = match status {
        CompileStatus::Success => "success",
        CompileStatus::Failure => "failure",
    };
    emit_line(&format!(
        r#"{{"timestamp_micros":{},"event":"compile_end","revision":{},"status":"{}","diagnostic_count":{}}}"#,
        ts_micros(),
        revision,
        status_str,
        diagnostics.len()
    ));
}

/// Emits a `runtime_health` event summarizing one frame's live diagnostics.
pub fn runtime_health_snapshot(frame_id: u64, diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        emit_line(&format!(
            r#"{{"timestamp_micros":{},"event":"runtime_health","frame_id":{},"code":"{:?}","target":"{}"}}"#,
            ts_micros(),
            frame_id,
            d.code,
            target_str(d.primary_target)
        ));
    }
}

/// Emits a `program_swapped` event when a hot-swap replaces the running program.
pub fn program_swapped(new_revision: u64, swap_mode: SwapMode) {
    let mode_str = match swap_mode {
        SwapMode::Fresh => "fresh",
        SwapMode::PreserveContinuity => "preserve-continuity",
    };
    emit_line(&format!(
        r#"{{"timestamp_micros":{},"event":"program_swapped","revision":{},"swap_mode":"{}"}}"#,
        ts_micros(),
        new_revision,
        mode_str
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_stable_and_lowercase_hex() {
        let h: Hash = [0xabu8; 32];
        let s = short_id(&h);
        assert_eq!(s.len(), 16);
        assert_eq!(s, s.to_lowercase());
    }
}
