//! §4.13's non-fatal degradation path: a non-finite value never aborts a
//! frame. It gets zeroed in place and surfaces as a health diagnostic the
//! host can poll for instead.

mod support;

use oscilla::compiler::{compile, CompileOptions};
use oscilla::diagnostics::DiagnosticCode;
use oscilla::ident::BlockId;
use oscilla::runtime::{run_frame, LoadStrategy, RuntimeState};

#[test]
fn a_nan_valued_const_zeros_its_slot_and_raises_a_nan_diagnostic_instead_of_panicking() {
    let c = support::rate_block("bad", "Const", "value", f64::NAN);
    let c_id: BlockId = c.id;
    let p = support::patch(vec![support::time_root("time", "infinite", 1000.0, 1.0), c], vec![]);
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);

    run_frame(&mut rt, &program, 16.0, None);

    let slot = program.debug_index.port_bindings[&(c_id, "out".to_string())];
    let meta = program.slot_meta(slot);
    assert_eq!(rt.banks.f64[meta.offset as usize], 0.0);

    let diagnostics = rt.take_health_diagnostics();
    assert!(diagnostics.iter().any(|d| d.code == DiagnosticCode::NaN));
}
