//! End-to-end coverage of time resolution and phase-gauge reconciliation
//! (§4.5, §4.11.1) through the compiled pipeline, not the `TimeGauge` struct
//! directly — a `TimeRoot`'s rails reach the value banks only via lowering's
//! `ValueExprKind::Time` expressions and binding's auto-emitted `EvalValue`
//! steps, so this also exercises that wiring.

mod support;

use oscilla::compiler::{compile, CompileOptions};
use oscilla::ident::BlockId;
use oscilla::ir::CompiledProgram;
use oscilla::runtime::{run_frame, Discontinuity, LoadStrategy, RuntimeState};

fn read_rail(program: &CompiledProgram, rt: &RuntimeState, root: BlockId, rail: &str) -> f64 {
    let slot = program.debug_index.port_bindings[&(root, rail.to_string())];
    let meta = program.slot_meta(slot);
    rt.banks.f64[meta.offset as usize]
}

#[test]
fn phase_a_tracks_model_time_over_a_finite_period_with_no_discontinuity() {
    let root = support::time_root("time", "finite", 1000.0, 1.0);
    let root_id = root.id;
    let p = support::patch(vec![root], vec![]);
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);

    run_frame(&mut rt, &program, 250.0, None);
    assert!((read_rail(&program, &rt, root_id, "phaseA") - 0.25).abs() < 1e-9);
    assert!((read_rail(&program, &rt, root_id, "dt") - 250.0).abs() < 1e-9);

    run_frame(&mut rt, &program, 1300.0, None);
    assert!((read_rail(&program, &rt, root_id, "phaseA") - 0.3).abs() < 1e-9);
    assert!((read_rail(&program, &rt, root_id, "dt") - 1050.0).abs() < 1e-9);
}

#[test]
fn a_seek_discontinuity_never_lets_the_visible_phase_jump() {
    let root = support::time_root("time", "finite", 1000.0, 1.0);
    let root_id = root.id;
    let p = support::patch(vec![root], vec![]);
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);

    run_frame(&mut rt, &program, 900.0, None);
    run_frame(&mut rt, &program, 1300.0, None);
    let before = read_rail(&program, &rt, root_id, "phaseA");

    // A hot edit rebases model time back to 100ms; the gauge must absorb the
    // jump so the next frame's visible phase matches the one just observed.
    let frame = run_frame(&mut rt, &program, 100.0, Some(Discontinuity::Seek));
    assert_eq!(frame.version, 2);
    let after = read_rail(&program, &rt, root_id, "phaseA");
    assert!((before - after).abs() < 1e-6);
    assert!((read_rail(&program, &rt, root_id, "dt") - 0.0).abs() < 1e-9);
}
