//! Regression coverage for the adapter insertion and stateful-primitive
//! lowering bugs a maintainer review flagged: vec2<->vec3 adapters mis-sizing
//! their output lanes, float->int adapters truncating instead of rounding,
//! `Lag`/`Slew` ignoring `dt`, and `SampleAndHold` re-sampling on every frame
//! a level trigger stays high.

mod support;

use oscilla::compiler::adapter::rule_table;
use oscilla::compiler::{compile, CompileOptions};
use oscilla::ident::{anchor_id, BlockId};
use oscilla::ir::CompiledProgram;
use oscilla::patch::{Block, CombineMode, Edge, ParamValue, Port};
use oscilla::runtime::{run_frame, LoadStrategy, RuntimeState};
use oscilla::types::{Axis, CanonicalType, Extent, Payload};
use rustc_hash::FxHashMap;

/// Replicates `adapter::insert_adapters`'s id derivation so a test can find
/// the synthesized adapter block without the compiler exposing it directly.
fn adapter_block_id(from: BlockId, to: BlockId, rule_id: &str, from_port: &str, to_port: &str) -> BlockId {
    let anchor = [from.0.as_slice(), to.0.as_slice()].concat();
    BlockId(anchor_id("adapter", &anchor, &format!("{rule_id}:{from_port}:{to_port}")))
}

fn stride_of(ty: &CanonicalType) -> usize {
    match ty.payload {
        Axis::Inst(p) => p.float_stride().unwrap_or(1) as usize,
        Axis::Var(_) => 1,
    }
}

fn read_f32_lanes(program: &CompiledProgram, rt: &RuntimeState, block: BlockId, port: &str) -> Vec<f32> {
    let slot = program.debug_index.port_bindings[&(block, port.to_string())];
    let meta = program.slot_meta(slot);
    let stride = stride_of(&meta.ty);
    (0..stride).map(|l| rt.banks.f32[meta.offset as usize + l]).collect()
}

fn read_i32(program: &CompiledProgram, rt: &RuntimeState, block: BlockId, port: &str) -> i32 {
    let slot = program.debug_index.port_bindings[&(block, port.to_string())];
    let meta = program.slot_meta(slot);
    rt.banks.i32[meta.offset as usize]
}

fn read_f64(program: &CompiledProgram, rt: &RuntimeState, block: BlockId, port: &str) -> f64 {
    let slot = program.debug_index.port_bindings[&(block, port.to_string())];
    let meta = program.slot_meta(slot);
    rt.banks.f64[meta.offset as usize]
}

fn vec_block(tag: &str, payload: Payload, input: bool) -> Block {
    let ty = CanonicalType::concrete(payload, Extent::signal());
    Block {
        id: support::block_id(tag),
        kind: "Const".to_string(),
        params: FxHashMap::default(),
        input_ports: if input {
            vec![Port { id: "in".to_string(), declared_type: ty }]
        } else {
            vec![]
        },
        output_ports: vec![Port { id: "out".to_string(), declared_type: ty }],
        display_name: None,
    }
}

#[test]
fn vec2_to_vec3_adapter_writes_exactly_three_lanes_with_a_zero_z() {
    let src = vec_block("src", Payload::Vec2, false);
    let dst = vec_block("dst", Payload::Vec3, true);
    let src_id = src.id;
    let dst_id = dst.id;
    let e = Edge {
        from_block: src_id,
        from_port: "out".to_string(),
        to_block: dst_id,
        to_port: "in".to_string(),
        combine_mode: CombineMode::WriterWins,
        enabled: true,
    };
    let p = support::patch(
        vec![support::time_root("time", "infinite", 1000.0, 1.0), src, dst],
        vec![e],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();
    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    run_frame(&mut rt, &program, 0.0, None);

    let rule_id = rule_table()
        .iter()
        .find(|r| r.id == "vec2_to_vec3")
        .unwrap()
        .id;
    let adapter_id = adapter_block_id(src_id, dst_id, rule_id, "out", "in");
    let lanes = read_f32_lanes(&program, &rt, adapter_id, "out");
    assert_eq!(lanes.len(), 3, "stride must match the allocated Vec3 slot, not a repeated-lane overrun");
    assert_eq!(lanes[2], 0.0, "z must be padded with 0, not the x lane repeated by zip_lanes's fallback");
}

#[test]
fn vec3_to_vec2_adapter_writes_exactly_two_lanes_dropping_z() {
    let src = vec_block("src", Payload::Vec3, false);
    let dst = vec_block("dst", Payload::Vec2, true);
    let src_id = src.id;
    let dst_id = dst.id;
    let e = Edge {
        from_block: src_id,
        from_port: "out".to_string(),
        to_block: dst_id,
        to_port: "in".to_string(),
        combine_mode: CombineMode::WriterWins,
        enabled: true,
    };
    let p = support::patch(
        vec![support::time_root("time", "infinite", 1000.0, 1.0), src, dst],
        vec![e],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();
    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    run_frame(&mut rt, &program, 0.0, None);

    let rule_id = rule_table()
        .iter()
        .find(|r| r.id == "vec3_to_vec2")
        .unwrap()
        .id;
    let adapter_id = adapter_block_id(src_id, dst_id, rule_id, "out", "in");
    let lanes = read_f32_lanes(&program, &rt, adapter_id, "out");
    assert_eq!(lanes.len(), 2, "stride must match the allocated Vec2 slot, never the source's 3 lanes");
}

#[test]
fn float_to_int_adapter_rounds_rather_than_truncating() {
    let src = support::const_block("src", 2.9);
    let dst = vec_block("dst", Payload::Int, true);
    let src_id = src.id;
    let dst_id = dst.id;
    let e = Edge {
        from_block: src_id,
        from_port: "out".to_string(),
        to_block: dst_id,
        to_port: "in".to_string(),
        combine_mode: CombineMode::WriterWins,
        enabled: true,
    };
    let p = support::patch(
        vec![support::time_root("time", "infinite", 1000.0, 1.0), src, dst],
        vec![e],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();
    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    run_frame(&mut rt, &program, 0.0, None);

    let rule_id = rule_table().iter().find(|r| r.id == "float_to_int").unwrap().id;
    let adapter_id = adapter_block_id(src_id, dst_id, rule_id, "out", "in");
    assert_eq!(read_i32(&program, &rt, adapter_id, "out"), 3);
}

#[test]
fn slew_scales_its_blend_by_dt_rather_than_a_fixed_coefficient() {
    let mut params = FxHashMap::default();
    params.insert("tauMs".to_string(), ParamValue::Float(100.0));
    let src = support::const_block("src", 10.0);
    let slew = support::unary_block("slew", "Slew", params);
    let slew_id = slew.id;
    let e = support::edge(src.id, "out", slew_id, "in");
    let p = support::patch(
        vec![support::time_root("time", "infinite", 1000.0, 1.0), src, slew],
        vec![e],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt_fast = RuntimeState::new();
    rt_fast.load_program(&program, LoadStrategy::Fresh);
    run_frame(&mut rt_fast, &program, 10.0, None);
    let small_dt_value = read_f64(&program, &rt_fast, slew_id, "out");

    let mut rt_slow = RuntimeState::new();
    rt_slow.load_program(&program, LoadStrategy::Fresh);
    run_frame(&mut rt_slow, &program, 500.0, None);
    let large_dt_value = read_f64(&program, &rt_slow, slew_id, "out");

    assert!(small_dt_value > 0.0 && small_dt_value < large_dt_value);
    assert!(large_dt_value < 10.0);
}

#[test]
fn lag_moves_at_different_rates_rising_versus_falling() {
    // Same rise/fall constants (rise fast, fall slow) on both programs; only
    // the target's sign differs, which selects which constant governs. If
    // `Lag` ignored the distinction (as the old single-arm lowering did) both
    // would move by the same fraction of their target.
    let build = |target: f64| {
        let mut params = FxHashMap::default();
        params.insert("riseTauMs".to_string(), ParamValue::Float(50.0));
        params.insert("fallTauMs".to_string(), ParamValue::Float(5000.0));
        let src = support::const_block("src", target);
        let lag = support::unary_block("lag", "Lag", params);
        let lag_id = lag.id;
        let e = support::edge(src.id, "out", lag_id, "in");
        let p = support::patch(
            vec![support::time_root("time", "infinite", 1000.0, 1.0), src, lag],
            vec![e],
        );
        let program = compile(&p, &CompileOptions::default()).unwrap();
        let mut rt = RuntimeState::new();
        rt.load_program(&program, LoadStrategy::Fresh);
        run_frame(&mut rt, &program, 100.0, None);
        read_f64(&program, &rt, lag_id, "out")
    };

    let rising = build(10.0); // diff > 0: fast rise tau governs, should move far
    let falling = build(-10.0); // diff < 0: slow fall tau governs, should barely move

    assert!(rising > 5.0, "fast rise tau should move most of the way to target in one frame");
    assert!(falling.abs() < 1.0, "slow fall tau should barely move in the same frame");
}

#[test]
fn sample_and_hold_latches_once_and_ignores_a_sustained_high_trigger() {
    let trigger = support::const_block("trigger", 1.0);
    let sh = support::binary_block("sh", "SampleAndHold", "value", "trigger");
    let sh_id = sh.id;
    let time = support::time_root("time", "infinite", 1000.0, 1.0);
    let time_id = time.id;
    let e_value = support::edge(time_id, "phaseA", sh_id, "value");
    let e_trigger = support::edge(trigger.id, "out", sh_id, "trigger");
    let p = support::patch(vec![time, trigger, sh], vec![e_value, e_trigger]);
    let program = compile(&p, &CompileOptions::default()).unwrap();
    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);

    run_frame(&mut rt, &program, 200.0, None);
    let latched = read_f64(&program, &rt, sh_id, "out");
    assert!((latched - 0.2).abs() < 1e-9);

    // `value` (phaseA) keeps changing every frame, but `trigger` never falls
    // back below the threshold, so the held output must stay put.
    run_frame(&mut rt, &program, 400.0, None);
    assert!((read_f64(&program, &rt, sh_id, "out") - latched).abs() < 1e-9);

    run_frame(&mut rt, &program, 600.0, None);
    assert!((read_f64(&program, &rt, sh_id, "out") - latched).abs() < 1e-9);
}
