//! End-to-end coverage of the render-assembly path (§4.12, §6.3): a minimal
//! `TimeRoot` + `RenderInstances` patch, compiled once and driven through
//! several frames, with no `Const`/`Array` scaffolding for `position`/`color`
//! — default-source insertion (§4.2) supplies both.

mod support;

use oscilla::compiler::{compile, CompileOptions};
use oscilla::render::RenderOp;
use oscilla::runtime::domain::DomainSnapshot;
use oscilla::runtime::{run_frame, LoadStrategy, RuntimeState};

#[test]
fn a_render_instances_block_with_unwired_ports_still_draws_every_published_instance() {
    let instance = support::instance_id("particles");
    let p = support::patch(
        vec![
            support::time_root("time", "infinite", 1000.0, 1.0),
            support::render_instances("draw", instance),
        ],
        vec![],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();
    assert!(program.has_no_var_escape());

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    rt.registry.publish(instance, DomainSnapshot::uniform(7));

    let frame = run_frame(&mut rt, &program, 0.0, None);
    assert_eq!(frame.version, 2);
    assert_eq!(frame.ops.len(), 1);
    let RenderOp::DrawPathInstances(op) = &frame.ops[0];
    assert_eq!(op.count, 7);
    assert_eq!(op.position.len(), 7 * 2);
}

#[test]
fn an_empty_domain_still_produces_a_single_zero_count_op() {
    let instance = support::instance_id("particles");
    let p = support::patch(
        vec![
            support::time_root("time", "infinite", 1000.0, 1.0),
            support::render_instances("draw", instance),
        ],
        vec![],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    rt.registry.publish(instance, DomainSnapshot::uniform(0));

    let frame = run_frame(&mut rt, &program, 0.0, None);
    assert_eq!(frame.ops.len(), 1);
    let RenderOp::DrawPathInstances(op) = &frame.ops[0];
    assert_eq!(op.count, 0);
    assert!(op.position.is_empty());
}

#[test]
fn a_positioned_field_from_an_array_block_reaches_the_render_frame() {
    let instance = support::instance_id("particles");
    let array = support::array_block("uv", instance, "uv", oscilla::types::Payload::Vec2);
    let mut render = support::render_instances("draw", instance);
    render.input_ports[0].declared_type =
        oscilla::types::CanonicalType::concrete(oscilla::types::Payload::Vec2, oscilla::types::Extent::field(instance));
    let p = support::patch(
        vec![support::time_root("time", "infinite", 1000.0, 1.0), array.clone(), render.clone()],
        vec![support::edge(array.id, "out", render.id, "position")],
    );
    let program = compile(&p, &CompileOptions::default()).unwrap();

    let mut rt = RuntimeState::new();
    rt.load_program(&program, LoadStrategy::Fresh);
    rt.registry.publish(instance, DomainSnapshot::uniform(4));

    let frame = run_frame(&mut rt, &program, 0.0, None);
    let RenderOp::DrawPathInstances(op) = &frame.ops[0];
    assert_eq!(op.count, 4);
    assert_eq!(op.position.len(), 8);
    assert!(op.position.iter().all(|v| v.is_finite()));
}
