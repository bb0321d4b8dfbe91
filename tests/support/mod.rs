//! Shared patch-building helpers for the integration tests in this directory.
//! Every helper builds blocks by hand rather than through a host-side DSL —
//! there is no authoring layer in this crate, only the `Patch` data model
//! itself — so these mirror what a real host's compiler frontend would emit.

use oscilla::ident::{anchor_id, BlockId, InstanceId};
use oscilla::patch::{Block, CombineMode, Edge, ParamValue, Patch, Port};
use oscilla::types::{CanonicalType, Extent, Payload};
use rustc_hash::FxHashMap;

#[must_use]
pub fn block_id(tag: &str) -> BlockId {
    BlockId(anchor_id("block", b"", tag))
}

#[must_use]
pub fn instance_id(tag: &str) -> InstanceId {
    InstanceId(anchor_id("instance", b"", tag))
}

/// A `TimeRoot` block exposing every rail a test might read, wired or not.
#[must_use]
pub fn time_root(tag: &str, mode: &str, period_ms: f64, speed: f64) -> Block {
    let mut params: FxHashMap<String, ParamValue> = FxHashMap::default();
    params.insert("mode".to_string(), ParamValue::Text(mode.to_string()));
    params.insert("period_ms".to_string(), ParamValue::Float(period_ms));
    params.insert("speed".to_string(), ParamValue::Float(speed));
    let signal = CanonicalType::concrete(Payload::Float, Extent::signal());
    Block {
        id: block_id(tag),
        kind: "TimeRoot".to_string(),
        params,
        input_ports: vec![],
        output_ports: vec![
            Port { id: "dt".to_string(), declared_type: signal },
            Port { id: "phaseA".to_string(), declared_type: signal },
            Port { id: "phaseB".to_string(), declared_type: signal },
            Port { id: "wrapEvent".to_string(), declared_type: signal },
            Port { id: "progress01".to_string(), declared_type: signal },
        ],
        display_name: None,
    }
}

/// A `RenderInstances` block with `position`/`color` field-typed input ports
/// and no `shape`/`size`/`rotation`/`scale2` ports, so it lowers to a single
/// uniform-topology render step. Left unwired, `position`/`color` pick up
/// whatever the default-source table resolves to for their payload.
#[must_use]
pub fn render_instances(tag: &str, instance: InstanceId) -> Block {
    Block {
        id: block_id(tag),
        kind: "RenderInstances".to_string(),
        params: FxHashMap::default(),
        input_ports: vec![
            Port {
                id: "position".to_string(),
                declared_type: CanonicalType::concrete(Payload::Vec2, Extent::field(instance)),
            },
            Port {
                id: "color".to_string(),
                declared_type: CanonicalType::concrete(Payload::Color, Extent::field(instance)),
            },
        ],
        output_ports: vec![],
        display_name: None,
    }
}

/// An `Array` block emitting a single intrinsic over `instance`'s domain.
#[must_use]
pub fn array_block(tag: &str, instance: InstanceId, intrinsic: &str, payload: Payload) -> Block {
    let mut params: FxHashMap<String, ParamValue> = FxHashMap::default();
    params.insert("intrinsic".to_string(), ParamValue::Text(intrinsic.to_string()));
    Block {
        id: block_id(tag),
        kind: "Array".to_string(),
        params,
        input_ports: vec![],
        output_ports: vec![Port {
            id: "out".to_string(),
            declared_type: CanonicalType::concrete(payload, Extent::field(instance)),
        }],
        display_name: None,
    }
}

/// A stateful `Phasor`/`Accumulator` block with one `rate`/`freq` param and a
/// single signal-typed `out` port.
#[must_use]
pub fn rate_block(tag: &str, kind: &str, rate_param: &str, rate: f64) -> Block {
    let mut params: FxHashMap<String, ParamValue> = FxHashMap::default();
    params.insert(rate_param.to_string(), ParamValue::Float(rate));
    Block {
        id: block_id(tag),
        kind: kind.to_string(),
        params,
        input_ports: vec![],
        output_ports: vec![Port {
            id: "out".to_string(),
            declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
        }],
        display_name: None,
    }
}

/// A `Const` block with a single Float signal `out` port.
#[must_use]
pub fn const_block(tag: &str, value: f64) -> Block {
    let mut params: FxHashMap<String, ParamValue> = FxHashMap::default();
    params.insert("value".to_string(), ParamValue::Float(value));
    Block {
        id: block_id(tag),
        kind: "Const".to_string(),
        params,
        input_ports: vec![],
        output_ports: vec![Port {
            id: "out".to_string(),
            declared_type: CanonicalType::concrete(Payload::Float, Extent::signal()),
        }],
        display_name: None,
    }
}

/// A Float-signal block taking the two named input ports (e.g.
/// `SampleAndHold`'s `value`/`trigger`) and a single `out` port.
#[must_use]
pub fn binary_block(tag: &str, kind: &str, port_a: &str, port_b: &str) -> Block {
    let signal = CanonicalType::concrete(Payload::Float, Extent::signal());
    Block {
        id: block_id(tag),
        kind: kind.to_string(),
        params: FxHashMap::default(),
        input_ports: vec![
            Port { id: port_a.to_string(), declared_type: signal },
            Port { id: port_b.to_string(), declared_type: signal },
        ],
        output_ports: vec![Port { id: "out".to_string(), declared_type: signal }],
        display_name: None,
    }
}

/// A Float-signal block taking one named `in` port and a single `out` port
/// (e.g. `Slew`/`Lag`/`UnitDelay`), with optional extra params.
#[must_use]
pub fn unary_block(tag: &str, kind: &str, params: FxHashMap<String, ParamValue>) -> Block {
    let signal = CanonicalType::concrete(Payload::Float, Extent::signal());
    Block {
        id: block_id(tag),
        kind: kind.to_string(),
        params,
        input_ports: vec![Port { id: "in".to_string(), declared_type: signal }],
        output_ports: vec![Port { id: "out".to_string(), declared_type: signal }],
        display_name: None,
    }
}

#[must_use]
pub fn edge(from: BlockId, from_port: &str, to: BlockId, to_port: &str) -> Edge {
    Edge {
        from_block: from,
        from_port: from_port.to_string(),
        to_block: to,
        to_port: to_port.to_string(),
        combine_mode: CombineMode::WriterWins,
        enabled: true,
    }
}

#[must_use]
pub fn patch(blocks: Vec<Block>, edges: Vec<Edge>) -> Patch {
    Patch { blocks, edges }
}
