// SPDX-License-Identifier: Apache-2.0
//! Render frame assembly (\u{00a7}4.12, \u{00a7}6.3).
//!
//! The runtime's last per-frame act is to turn a [`crate::ir::Step::Render`]
//! step plus its resolved value slots into a sink-visible [`RenderFrame`].
//! Instances with a per-instance shape buffer are grouped by
//! `(topologyId, pointsFieldSlot)` so elements sharing one geometry draw in a
//! single batched op rather than one op per element (\u{00a7}4.12 step 2); the
//! group-then-slice shape mirrors the reference engine's materialization
//! pipeline (collect emissions, group by key, finalize deterministically).

pub mod topology;

use topology::Topology;

/// A single instance's packed shape descriptor (\u{00a7}4.12 step 2): eight
/// `u32` words, `[topologyId, pointsFieldSlot, pointsCount, styleRef, flags,
/// reserved, reserved, reserved]`.
pub const SHAPE_WORD_COUNT: usize = 8;

/// Fill rule for a path's interior (\u{00a7}6.3 `PathStyle`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FillRule {
    NonZero,
    EvenOdd,
}

/// Per-op fill/stroke style (\u{00a7}4.12 step 4).
#[derive(Clone, Debug, PartialEq)]
pub struct PathStyle {
    pub fill_color: [u8; 4],
    pub stroke_color: Option<[u8; 4]>,
    pub fill_rule: FillRule,
}

/// A shared topology's control-point geometry, resolved by static lookup
/// (\u{00a7}4.12 step 3).
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub topology_id: u32,
    pub verbs: Vec<u8>,
    pub points: Vec<f32>,
    pub points_count: u32,
    pub flags: u32,
}

/// A single instance's size, either shared across the whole batch (uniform
/// signal) or per-instance (field slot) \u{2014} \u{00a7}4.12 step 1: "Uniform ...
/// and per-instance ... are handled uniformly".
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceScalar {
    Uniform(f32),
    PerInstance(Vec<f32>),
}

/// One batched draw call: a shared geometry plus per-instance transform data
/// (\u{00a7}6.3 `DrawPathInstances`).
#[derive(Clone, Debug, PartialEq)]
pub struct DrawPathInstancesOp {
    pub geometry: Geometry,
    pub count: u32,
    pub position: Vec<f32>,
    pub size: InstanceScalar,
    pub rotation: Option<InstanceScalar>,
    pub scale2: Option<Vec<f32>>,
    pub style: PathStyle,
}

/// A single render op in a [`RenderFrame`]. Currently only one op kind
/// exists (\u{00a7}6.3); the enum wrapper keeps the frame extensible without
/// breaking `irVersion`.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderOp {
    DrawPathInstances(DrawPathInstancesOp),
}

/// The sink-visible IR the renderer consumes (\u{00a7}6.3): `version: 2, ops[]`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct RenderFrame {
    pub version: u32,
    pub ops: Vec<RenderOp>,
}

impl RenderFrame {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 2, ops: Vec::new() }
    }
}

/// One instance's resolved transform inputs, read off the schedule's render
/// step before grouping (\u{00a7}4.12 step 1).
#[derive(Clone, Copy, Debug)]
pub struct InstanceTransform {
    pub position: [f32; 2],
    pub size: f32,
    pub rotation: Option<f32>,
    pub scale2: Option<[f32; 2]>,
}

/// A single instance's packed shape descriptor, decoded from the raw
/// `u32x8` buffer (\u{00a7}4.12 step 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeDescriptor {
    pub topology_id: u32,
    pub points_field_slot: u32,
    pub points_count: u32,
    pub style_ref: u32,
    pub flags: u32,
}

impl ShapeDescriptor {
    #[must_use]
    pub fn decode(words: &[u32; SHAPE_WORD_COUNT]) -> Self {
        Self {
            topology_id: words[0],
            points_field_slot: words[1],
            points_count: words[2],
            style_ref: words[3],
            flags: words[4],
        }
    }

    /// The grouping key for \u{00a7}4.12 step 2: `(topologyId, pointsFieldSlot)`.
    #[must_use]
    pub const fn group_key(&self) -> (u32, u32) {
        (self.topology_id, self.points_field_slot)
    }
}

/// Resolves a uniform-shape instance's geometry from a topology id, used
/// when a `render` step has no per-instance shape buffer (\u{00a7}4.9
/// `ShapeSource::Uniform`).
#[must_use]
pub fn resolve_uniform_topology(topology_id: u32) -> Topology {
    topology::resolve(topology_id)
}

/// Builds one [`DrawPathInstancesOp`] per distinct `(topologyId,
/// pointsFieldSlot)` group among `shapes`, slicing `transforms`,
/// `fill_colors`, and `style_refs` into each group in the instance's
/// original order (\u{00a7}4.12 step 2). Groups are emitted in sorted key order
/// for determinism (\u{00a7}4.12: "All op emission is deterministic; topology
/// groups iterate in sorted key order").
///
/// `fill_colors` is one `[u8; 4]` per instance; `style_refs` is currently
/// unused beyond grouping (styling is uniform per topology in this version)
/// but is threaded through for forward compatibility with per-instance style
/// overrides.
#[must_use]
pub fn group_by_topology(
    shapes: &[ShapeDescriptor],
    transforms: &[InstanceTransform],
    fill_colors: &[[u8; 4]],
) -> Vec<DrawPathInstancesOp> {
    debug_assert_eq!(shapes.len(), transforms.len());
    debug_assert_eq!(shapes.len(), fill_colors.len());

    let mut keys: Vec<(u32, u32)> = shapes.iter().map(ShapeDescriptor::group_key).collect();
    keys.sort_unstable();
    keys.dedup();

    let mut ops = Vec::with_capacity(keys.len());
    for key in keys {
        let indices: Vec<usize> = shapes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.group_key() == key)
            .map(|(i, _)| i)
            .collect();
        let topology = resolve_uniform_topology(key.0);
        let count = indices.len() as u32;
        let mut position = Vec::with_capacity(indices.len() * 2);
        let mut sizes = Vec::with_capacity(indices.len());
        let mut rotations = Vec::with_capacity(indices.len());
        let mut scale2s = Vec::with_capacity(indices.len());
        let mut fill = [0u8; 4];
        let mut has_rotation = false;
        let mut has_scale2 = false;
        for &i in &indices {
            position.push(transforms[i].position[0]);
            position.push(transforms[i].position[1]);
            sizes.push(transforms[i].size);
            if let Some(r) = transforms[i].rotation {
                has_rotation = true;
                rotations.push(r);
            } else {
                rotations.push(0.0);
            }
            if let Some(s) = transforms[i].scale2 {
                has_scale2 = true;
                scale2s.push(s[0]);
                scale2s.push(s[1]);
            } else {
                scale2s.push(1.0);
                scale2s.push(1.0);
            }
            fill = fill_colors[i];
        }
        ops.push(DrawPathInstancesOp {
            geometry: Geometry {
                topology_id: topology.id,
                verbs: topology.verbs.to_vec(),
                points: topology.points.to_vec(),
                points_count: topology.points.len() as u32 / 2,
                flags: 0,
            },
            count,
            position,
            size: InstanceScalar::PerInstance(sizes),
            rotation: has_rotation.then(|| InstanceScalar::PerInstance(rotations)),
            scale2: has_scale2.then_some(scale2s),
            style: PathStyle {
                fill_color: fill,
                stroke_color: None,
                fill_rule: FillRule::NonZero,
            },
        });
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(x: f32, y: f32) -> InstanceTransform {
        InstanceTransform {
            position: [x, y],
            size: 1.0,
            rotation: None,
            scale2: None,
        }
    }

    #[test]
    fn mixed_topologies_produce_one_op_per_group_with_correct_counts() {
        let mut shapes = Vec::new();
        let mut transforms = Vec::new();
        let mut colors = Vec::new();
        for i in 0..60 {
            shapes.push(ShapeDescriptor {
                topology_id: 1,
                points_field_slot: 0,
                points_count: 3,
                style_ref: 0,
                flags: 0,
            });
            transforms.push(transform(i as f32, 0.0));
            colors.push([255, 0, 0, 255]);
        }
        for i in 0..40 {
            shapes.push(ShapeDescriptor {
                topology_id: 2,
                points_field_slot: 0,
                points_count: 4,
                style_ref: 0,
                flags: 0,
            });
            transforms.push(transform(i as f32, 1.0));
            colors.push([0, 255, 0, 255]);
        }
        let ops = group_by_topology(&shapes, &transforms, &colors);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].count, 60);
        assert_eq!(ops[1].count, 40);
    }

    #[test]
    fn groups_are_emitted_in_sorted_key_order() {
        let shapes = vec![
            ShapeDescriptor {
                topology_id: 5,
                points_field_slot: 0,
                points_count: 3,
                style_ref: 0,
                flags: 0,
            },
            ShapeDescriptor {
                topology_id: 1,
                points_field_slot: 0,
                points_count: 3,
                style_ref: 0,
                flags: 0,
            },
        ];
        let transforms = vec![transform(0.0, 0.0), transform(1.0, 0.0)];
        let colors = vec![[0, 0, 0, 255], [0, 0, 0, 255]];
        let ops = group_by_topology(&shapes, &transforms, &colors);
        assert_eq!(ops[0].geometry.topology_id, 1);
        assert_eq!(ops[1].geometry.topology_id, 5);
    }
}
