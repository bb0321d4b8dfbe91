// SPDX-License-Identifier: Apache-2.0
//! Topology resolution: turning a `Polygon` block's `sides` count into
//! control-point geometry (\u{00a7}4.12 step 3).
//!
//! `Polygon.sides` lowers to a plain `Int` constant (\u{00a7}4.5), so a
//! topology id is that side count, not an opaque handle into a fixed
//! catalog — the "static table" the render pipeline consults is this
//! module's deterministic regular-polygon construction, not a literal
//! enumeration of named shapes. `sides == 0` is the degenerate case from
//! [scenario S1](https://example.invalid): DefaultSource resolves an
//! unconnected `sides` input to `0`, and the polygon collapses to a single
//! point with no drawable interior.

/// Path verb codes (\u{00a7}6.3 `geometry.verbs: u8[]`).
pub const VERB_MOVE_TO: u8 = 0;
pub const VERB_LINE_TO: u8 = 1;
pub const VERB_CLOSE: u8 = 2;

/// Resolved control-point geometry for one topology id, ready to copy into a
/// [`super::Geometry`].
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    pub id: u32,
    pub verbs: Vec<u8>,
    pub points: Vec<f32>,
}

/// A placeholder table so callers that expect a slice-backed lookup (tests,
/// or a future fixed-catalog extension such as imported path assets) have
/// something to iterate; regular polygons are resolved procedurally by
/// [`resolve`] rather than listed here.
pub const TOPOLOGY_TABLE: [Topology; 0] = [];

/// Resolves `topology_id` (a `Polygon.sides` count) to its unit-circle
/// regular-polygon geometry.
///
/// `sides == 0` or `1` degenerate to a single-point "polygon" (\u{00a7}8 S1: a
/// `Polygon` with an unconnected `sides` input compiles and renders
/// degenerate rather than erroring). `sides == 2` degenerates to a single
/// line segment. Vertices are placed evenly on the unit circle starting at
/// angle `-\u{03c0}/2` (pointing up), matching the conventional authoring-tool
/// orientation for regular polygons.
#[must_use]
pub fn resolve(topology_id: u32) -> Topology {
    match topology_id {
        0 => Topology {
            id: 0,
            verbs: vec![VERB_MOVE_TO, VERB_CLOSE],
            points: vec![0.0, 0.0],
        },
        1 => Topology {
            id: 1,
            verbs: vec![VERB_MOVE_TO, VERB_CLOSE],
            points: vec![0.0, -1.0],
        },
        n => {
            let mut points = Vec::with_capacity(n as usize * 2);
            let mut verbs = Vec::with_capacity(n as usize + 1);
            for i in 0..n {
                let angle = -std::f64::consts::FRAC_PI_2
                    + f64::from(i) * std::f64::consts::TAU / f64::from(n);
                #[allow(clippy::cast_possible_truncation)]
                let x = libm::cos(angle) as f32;
                #[allow(clippy::cast_possible_truncation)]
                let y = libm::sin(angle) as f32;
                points.push(x);
                points.push(y);
                verbs.push(if i == 0 { VERB_MOVE_TO } else { VERB_LINE_TO });
            }
            verbs.push(VERB_CLOSE);
            #[cfg(feature = "trig_audit_print")]
            audit_print(n, &points);
            Topology { id: n, verbs, points }
        }
    }
}

#[cfg(feature = "trig_audit_print")]
#[allow(clippy::print_stdout)]
fn audit_print(sides: u32, points: &[f32]) {
    println!("trig_audit: topology sides={sides} points={points:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sides_degenerates_to_a_single_point() {
        let t = resolve(0);
        assert_eq!(t.points, vec![0.0, 0.0]);
    }

    #[test]
    fn triangle_has_three_vertices_evenly_spaced() {
        let t = resolve(3);
        assert_eq!(t.points.len(), 6);
        assert_eq!(t.verbs, vec![VERB_MOVE_TO, VERB_LINE_TO, VERB_LINE_TO, VERB_CLOSE]);
        let dist = |x: f32, y: f32| (x * x + y * y).sqrt();
        for chunk in t.points.chunks(2) {
            assert!((dist(chunk[0], chunk[1]) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn resolve_is_deterministic() {
        assert_eq!(resolve(7), resolve(7));
    }
}
