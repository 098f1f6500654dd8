// stuck.rs -- Resolve a bounding box that ended up embedded in solid geometry

use crate::pm_config::STUCK_PUSH;
use crate::q_shared::{vector_add, vector_length_squared, vector_ma, vector_subtract, Trace, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStuckResult {
    GoodPosition,
    Fixed,
    NoGoodPosition,
}

/// One face of the box: its outward normal, and which of mins (-1) / maxs (1)
/// each axis of the flat probe box spans.
struct SideCheck {
    normal: [i8; 3],
    mins: [i8; 3],
    maxs: [i8; 3],
}

// faces come in opposite pairs; side ^ 1 is the other face of the pair
const SIDE_CHECKS: [SideCheck; 6] = [
    SideCheck { normal: [0, 0, 1], mins: [-1, -1, 0], maxs: [1, 1, 0] },
    SideCheck { normal: [0, 0, -1], mins: [-1, -1, 0], maxs: [1, 1, 0] },
    SideCheck { normal: [1, 0, 0], mins: [0, -1, -1], maxs: [0, 1, 1] },
    SideCheck { normal: [-1, 0, 0], mins: [0, -1, -1], maxs: [0, 1, 1] },
    SideCheck { normal: [0, 1, 0], mins: [-1, 0, -1], maxs: [1, 0, 1] },
    SideCheck { normal: [0, -1, 0], mins: [-1, 0, -1], maxs: [1, 0, 1] },
];

fn bound_value(code: i8, axis: usize, mins: &Vec3, maxs: &Vec3) -> f32 {
    match code {
        -1 => mins[axis],
        1 => maxs[axis],
        _ => 0.0,
    }
}

impl SideCheck {
    fn normal(&self) -> Vec3 {
        [
            self.normal[0] as f32,
            self.normal[1] as f32,
            self.normal[2] as f32,
        ]
    }

    /// The flat box covering this face.
    fn bounds(&self, mins: &Vec3, maxs: &Vec3) -> (Vec3, Vec3) {
        let mut lmins = [0.0f32; 3];
        let mut lmaxs = [0.0f32; 3];
        for axis in 0..3 {
            lmins[axis] = bound_value(self.mins[axis], axis, mins, maxs);
            lmaxs[axis] = bound_value(self.maxs[axis], axis, mins, maxs);
        }
        (lmins, lmaxs)
    }

    /// `base` moved out onto this face.
    fn offset(&self, base: &Vec3, mins: &Vec3, maxs: &Vec3) -> Vec3 {
        let mut out = *base;
        for axis in 0..3 {
            if self.normal[axis] < 0 {
                out[axis] += mins[axis];
            } else if self.normal[axis] > 0 {
                out[axis] += maxs[axis];
            }
        }
        out
    }
}

/// A one unit shift along one axis, applied when the face probe itself
/// starts in solid.
type Nudge = Option<(usize, f32)>;

fn nudged(v: &Vec3, nudge: Nudge) -> Vec3 {
    let mut out = *v;
    if let Some((axis, dir)) = nudge {
        out[axis] += dir;
    }
    out
}

/// Searches the six faces of a stuck box for the smallest displacement that
/// frees it. `trace` is `(start, mins, maxs, end)`.
///
/// Returns the resolution and the origin to use: unchanged for
/// `GoodPosition` and `NoGoodPosition`.
pub fn fix_stuck_object<F>(
    origin: &Vec3,
    mins: &Vec3,
    maxs: &Vec3,
    trace: F,
) -> (FixStuckResult, Vec3)
where
    F: Fn(&Vec3, &Vec3, &Vec3, &Vec3) -> Trace,
{
    let tr = trace(origin, mins, maxs, origin);
    if !tr.startsolid {
        return (FixStuckResult::GoodPosition, *origin);
    }

    let mut best: Option<(f32, Vec3)> = None;

    for (sn, side) in SIDE_CHECKS.iter().enumerate() {
        let (lmins, lmaxs) = side.bounds(mins, maxs);
        let mut start = side.offset(origin, mins, maxs);
        let mut nudge: Nudge = None;

        let mut tr = trace(&start, &lmins, &lmaxs, &start);
        if tr.startsolid {
            // try shifting one unit along the axes that lie in the face
            'axes: for axis in 0..3 {
                if side.normal[axis] != 0 {
                    continue;
                }
                for dir in [1.0f32, -1.0] {
                    let probe = nudged(&start, Some((axis, dir)));
                    tr = trace(&probe, &lmins, &lmaxs, &probe);
                    if !tr.startsolid {
                        start = probe;
                        nudge = Some((axis, dir));
                        break 'axes;
                    }
                }
            }
        }
        if tr.startsolid {
            continue;
        }

        // sweep the face across to where the opposite face sits
        let opposite = nudged(&SIDE_CHECKS[sn ^ 1].offset(origin, mins, maxs), nudge);
        let tr = trace(&start, &lmins, &lmaxs, &opposite);
        if tr.startsolid {
            continue;
        }

        let end = vector_ma(&tr.endpos, STUCK_PUSH, &side.normal());
        let delta = vector_subtract(&end, &opposite);
        let candidate = nudged(&vector_add(origin, &delta), nudge);

        if trace(&candidate, mins, maxs, &candidate).startsolid {
            continue;
        }

        let dist = vector_length_squared(&delta);
        // keep the first of equally short moves
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }

    match best {
        Some((_, fixed)) => (FixStuckResult::Fixed, fixed),
        None => (FixStuckResult::NoGoodPosition, *origin),
    }
}

// ============================================================
// Unit tests
// ============================================================
