// cmodel.rs -- Collision model import and box tracing

use crate::pm_config::DIST_EPSILON;
use crate::q_shared::{
    angle_vectors, box_on_plane_side, dot_product, vector_compare, vector_is_finite,
    vector_subtract, CPlane, Trace, Vec3, CONTENTS_SOLID, VEC3_ORIGIN,
};
use rayon::prelude::*;

// ============================================================
// Runtime structures
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct CNode {
    pub plane_idx: usize,
    pub children: [i32; 2], // negative numbers are leafs
}

#[derive(Debug, Clone, Default)]
pub struct CBrushSide {
    pub plane_idx: usize,
    pub surface_flags: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CLeaf {
    pub contents: i32,
    pub cluster: i32,
    pub area: i32,
    pub firstleafbrush: usize,
    pub numleafbrushes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CBrush {
    pub contents: i32,
    pub firstbrushside: usize,
    pub numsides: usize,
}

/// Inline brush model (doors, platforms, the world itself at index 0).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub headnode: i32,
}

// ============================================================
// Lump records -- already decoded from the map file by the loader
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct DPlane {
    pub normal: Vec3,
    pub dist: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DNode {
    pub planenum: i32,
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DLeaf {
    pub contents: i32,
    pub cluster: i32,
    pub area: i32,
    pub firstleafbrush: i32,
    pub numleafbrushes: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DBrush {
    pub firstside: i32,
    pub numsides: i32,
    pub contents: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DBrushSide {
    pub planenum: i32,
    pub surface_flags: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CollisionLumps {
    pub planes: Vec<DPlane>,
    pub nodes: Vec<DNode>,
    pub leafs: Vec<DLeaf>,
    pub brushes: Vec<DBrush>,
    pub brushsides: Vec<DBrushSide>,
    pub leafbrushes: Vec<i32>,
    pub models: Vec<CModel>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CModelError {
    #[error("map with no leafs")]
    NoLeafs,
    #[error("{lump} {index}: bad {field} {value}")]
    BadIndex {
        lump: &'static str,
        index: usize,
        field: &'static str,
        value: i64,
    },
    #[error("plane {0} is not finite")]
    BadPlane(usize),
    #[error("node {node} has child {child} that does not descend the tree")]
    BadNodeOrder { node: usize, child: i32 },
    #[error("bad inline model \"{0}\"")]
    BadInlineModel(String),
}

// ============================================================
// Constants
// ============================================================

const PARALLEL_LUMP_THRESHOLD: usize = 64;
const MAX_POSITION_LEAFS: usize = 1024;

// ============================================================
// Per-trace brush marks
// ============================================================

/// Remembers which brushes one trace has already clipped against.
struct BrushMarks(Vec<u64>);

impl BrushMarks {
    fn new(numbrushes: usize) -> Self {
        Self(vec![0; numbrushes.div_ceil(64)])
    }

    /// Returns true the first time a brush is seen.
    fn mark(&mut self, brush: usize) -> bool {
        let word = &mut self.0[brush >> 6];
        let bit = 1u64 << (brush & 63);
        let fresh = *word & bit == 0;
        *word |= bit;
        fresh
    }
}

/// Everything one box trace carries through the tree walk.
struct TraceWork {
    start: Vec3,
    end: Vec3,
    mins: Vec3,
    maxs: Vec3,
    extents: Vec3,
    ispoint: bool,
    contents: i32,
    marks: BrushMarks,
    trace: Trace,
}

// ============================================================
// Collision model
// ============================================================

/// Immutable level geometry. Every query takes `&self`, so one model can be
/// shared between threads behind an `Arc` and traced concurrently.
#[derive(Debug, Clone)]
pub struct CollisionModel {
    planes: Vec<CPlane>,
    nodes: Vec<CNode>,
    leafs: Vec<CLeaf>,
    brushes: Vec<CBrush>,
    brushsides: Vec<CBrushSide>,
    leafbrushes: Vec<usize>,
    models: Vec<CModel>,
}

fn lump_index(
    lump: &'static str,
    index: usize,
    field: &'static str,
    value: i64,
    limit: usize,
) -> Result<usize, CModelError> {
    if value < 0 || value as usize >= limit {
        return Err(CModelError::BadIndex {
            lump,
            index,
            field,
            value,
        });
    }
    Ok(value as usize)
}

fn convert_lump<S, T, F>(src: &[S], f: F) -> Result<Vec<T>, CModelError>
where
    S: Sync,
    T: Send,
    F: Fn(usize, &S) -> Result<T, CModelError> + Sync + Send,
{
    // Use parallel conversion for large lumps
    if src.len() >= PARALLEL_LUMP_THRESHOLD {
        src.par_iter().enumerate().map(|(i, s)| f(i, s)).collect()
    } else {
        src.iter().enumerate().map(|(i, s)| f(i, s)).collect()
    }
}

impl CollisionModel {
    /// A world with a single empty leaf. Every trace passes through.
    pub fn empty() -> Self {
        Self {
            planes: Vec::new(),
            nodes: Vec::new(),
            leafs: vec![CLeaf::default()],
            brushes: Vec::new(),
            brushsides: Vec::new(),
            leafbrushes: Vec::new(),
            models: vec![CModel {
                headnode: -1,
                ..CModel::default()
            }],
        }
    }

    /// Builds the runtime model from decoded lumps, validating every index.
    pub fn from_lumps(lumps: CollisionLumps) -> Result<Self, CModelError> {
        if lumps.leafs.is_empty() {
            return Err(CModelError::NoLeafs);
        }

        let numplanes = lumps.planes.len();
        let numnodes = lumps.nodes.len();
        let numleafs = lumps.leafs.len();
        let numbrushes = lumps.brushes.len();
        let numsides = lumps.brushsides.len();
        let numleafbrushes = lumps.leafbrushes.len();

        let planes = convert_lump(&lumps.planes, |i, p| {
            if !vector_is_finite(&p.normal) || !p.dist.is_finite() {
                return Err(CModelError::BadPlane(i));
            }
            Ok(CPlane::new(p.normal, p.dist))
        })?;

        let nodes = convert_lump(&lumps.nodes, |i, n| {
            let plane_idx = lump_index("node", i, "plane", n.planenum as i64, numplanes)?;
            for &child in &n.children {
                if child >= 0 {
                    // children are always emitted after their parent
                    if child as usize >= numnodes || child as usize <= i {
                        return Err(CModelError::BadNodeOrder { node: i, child });
                    }
                } else {
                    lump_index("node", i, "leaf", -1 - child as i64, numleafs)?;
                }
            }
            Ok(CNode {
                plane_idx,
                children: n.children,
            })
        })?;

        let brushsides = convert_lump(&lumps.brushsides, |i, s| {
            Ok(CBrushSide {
                plane_idx: lump_index("brushside", i, "plane", s.planenum as i64, numplanes)?,
                surface_flags: s.surface_flags,
            })
        })?;

        let brushes = convert_lump(&lumps.brushes, |i, b| {
            let last = b.firstside as i64 + b.numsides as i64;
            if b.numsides < 0 || b.firstside < 0 || last > numsides as i64 {
                return Err(CModelError::BadIndex {
                    lump: "brush",
                    index: i,
                    field: "side range",
                    value: last,
                });
            }
            Ok(CBrush {
                contents: b.contents,
                firstbrushside: b.firstside as usize,
                numsides: b.numsides as usize,
            })
        })?;

        let leafbrushes = convert_lump(&lumps.leafbrushes, |i, &b| {
            lump_index("leafbrush", i, "brush", b as i64, numbrushes)
        })?;

        let leafs = convert_lump(&lumps.leafs, |i, l| {
            let last = l.firstleafbrush as i64 + l.numleafbrushes as i64;
            if l.firstleafbrush < 0 || l.numleafbrushes < 0 || last > numleafbrushes as i64 {
                return Err(CModelError::BadIndex {
                    lump: "leaf",
                    index: i,
                    field: "brush range",
                    value: last,
                });
            }
            Ok(CLeaf {
                contents: l.contents,
                cluster: l.cluster,
                area: l.area,
                firstleafbrush: l.firstleafbrush as usize,
                numleafbrushes: l.numleafbrushes as usize,
            })
        })?;

        let mut models = lumps.models;
        if models.is_empty() {
            models.push(CModel {
                headnode: if numnodes > 0 { 0 } else { -1 },
                ..CModel::default()
            });
        }

        let cm = Self {
            planes,
            nodes,
            leafs,
            brushes,
            brushsides,
            leafbrushes,
            models,
        };

        for (i, m) in cm.models.iter().enumerate() {
            if !cm.valid_headnode(m.headnode) {
                return Err(CModelError::BadIndex {
                    lump: "model",
                    index: i,
                    field: "headnode",
                    value: m.headnode as i64,
                });
            }
        }

        log::debug!(
            "collision model: {} planes, {} nodes, {} leafs, {} brushes, {} inline models",
            numplanes,
            numnodes,
            numleafs,
            numbrushes,
            cm.models.len()
        );

        Ok(cm)
    }

    /// A standalone model for an axis-aligned box, used to clip against
    /// entities that have a bounding box instead of a brush model.
    pub fn box_hull(mins: &Vec3, maxs: &Vec3, contents: i32) -> Self {
        let mut planes = Vec::with_capacity(12);
        let mut nodes = Vec::with_capacity(6);
        let mut brushsides = Vec::with_capacity(6);

        // leaf 0 is outside the box, leaf 1 is the box itself
        for i in 0..6 {
            let axis = i >> 1;
            let side = i & 1;
            let dist = if side == 0 { maxs[axis] } else { mins[axis] };

            let mut normal = VEC3_ORIGIN;
            normal[axis] = 1.0;
            planes.push(CPlane::new(normal, dist));
            normal[axis] = -1.0;
            planes.push(CPlane::new(normal, -dist));

            brushsides.push(CBrushSide {
                plane_idx: i * 2 + side,
                surface_flags: 0,
            });

            let mut children = [0i32; 2];
            children[side] = -1;
            children[side ^ 1] = if i != 5 { i as i32 + 1 } else { -2 };
            nodes.push(CNode {
                plane_idx: i * 2,
                children,
            });
        }

        Self {
            planes,
            nodes,
            leafs: vec![
                CLeaf::default(),
                CLeaf {
                    contents,
                    firstleafbrush: 0,
                    numleafbrushes: 1,
                    ..CLeaf::default()
                },
            ],
            brushes: vec![CBrush {
                contents,
                firstbrushside: 0,
                numsides: 6,
            }],
            brushsides,
            leafbrushes: vec![0],
            models: vec![CModel {
                mins: *mins,
                maxs: *maxs,
                origin: VEC3_ORIGIN,
                headnode: 0,
            }],
        }
    }

    // ============================================================
    // Public accessors
    // ============================================================

    /// Head node of the world model.
    pub fn world_headnode(&self) -> i32 {
        self.models.first().map_or(-1, |m| m.headnode)
    }

    pub fn num_inline_models(&self) -> usize {
        self.models.len()
    }

    pub fn submodel(&self, index: usize) -> Option<&CModel> {
        self.models.get(index)
    }

    /// Looks up an inline model by its "*N" name.
    pub fn inline_model(&self, name: &str) -> Result<&CModel, CModelError> {
        name.strip_prefix('*')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .and_then(|n| self.models.get(n))
            .ok_or_else(|| CModelError::BadInlineModel(name.to_string()))
    }

    pub fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    pub fn leaf_contents(&self, leafnum: usize) -> Option<i32> {
        self.leafs.get(leafnum).map(|l| l.contents)
    }

    pub fn leaf_cluster(&self, leafnum: usize) -> Option<i32> {
        self.leafs.get(leafnum).map(|l| l.cluster)
    }

    pub fn leaf_area(&self, leafnum: usize) -> Option<i32> {
        self.leafs.get(leafnum).map(|l| l.area)
    }

    fn valid_headnode(&self, headnode: i32) -> bool {
        if headnode >= 0 {
            (headnode as usize) < self.nodes.len()
        } else {
            ((-1 - headnode as i64) as usize) < self.leafs.len()
        }
    }

    // ============================================================
    // Point / leaf queries
    // ============================================================

    fn point_leafnum_r(&self, p: &Vec3, mut num: i32) -> usize {
        while num >= 0 {
            let node = &self.nodes[num as usize];
            let plane = &self.planes[node.plane_idx];

            let d = if plane.plane_type < 3 {
                p[plane.plane_type as usize] - plane.dist
            } else {
                dot_product(&plane.normal, p) - plane.dist
            };

            num = if d < 0.0 { node.children[1] } else { node.children[0] };
        }
        (-1 - num) as usize
    }

    /// Leaf of the world model that contains `p`.
    pub fn point_leafnum(&self, p: &Vec3) -> usize {
        self.point_leafnum_r(p, self.world_headnode())
    }

    /// Contents of the leaf containing `p`. Unknown head nodes read as solid.
    pub fn point_contents(&self, p: &Vec3, headnode: i32) -> i32 {
        if !self.valid_headnode(headnode) || !vector_is_finite(p) {
            return CONTENTS_SOLID;
        }
        let l = self.point_leafnum_r(p, headnode);
        self.leafs[l].contents
    }

    /// Point contents against a model that has been moved and rotated.
    pub fn transformed_point_contents(
        &self,
        p: &Vec3,
        headnode: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> i32 {
        let mut p_l = vector_subtract(p, origin);
        if !vector_compare(angles, &VEC3_ORIGIN) {
            p_l = rotate_into(&p_l, angles);
        }
        self.point_contents(&p_l, headnode)
    }

    fn box_leafnums_r(
        &self,
        mut nodenum: i32,
        leaf_list: &mut Vec<usize>,
        leaf_maxcount: usize,
        leaf_mins: &Vec3,
        leaf_maxs: &Vec3,
        leaf_topnode: &mut i32,
    ) {
        loop {
            if nodenum < 0 {
                if leaf_list.len() < leaf_maxcount {
                    leaf_list.push((-1 - nodenum) as usize);
                }
                return;
            }

            let node = &self.nodes[nodenum as usize];
            let plane = &self.planes[node.plane_idx];
            match box_on_plane_side(leaf_mins, leaf_maxs, plane) {
                1 => nodenum = node.children[0],
                2 => nodenum = node.children[1],
                _ => {
                    // go down both
                    if *leaf_topnode == -1 {
                        *leaf_topnode = nodenum;
                    }
                    self.box_leafnums_r(
                        node.children[0],
                        leaf_list,
                        leaf_maxcount,
                        leaf_mins,
                        leaf_maxs,
                        leaf_topnode,
                    );
                    nodenum = node.children[1];
                }
            }
        }
    }

    /// Leafs touched by a box, and the first node that split it (-1 if none).
    pub fn box_leafnums(
        &self,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        listsize: usize,
    ) -> (Vec<usize>, i32) {
        let mut leaf_list = Vec::new();
        let mut topnode = -1;
        if self.valid_headnode(headnode) {
            self.box_leafnums_r(headnode, &mut leaf_list, listsize, mins, maxs, &mut topnode);
        }
        (leaf_list, topnode)
    }

    // ============================================================
    // Box tracing
    // ============================================================

    fn clip_box_to_brush(&self, tw: &mut TraceWork, brush: &CBrush) {
        if brush.numsides == 0 {
            return;
        }

        let mut enterfrac: f32 = -1.0;
        let mut leavefrac: f32 = 1.0;
        let mut clipside: Option<&CBrushSide> = None;

        let mut getout = false;
        let mut startout = false;

        for side in &self.brushsides[brush.firstbrushside..brush.firstbrushside + brush.numsides]
        {
            let plane = &self.planes[side.plane_idx];

            // push the plane out apropriately for mins/maxs
            let dist = if tw.ispoint {
                plane.dist
            } else {
                let mut ofs = [0.0f32; 3];
                for j in 0..3 {
                    ofs[j] = if plane.normal[j] < 0.0 {
                        tw.maxs[j]
                    } else {
                        tw.mins[j]
                    };
                }
                plane.dist - dot_product(&ofs, &plane.normal)
            };

            let d1 = dot_product(&tw.start, &plane.normal) - dist;
            let d2 = dot_product(&tw.end, &plane.normal) - dist;

            if d2 > 0.0 {
                getout = true; // endpoint is not in solid
            }
            if d1 > 0.0 {
                startout = true;
            }

            // if completely in front of face, no intersection
            if d1 > 0.0 && d2 >= d1 {
                return;
            }
            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            // crosses face
            if d1 > d2 {
                // enter
                let f = (d1 - DIST_EPSILON) / (d1 - d2);
                if f > enterfrac {
                    enterfrac = f;
                    clipside = Some(side);
                }
            } else {
                // leave
                let f = (d1 + DIST_EPSILON) / (d1 - d2);
                if f < leavefrac {
                    leavefrac = f;
                }
            }
        }

        if !startout {
            // original point was inside brush
            tw.trace.startsolid = true;
            if !getout {
                tw.trace.allsolid = true;
                tw.trace.fraction = 0.0;
                tw.trace.contents = brush.contents;
            }
            return;
        }

        if enterfrac < leavefrac && enterfrac > -1.0 && enterfrac < tw.trace.fraction {
            tw.trace.fraction = enterfrac.max(0.0);
            if let Some(side) = clipside {
                tw.trace.plane = Some(self.planes[side.plane_idx]);
                tw.trace.surface_flags = side.surface_flags;
            }
            tw.trace.contents = brush.contents;
        }
    }

    fn test_box_in_brush(&self, tw: &mut TraceWork, brush: &CBrush) {
        if brush.numsides == 0 {
            return;
        }

        for side in &self.brushsides[brush.firstbrushside..brush.firstbrushside + brush.numsides]
        {
            let plane = &self.planes[side.plane_idx];

            let mut ofs = [0.0f32; 3];
            for j in 0..3 {
                ofs[j] = if plane.normal[j] < 0.0 {
                    tw.maxs[j]
                } else {
                    tw.mins[j]
                };
            }
            let dist = plane.dist - dot_product(&ofs, &plane.normal);
            let d1 = dot_product(&tw.start, &plane.normal) - dist;

            // if completely in front of face, no intersection
            if d1 > 0.0 {
                return;
            }
        }

        // inside this brush
        tw.trace.startsolid = true;
        tw.trace.allsolid = true;
        tw.trace.fraction = 0.0;
        tw.trace.contents = brush.contents;
    }

    /// Visits each not-yet-seen brush of a leaf that matches the trace mask.
    fn leaf_brushes<F>(&self, leafnum: usize, tw: &mut TraceWork, mut f: F)
    where
        F: FnMut(&Self, &mut TraceWork, &CBrush),
    {
        let leaf = &self.leafs[leafnum];
        if leaf.contents & tw.contents == 0 {
            return;
        }

        for &brushnum in
            &self.leafbrushes[leaf.firstleafbrush..leaf.firstleafbrush + leaf.numleafbrushes]
        {
            if !tw.marks.mark(brushnum) {
                continue; // already checked this brush in another leaf
            }
            let brush = &self.brushes[brushnum];
            if brush.contents & tw.contents == 0 {
                continue;
            }
            f(self, tw, brush);
            if tw.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn recursive_hull_check(
        &self,
        tw: &mut TraceWork,
        num: i32,
        p1f: f32,
        p2f: f32,
        p1: &Vec3,
        p2: &Vec3,
    ) {
        if tw.trace.fraction <= p1f {
            return; // already hit something nearer
        }

        // if < 0, we are in a leaf node
        if num < 0 {
            self.leaf_brushes((-1 - num) as usize, tw, Self::clip_box_to_brush);
            return;
        }

        // find the point distances to the seperating plane
        // and the offset for the size of the box
        let node = &self.nodes[num as usize];
        let plane = &self.planes[node.plane_idx];

        let (t1, t2, offset);
        if plane.plane_type < 3 {
            let pt = plane.plane_type as usize;
            t1 = p1[pt] - plane.dist;
            t2 = p2[pt] - plane.dist;
            offset = tw.extents[pt];
        } else {
            t1 = dot_product(&plane.normal, p1) - plane.dist;
            t2 = dot_product(&plane.normal, p2) - plane.dist;
            offset = if tw.ispoint {
                0.0
            } else {
                (tw.extents[0] * plane.normal[0]).abs()
                    + (tw.extents[1] * plane.normal[1]).abs()
                    + (tw.extents[2] * plane.normal[2]).abs()
            };
        }

        // see which sides we need to consider
        if t1 >= offset && t2 >= offset {
            self.recursive_hull_check(tw, node.children[0], p1f, p2f, p1, p2);
            return;
        }
        if t1 < -offset && t2 < -offset {
            self.recursive_hull_check(tw, node.children[1], p1f, p2f, p1, p2);
            return;
        }

        // put the crosspoint DIST_EPSILON pixels on the near side
        let (side, frac, frac2);
        if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            side = 1usize;
            frac2 = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac = ((t1 - offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            side = 0usize;
            frac2 = ((t1 - offset - DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else {
            side = 0;
            frac = 1.0;
            frac2 = 0.0;
        }

        // move up to the node
        let midf = p1f + (p2f - p1f) * frac;
        let mid: Vec3 = [
            p1[0] + frac * (p2[0] - p1[0]),
            p1[1] + frac * (p2[1] - p1[1]),
            p1[2] + frac * (p2[2] - p1[2]),
        ];
        self.recursive_hull_check(tw, node.children[side], p1f, midf, p1, &mid);

        // go past the node
        let midf2 = p1f + (p2f - p1f) * frac2;
        let mid2: Vec3 = [
            p1[0] + frac2 * (p2[0] - p1[0]),
            p1[1] + frac2 * (p2[1] - p1[1]),
            p1[2] + frac2 * (p2[2] - p1[2]),
        ];
        self.recursive_hull_check(tw, node.children[side ^ 1], midf2, p2f, &mid2, p2);
    }

    /// Sweeps the box `mins..maxs` from `start` to `end` through the tree
    /// rooted at `headnode`, stopping at the first brush whose contents
    /// intersect `brushmask`.
    pub fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        brushmask: i32,
    ) -> Trace {
        if !self.valid_headnode(headnode)
            || !vector_is_finite(start)
            || !vector_is_finite(end)
            || !vector_is_finite(mins)
            || !vector_is_finite(maxs)
        {
            return Trace::solid(*start);
        }

        let mut tw = TraceWork {
            start: *start,
            end: *end,
            mins: *mins,
            maxs: *maxs,
            extents: VEC3_ORIGIN,
            ispoint: false,
            contents: brushmask,
            marks: BrushMarks::new(self.brushes.len()),
            trace: Trace::default(),
        };

        // check for position test special case
        if vector_compare(start, end) {
            let c1 = [
                start[0] + mins[0] - 1.0,
                start[1] + mins[1] - 1.0,
                start[2] + mins[2] - 1.0,
            ];
            let c2 = [
                start[0] + maxs[0] + 1.0,
                start[1] + maxs[1] + 1.0,
                start[2] + maxs[2] + 1.0,
            ];

            let (leafs, _topnode) = self.box_leafnums(&c1, &c2, headnode, MAX_POSITION_LEAFS);
            for leafnum in leafs {
                self.leaf_brushes(leafnum, &mut tw, Self::test_box_in_brush);
                if tw.trace.allsolid {
                    break;
                }
            }
            tw.trace.endpos = *start;
            return tw.trace;
        }

        // check for point special case
        if vector_compare(mins, &VEC3_ORIGIN) && vector_compare(maxs, &VEC3_ORIGIN) {
            tw.ispoint = true;
        } else {
            for i in 0..3 {
                tw.extents[i] = (-mins[i]).max(maxs[i]);
            }
        }

        // general sweeping through world
        self.recursive_hull_check(&mut tw, headnode, 0.0, 1.0, start, end);

        let mut trace = tw.trace;
        if trace.fraction == 1.0 {
            trace.endpos = *end;
        } else {
            for i in 0..3 {
                trace.endpos[i] = start[i] + trace.fraction * (end[i] - start[i]);
            }
        }
        trace
    }

    /// Handles offseting and rotation of the end points for moving and
    /// rotating entities.
    #[allow(clippy::too_many_arguments)]
    pub fn transformed_box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        brushmask: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        // subtract origin offset
        let mut start_l = vector_subtract(start, origin);
        let mut end_l = vector_subtract(end, origin);

        // rotate start and end into the models frame of reference
        let rotated = !vector_compare(angles, &VEC3_ORIGIN);
        if rotated {
            start_l = rotate_into(&start_l, angles);
            end_l = rotate_into(&end_l, angles);
        }

        let mut trace = self.box_trace(&start_l, &end_l, mins, maxs, headnode, brushmask);

        if let Some(plane) = trace.plane.as_mut() {
            if rotated {
                let a = [-angles[0], -angles[1], -angles[2]];
                plane.normal = rotate_into(&plane.normal, &a);
            }
            plane.dist += dot_product(&plane.normal, origin);
        }

        for i in 0..3 {
            trace.endpos[i] = start[i] + trace.fraction * (end[i] - start[i]);
        }
        trace
    }
}

fn rotate_into(v: &Vec3, angles: &Vec3) -> Vec3 {
    let (forward, right, up) = angle_vectors(angles);
    [
        dot_product(v, &forward),
        -dot_product(v, &right),
        dot_product(v, &up),
    ]
}

// ============================================================
// Unit tests
// ============================================================
