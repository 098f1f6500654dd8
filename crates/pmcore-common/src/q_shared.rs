// q_shared.rs -- foundational types and functions shared by client and server movement

use serde::{Deserialize, Serialize};

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// angle indexes
pub const PITCH: usize = 0; // up / down
pub const YAW: usize = 1; // left / right
pub const ROLL: usize = 2; // fall over

// ============================================================
// Contents flags
// ============================================================

// lower bits are stronger, and will eat weaker brushes completely
pub const CONTENTS_SOLID: i32 = 1; // an eye is never valid in a solid
pub const CONTENTS_WINDOW: i32 = 2; // translucent, but not watery
pub const CONTENTS_AUX: i32 = 4;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;
pub const CONTENTS_NO_WATERJUMP: i32 = 0x2000;

pub const CONTENTS_AREAPORTAL: i32 = 0x8000;
pub const CONTENTS_PLAYERCLIP: i32 = 0x10000;
pub const CONTENTS_MONSTERCLIP: i32 = 0x20000;

// currents can be added to any other contents, and may be mixed
pub const CONTENTS_CURRENT_0: i32 = 0x40000;
pub const CONTENTS_CURRENT_90: i32 = 0x80000;
pub const CONTENTS_CURRENT_180: i32 = 0x100000;
pub const CONTENTS_CURRENT_270: i32 = 0x200000;
pub const CONTENTS_CURRENT_UP: i32 = 0x400000;
pub const CONTENTS_CURRENT_DOWN: i32 = 0x800000;

pub const CONTENTS_ORIGIN: i32 = 0x1000000; // removed before bsping an entity
pub const CONTENTS_MONSTER: i32 = 0x2000000; // should never be on a brush, only in game
pub const CONTENTS_DEADMONSTER: i32 = 0x4000000;
pub const CONTENTS_DETAIL: i32 = 0x8000000;
pub const CONTENTS_TRANSLUCENT: i32 = 0x10000000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

pub const SURF_LIGHT: i32 = 0x1;
pub const SURF_SLICK: i32 = 0x2; // effects game physics
pub const SURF_SKY: i32 = 0x4;
pub const SURF_WARP: i32 = 0x8;
pub const SURF_NODRAW: i32 = 0x80;

// content masks
pub const MASK_ALL: i32 = -1;
pub const MASK_SOLID: i32 = CONTENTS_SOLID | CONTENTS_WINDOW;
pub const MASK_PLAYERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_WATER: i32 = CONTENTS_WATER | CONTENTS_LAVA | CONTENTS_SLIME;
pub const MASK_CURRENT: i32 = CONTENTS_CURRENT_0
    | CONTENTS_CURRENT_90
    | CONTENTS_CURRENT_180
    | CONTENTS_CURRENT_270
    | CONTENTS_CURRENT_UP
    | CONTENTS_CURRENT_DOWN;

// ============================================================
// Plane
// ============================================================

// plane_t structure
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8, // for fast side tests
    pub signbits: u8,   // signx + (signy<<1) + (signz<<2)
}

// plane types: 0-2 are axial planes, 3-5 are non-axial snapped to the nearest
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANYX: u8 = 3;
pub const PLANE_ANYY: u8 = 4;
pub const PLANE_ANYZ: u8 = 5;

impl CPlane {
    /// Builds a plane and derives its type and signbits from the normal.
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal),
            signbits: sign_bits_for_plane(&normal),
        }
    }
}

/// Axial types are only given to positive normals, since the fast paths
/// read `p[type] - dist` directly.
pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 {
        return PLANE_X;
    }
    if normal[1] == 1.0 {
        return PLANE_Y;
    }
    if normal[2] == 1.0 {
        return PLANE_Z;
    }

    let ax = normal[0].abs();
    let ay = normal[1].abs();
    let az = normal[2].abs();
    if ax >= ay && ax >= az {
        PLANE_ANYX
    } else if ay >= ax && ay >= az {
        PLANE_ANYY
    } else {
        PLANE_ANYZ
    }
}

pub fn sign_bits_for_plane(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for (j, n) in normal.iter().enumerate() {
        if *n < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

// ============================================================
// Trace
// ============================================================

/// Result of sweeping a box through the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub allsolid: bool,   // if true, plane is not valid
    pub startsolid: bool, // if true, the initial point was in a solid area
    pub fraction: f32,    // time completed, 1.0 = didn't hit anything
    pub endpos: Vec3,     // final position
    pub plane: Option<CPlane>, // surface normal at impact
    pub surface_flags: i32,
    pub contents: i32, // contents on other side of surface hit
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: VEC3_ORIGIN,
            plane: None,
            surface_flags: 0,
            contents: 0,
        }
    }
}

impl Trace {
    /// A trace that moved the whole way.
    pub fn clear(end: Vec3) -> Self {
        Self {
            endpos: end,
            ..Self::default()
        }
    }

    /// The degenerate "solid everywhere" result.
    pub fn solid(start: Vec3) -> Self {
        Self {
            allsolid: true,
            startsolid: true,
            fraction: 0.0,
            endpos: start,
            plane: None,
            surface_flags: 0,
            contents: CONTENTS_SOLID,
        }
    }

    /// Z component of the impact normal, 0 when there is no plane.
    pub fn normal_z(&self) -> f32 {
        self.plane.map_or(0.0, |p| p.normal[2])
    }
}

// ============================================================
// Player movement types
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PmType {
    #[default]
    Normal,
    NoClip,
    Dead,
    Freeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum WaterLevel {
    #[default]
    None = 0,
    Feet = 1,
    Waist = 2,
    Under = 3,
}

impl WaterLevel {
    pub fn as_f32(self) -> f32 {
        self as i32 as f32
    }
}

// pmove->pm_flags
pub const PMF_DUCKED: u16 = 1;
pub const PMF_JUMP_HELD: u16 = 2;
pub const PMF_ON_GROUND: u16 = 4;
pub const PMF_TIME_WATERJUMP: u16 = 8; // pm_time is waterjump
pub const PMF_TIME_LAND: u16 = 16; // pm_time is time before rejump
pub const PMF_TIME_TELEPORT: u16 = 32; // pm_time is non-moving time
pub const PMF_NO_PREDICTION: u16 = 64; // temporarily disables prediction (used for grappling hook)
pub const PMF_ON_LADDER: u16 = 128;

pub const PMF_ALL_TIMES: u16 = PMF_TIME_WATERJUMP | PMF_TIME_LAND | PMF_TIME_TELEPORT;

#[inline]
pub fn has_pm_flag(flags: u16, flag: u16) -> bool {
    flags & flag != 0
}

#[inline]
pub fn add_pm_flag(flags: u16, flag: u16) -> u16 {
    flags | flag
}

#[inline]
pub fn remove_pm_flag(flags: u16, flag: u16) -> u16 {
    flags & !flag
}

bitflags::bitflags! {
    /// usercmd_t->buttons
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Buttons: u8 {
        const ATTACK = 1;
        const USE    = 2;
        const JUMP   = 4;
        const CROUCH = 8;
        const ANY    = 128; // any key whatsoever
    }
}

/// usercmd_t is sent to the server each client frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UserCmd {
    pub msec: u8,
    pub buttons: Buttons,
    pub angles: Vec3,
    pub forwardmove: i16,
    pub sidemove: i16,
    pub upmove: i16,
    /// Latest server frame the client had seen when it sent this command.
    pub server_frame: Option<u32>,
}

/// The part of the player state that movement reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerMoveState {
    pub pm_type: PmType,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub viewangles: Vec3,
    pub delta_angles: Vec3, // add to command angles to get view direction
    pub pm_flags: u16,
    pub pm_time: u16, // msec
    pub gravity: f32,
    pub waterlevel: WaterLevel,
    pub watertype: i32,
    pub viewheight: f32,
    pub mins: Vec3,
    pub maxs: Vec3,
}

pub const DEFAULT_GRAVITY: f32 = 800.0;

impl Default for PlayerMoveState {
    fn default() -> Self {
        Self {
            pm_type: PmType::Normal,
            origin: VEC3_ORIGIN,
            velocity: VEC3_ORIGIN,
            viewangles: VEC3_ORIGIN,
            delta_angles: VEC3_ORIGIN,
            pm_flags: 0,
            pm_time: 0,
            gravity: DEFAULT_GRAVITY,
            waterlevel: WaterLevel::None,
            watertype: 0,
            viewheight: 22.0,
            mins: [-16.0, -16.0, -24.0],
            maxs: [16.0, 16.0, 32.0],
        }
    }
}

// ============================================================
// MATHLIB -- Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn vector_compare(v1: &Vec3, v2: &Vec3) -> bool {
    v1[0] == v2[0] && v1[1] == v2[1] && v1[2] == v2[2]
}

pub fn vector_is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_length_squared(v: &Vec3) -> f32 {
    dot_product(v, v)
}

pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

pub fn vector_lerp(from: &Vec3, to: &Vec3, frac: f32) -> Vec3 {
    [
        from[0] + (to[0] - from[0]) * frac,
        from[1] + (to[1] - from[1]) * frac,
        from[2] + (to[2] - from[2]) * frac,
    ]
}

// ============================================================
// Angle functions
// ============================================================

/// Returns (forward, right, up) for the given view angles.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let angle_yaw = angles[YAW].to_radians();
    let sy = angle_yaw.sin();
    let cy = angle_yaw.cos();

    let angle_pitch = angles[PITCH].to_radians();
    let sp = angle_pitch.sin();
    let cp = angle_pitch.cos();

    let angle_roll = angles[ROLL].to_radians();
    let sr = angle_roll.sin();
    let cr = angle_roll.cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + -cr * -sy,
        -sr * sp * sy + -cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + -sr * -sy,
        cr * sp * sy + -sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

/// Wraps an angle into [0, 360).
pub fn angle_mod(a: f32) -> f32 {
    let r = a.rem_euclid(360.0);
    // rem_euclid can round up to the modulus for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Interpolates along the shortest arc, result wrapped into [0, 360).
pub fn lerp_angle(from: f32, to: f32, frac: f32) -> f32 {
    let mut delta = angle_mod(to - from);
    if delta > 180.0 {
        delta -= 360.0;
    }
    angle_mod(from + delta * frac)
}

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if p.plane_type < 3 {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // general case: the signbits pick the nearest and farthest corners
    let mut near = [0.0f32; 3];
    let mut far = [0.0f32; 3];
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            far[i] = emins[i];
            near[i] = emaxs[i];
        } else {
            far[i] = emaxs[i];
            near[i] = emins[i];
        }
    }
    let dist1 = dot_product(&p.normal, &far);
    let dist2 = dot_product(&p.normal, &near);

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Unit tests
// ============================================================
