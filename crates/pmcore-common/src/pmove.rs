// pmove.rs -- Player movement code, shared by the server and client prediction

use std::sync::Arc;

use rayon::prelude::*;

use crate::cmodel::CollisionModel;
use crate::pm_config::*;
use crate::q_shared::{
    add_pm_flag, angle_mod, angle_vectors, cross_product, dot_product, has_pm_flag, remove_pm_flag,
    vector_length, vector_ma, vector_normalize, vector_scale, Buttons, PlayerMoveState,
    PmType, Trace, UserCmd, Vec3, WaterLevel, CONTENTS_CURRENT_0, CONTENTS_CURRENT_180,
    CONTENTS_CURRENT_270, CONTENTS_CURRENT_90, CONTENTS_CURRENT_DOWN, CONTENTS_CURRENT_UP,
    CONTENTS_LADDER, CONTENTS_NO_WATERJUMP, CONTENTS_SLIME, CONTENTS_WATER, MASK_CURRENT,
    MASK_PLAYERSOLID, MASK_WATER, PITCH, PMF_ALL_TIMES, PMF_DUCKED, PMF_JUMP_HELD, PMF_ON_GROUND,
    PMF_ON_LADDER, PMF_TIME_LAND, PMF_TIME_TELEPORT, PMF_TIME_WATERJUMP, SURF_SLICK, VEC3_ORIGIN,
    YAW,
};
use crate::stuck::{fix_stuck_object, FixStuckResult};

// ============================================================
// Pmove local state -- rebuilt for each pmove
// ============================================================

#[derive(Clone, Default)]
struct PmLocal {
    origin: Vec3,
    velocity: Vec3,

    forward: Vec3,
    right: Vec3,
    frametime: f32,

    on_ground: bool,
    groundsurface_flags: i32,
    groundcontents: i32,

    previous_origin: Vec3,
}

// ============================================================
// Callbacks trait
// ============================================================

/// The world queries movement needs: a box trace and a point contents probe.
/// Entity filtering and the content mask are up to the implementation.
pub trait PmoveCallbacks {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace;
    fn pointcontents(&self, point: &Vec3) -> i32;
}

impl<T: PmoveCallbacks + ?Sized> PmoveCallbacks for &T {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        (**self).trace(start, mins, maxs, end)
    }

    fn pointcontents(&self, point: &Vec3) -> i32 {
        (**self).pointcontents(point)
    }
}

/// Callbacks that move players through the world model only.
#[derive(Debug, Clone)]
pub struct WorldCallbacks {
    model: Arc<CollisionModel>,
    headnode: i32,
    mask: i32,
}

impl WorldCallbacks {
    pub fn new(model: Arc<CollisionModel>) -> Self {
        let headnode = model.world_headnode();
        Self {
            model,
            headnode,
            mask: MASK_PLAYERSOLID,
        }
    }

    pub fn with_mask(mut self, mask: i32) -> Self {
        self.mask = mask;
        self
    }

    pub fn model(&self) -> &Arc<CollisionModel> {
        &self.model
    }
}

impl PmoveCallbacks for WorldCallbacks {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        self.model.box_trace(start, end, mins, maxs, self.headnode, self.mask)
    }

    fn pointcontents(&self, point: &Vec3) -> i32 {
        self.model.point_contents(point, self.headnode)
    }
}

// ============================================================
// Slide moves
// ============================================================

/// Slide off of the impacting surface.
fn pm_clip_velocity(inv: &Vec3, normal: &Vec3, overbounce: f32) -> Vec3 {
    let backoff = dot_product(inv, normal) * overbounce;
    let mut out = [0.0f32; 3];
    for i in 0..3 {
        out[i] = inv[i] - normal[i] * backoff;
        if out[i] > -STOP_EPSILON && out[i] < STOP_EPSILON {
            out[i] = 0.0;
        }
    }

    // a velocity already leaving the plane is overshot by the overbounce,
    // and the snap above can tip a slanted result back in
    let into = dot_product(&out, normal);
    if into < 0.0 {
        out = vector_ma(&out, -into, normal);
    }
    out
}

/// Moves `origin` along `velocity` for `frametime`, clipping against
/// whatever the trace hits. When `has_time` is set the incoming velocity is
/// kept, as a timed move (water jump, landing) must not lose speed.
fn slide_move<C: PmoveCallbacks + ?Sized>(
    cb: &C,
    origin: &mut Vec3,
    velocity: &mut Vec3,
    frametime: f32,
    mins: &Vec3,
    maxs: &Vec3,
    has_time: bool,
) {
    let primal_velocity = *velocity;
    let mut numplanes: usize = 0;
    let mut planes = [[0.0f32; 3]; MAX_CLIP_PLANES];

    let mut time_left = frametime;

    for _bumpcount in 0..MAX_BUMPS {
        let end = vector_ma(origin, time_left, velocity);
        let trace = cb.trace(origin, mins, maxs, &end);

        if trace.allsolid {
            // entity is trapped in another solid
            velocity[2] = 0.0;
            return;
        }

        if trace.fraction > 0.0 {
            // actually covered some distance
            *origin = trace.endpos;
            numplanes = 0;
        }

        if trace.fraction == 1.0 {
            break; // moved the entire distance
        }

        time_left -= time_left * trace.fraction;

        // slide along this plane
        if numplanes >= MAX_CLIP_PLANES {
            // this shouldn't really happen
            *velocity = VEC3_ORIGIN;
            break;
        }

        planes[numplanes] = trace.plane.map_or(VEC3_ORIGIN, |p| p.normal);
        numplanes += 1;

        // modify velocity so it parallels all of the clip planes
        let mut found = false;
        for i in 0..numplanes {
            *velocity = pm_clip_velocity(velocity, &planes[i], OVERBOUNCE);
            let ok = (0..numplanes).all(|j| j == i || dot_product(velocity, &planes[j]) >= 0.0);
            if ok {
                found = true;
                break;
            }
        }

        if !found {
            // go along the crease
            if numplanes != 2 {
                *velocity = VEC3_ORIGIN;
                break;
            }
            let dir = cross_product(&planes[0], &planes[1]);
            let d = dot_product(&dir, velocity);
            *velocity = vector_scale(&dir, d);
        }

        // if velocity is against the original velocity, stop dead
        // to avoid tiny occilations in sloping corners
        if dot_product(velocity, &primal_velocity) <= 0.0 {
            *velocity = VEC3_ORIGIN;
            break;
        }
    }

    if has_time {
        *velocity = primal_velocity;
    }
}

/// Slide move that also tries to climb anything up to `STEPSIZE` high,
/// keeping whichever attempt covered more horizontal ground.
pub fn step_slide_move<C: PmoveCallbacks + ?Sized>(
    cb: &C,
    origin: &mut Vec3,
    velocity: &mut Vec3,
    frametime: f32,
    mins: &Vec3,
    maxs: &Vec3,
    has_time: bool,
) {
    let start_o = *origin;
    let start_v = *velocity;

    slide_move(cb, origin, velocity, frametime, mins, maxs, has_time);

    let down_o = *origin;
    let down_v = *velocity;

    let mut up = start_o;
    up[2] += STEPSIZE;

    let trace = cb.trace(&up, mins, maxs, &up);
    if trace.allsolid {
        return; // can't step up
    }

    // try sliding above
    *origin = up;
    *velocity = start_v;

    slide_move(cb, origin, velocity, frametime, mins, maxs, has_time);

    // push down the final amount
    let mut down = *origin;
    down[2] -= STEPSIZE;
    let trace = cb.trace(origin, mins, maxs, &down);
    if !trace.allsolid {
        *origin = trace.endpos;
    }

    let up = *origin;

    // decide which one went farther
    let down_dist = (down_o[0] - start_o[0]) * (down_o[0] - start_o[0])
        + (down_o[1] - start_o[1]) * (down_o[1] - start_o[1]);
    let up_dist = (up[0] - start_o[0]) * (up[0] - start_o[0])
        + (up[1] - start_o[1]) * (up[1] - start_o[1]);

    if down_dist > up_dist || trace.normal_z() < MIN_STEP_NORMAL {
        *origin = down_o;
        *velocity = down_v;
        return;
    }

    // if we were walking along a plane, then we need to copy the Z over
    velocity[2] = down_v[2];
}

/// Water level and type for a box at `origin`, sampled at the feet, half way
/// to the eyes, and at the eyes.
fn water_level_at<C: PmoveCallbacks + ?Sized>(
    cb: &C,
    origin: &Vec3,
    mins: &Vec3,
    viewheight: f32,
) -> (WaterLevel, i32) {
    let sample2 = (viewheight - mins[2]) as i32;
    let sample1 = sample2 / 2;

    let mut point = [origin[0], origin[1], origin[2] + mins[2] + 1.0];
    let cont = cb.pointcontents(&point);
    if cont & MASK_WATER == 0 {
        return (WaterLevel::None, 0);
    }

    let watertype = cont;
    point[2] = origin[2] + mins[2] + sample1 as f32;
    if cb.pointcontents(&point) & MASK_WATER == 0 {
        return (WaterLevel::Feet, watertype);
    }

    point[2] = origin[2] + mins[2] + sample2 as f32;
    if cb.pointcontents(&point) & MASK_WATER == 0 {
        return (WaterLevel::Waist, watertype);
    }
    (WaterLevel::Under, watertype)
}

fn current_vector(contents: i32) -> Vec3 {
    let mut v: Vec3 = [0.0; 3];
    if contents & CONTENTS_CURRENT_0 != 0 {
        v[0] += 1.0;
    }
    if contents & CONTENTS_CURRENT_90 != 0 {
        v[1] += 1.0;
    }
    if contents & CONTENTS_CURRENT_180 != 0 {
        v[0] -= 1.0;
    }
    if contents & CONTENTS_CURRENT_270 != 0 {
        v[1] -= 1.0;
    }
    if contents & CONTENTS_CURRENT_UP != 0 {
        v[2] += 1.0;
    }
    if contents & CONTENTS_CURRENT_DOWN != 0 {
        v[2] -= 1.0;
    }
    v
}

// ============================================================
// Pmove context -- holds all state for one pmove() call
// ============================================================

struct PmoveContext<'a, C: PmoveCallbacks + ?Sized> {
    ps: PlayerMoveState,
    cmd: UserCmd,
    settings: &'a PmoveSettings,
    pml: PmLocal,
    cb: &'a C,
}

impl<'a, C: PmoveCallbacks + ?Sized> PmoveContext<'a, C> {
    fn wants_jump(&self) -> bool {
        self.cmd.upmove >= 10 || self.cmd.buttons.contains(Buttons::JUMP)
    }

    fn wants_crouch(&self) -> bool {
        self.cmd.upmove < 0 || self.cmd.buttons.contains(Buttons::CROUCH)
    }

    fn on_ladder(&self) -> bool {
        has_pm_flag(self.ps.pm_flags, PMF_ON_LADDER)
    }

    fn clear_timers(&mut self) {
        self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_ALL_TIMES);
        self.ps.pm_time = 0;
    }

    fn step_slide_move(&mut self) {
        let has_time = self.ps.pm_time != 0;
        step_slide_move(
            self.cb,
            &mut self.pml.origin,
            &mut self.pml.velocity,
            self.pml.frametime,
            &self.ps.mins,
            &self.ps.maxs,
            has_time,
        );
    }

    // --------------------------------------------------------
    // PM_Friction
    // --------------------------------------------------------
    fn friction(&mut self) {
        let speed = vector_length(&self.pml.velocity);
        if speed < 1.0 {
            self.pml.velocity[0] = 0.0;
            self.pml.velocity[1] = 0.0;
            return;
        }

        let mut drop = 0.0f32;

        // apply ground friction
        let slick = self.settings.ground_is_slick || self.pml.groundsurface_flags & SURF_SLICK != 0;
        if (self.pml.on_ground && !slick) || self.on_ladder() {
            let control = speed.max(self.settings.stop_speed);
            drop += control * self.settings.friction * self.pml.frametime;
        }

        // apply water friction
        if self.ps.waterlevel != WaterLevel::None && !self.on_ladder() {
            drop += speed
                * self.settings.water_friction
                * self.ps.waterlevel.as_f32()
                * self.pml.frametime;
        }

        // scale the velocity
        let newspeed = (speed - drop).max(0.0) / speed;
        self.pml.velocity = vector_scale(&self.pml.velocity, newspeed);
    }

    // --------------------------------------------------------
    // PM_Accelerate
    // --------------------------------------------------------
    fn accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let currentspeed = dot_product(&self.pml.velocity, wishdir);
        let addspeed = wishspeed - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * self.pml.frametime * wishspeed).min(addspeed);
        self.pml.velocity = vector_ma(&self.pml.velocity, accelspeed, wishdir);
    }

    // --------------------------------------------------------
    // PM_AirAccelerate
    // --------------------------------------------------------
    fn air_accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let wishspd = wishspeed.min(30.0);
        let currentspeed = dot_product(&self.pml.velocity, wishdir);
        let addspeed = wishspd - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * wishspeed * self.pml.frametime).min(addspeed);
        self.pml.velocity = vector_ma(&self.pml.velocity, accelspeed, wishdir);
    }

    /// Climbing input on a ladder. Off the ground, strafing slides along the
    /// ladder face and any other sideways drift is held to a crawl.
    fn add_ladder_velocity(&self, wishvel: &mut Vec3) {
        let fm = self.cmd.forwardmove as f32;

        if self.cmd.buttons.intersects(Buttons::JUMP | Buttons::CROUCH) {
            let climb = if self.ps.waterlevel >= WaterLevel::Waist {
                self.settings.max_speed
            } else {
                LADDER_CLIMB_SPEED
            };
            wishvel[2] = if self.cmd.buttons.contains(Buttons::JUMP) { climb } else { -climb };
        } else if self.cmd.forwardmove != 0 {
            let speed = fm.clamp(-LADDER_CLIMB_SPEED, LADDER_CLIMB_SPEED);
            if self.cmd.forwardmove > 0 {
                // looking up the ladder climbs it, looking down descends
                let pitch = if self.ps.viewangles[PITCH] > 180.0 {
                    self.ps.viewangles[PITCH] - 360.0
                } else {
                    self.ps.viewangles[PITCH]
                };
                wishvel[2] = if pitch < LADDER_ASCEND_PITCH { speed } else { -speed };
            } else {
                if !self.pml.on_ground {
                    wishvel[0] = 0.0;
                    wishvel[1] = 0.0;
                }
                wishvel[2] = speed;
            }
        } else {
            wishvel[2] = 0.0;
        }

        if self.pml.on_ground {
            return;
        }

        if self.cmd.sidemove == 0 {
            wishvel[0] = wishvel[0].clamp(-LADDER_MAX_SIDE_SPEED, LADDER_MAX_SIDE_SPEED);
            wishvel[1] = wishvel[1].clamp(-LADDER_MAX_SIDE_SPEED, LADDER_MAX_SIDE_SPEED);
            return;
        }

        let mut side_speed =
            (self.cmd.sidemove as f32).clamp(-LADDER_STRAFE_SPEED, LADDER_STRAFE_SPEED);
        if self.ps.waterlevel < WaterLevel::Waist {
            side_speed *= self.settings.ladder_mod;
        }

        let mut flatforward: Vec3 = [self.pml.forward[0], self.pml.forward[1], 0.0];
        if vector_normalize(&mut flatforward) == 0.0 {
            return;
        }

        let spot = vector_ma(&self.pml.origin, LADDER_PROBE_DIST, &flatforward);
        let trace = self.cb.trace(&self.pml.origin, &self.ps.mins, &self.ps.maxs, &spot);
        if trace.fraction == 1.0 || trace.allsolid || trace.contents & CONTENTS_LADDER == 0 {
            return;
        }
        if let Some(plane) = trace.plane {
            // strafe along the ladder face
            let right = cross_product(&plane.normal, &[0.0, 0.0, 1.0]);
            wishvel[0] = -right[0] * side_speed;
            wishvel[1] = -right[1] * side_speed;
        }
    }

    // --------------------------------------------------------
    // PM_AddCurrents
    // --------------------------------------------------------
    fn add_currents(&self, wishvel: &mut Vec3) {
        // account for ladders
        if self.on_ladder() {
            self.add_ladder_velocity(wishvel);
        }

        // add water currents
        if self.ps.watertype & MASK_CURRENT != 0 {
            let v = current_vector(self.ps.watertype);
            let mut s = self.settings.water_speed;
            if self.ps.waterlevel == WaterLevel::Feet && self.pml.on_ground {
                s /= 2.0;
            }
            *wishvel = vector_ma(wishvel, s, &v);
        }

        // add conveyor belt velocities
        if self.pml.on_ground {
            let v = current_vector(self.pml.groundcontents);
            *wishvel = vector_ma(wishvel, CONVEYOR_SPEED, &v);
        }
    }

    // --------------------------------------------------------
    // PM_WaterMove
    // --------------------------------------------------------
    fn water_move(&mut self) {
        let fm = self.cmd.forwardmove as f32;
        let sm = self.cmd.sidemove as f32;

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.pml.forward[i] * fm + self.pml.right[i] * sm;
        }

        let no_intent = self.cmd.forwardmove == 0
            && self.cmd.sidemove == 0
            && self.cmd.upmove == 0
            && !self.cmd.buttons.intersects(Buttons::JUMP | Buttons::CROUCH);
        if no_intent {
            wishvel[2] -= WATER_DRIFT_SPEED; // drift towards bottom
        } else if self.cmd.upmove != 0 {
            wishvel[2] += self.cmd.upmove as f32;
        } else if self.wants_jump() {
            wishvel[2] += self.settings.water_speed * 0.5;
        } else if self.wants_crouch() {
            wishvel[2] -= self.settings.water_speed * 0.5;
        }

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        let maxspeed = self.settings.max_speed;
        if wishspeed > maxspeed {
            wishspeed = maxspeed;
        }
        wishspeed *= 0.5;

        if has_pm_flag(self.ps.pm_flags, PMF_DUCKED) && wishspeed > self.settings.duck_speed {
            wishspeed = self.settings.duck_speed;
        }

        self.accelerate(&wishdir, wishspeed, self.settings.water_accelerate);

        self.step_slide_move();
    }

    // --------------------------------------------------------
    // PM_AirMove
    // --------------------------------------------------------
    fn air_move(&mut self) {
        let fmove = self.cmd.forwardmove as f32;
        let smove = self.cmd.sidemove as f32;

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..2 {
            wishvel[i] = self.pml.forward[i] * fmove + self.pml.right[i] * smove;
        }
        wishvel[2] = 0.0;

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        // clamp to server defined max speed
        let maxspeed = if has_pm_flag(self.ps.pm_flags, PMF_DUCKED) {
            self.settings.duck_speed
        } else {
            self.settings.max_speed
        };
        if wishspeed > maxspeed {
            wishvel = vector_scale(&wishvel, maxspeed / wishspeed);
            wishspeed = maxspeed;
        }

        let gravity = self.ps.gravity;
        let frametime = self.pml.frametime;

        if self.on_ladder() {
            self.accelerate(&wishdir, wishspeed, self.settings.accelerate);
            if wishvel[2] == 0.0 {
                if self.pml.velocity[2] > 0.0 {
                    self.pml.velocity[2] = (self.pml.velocity[2] - gravity * frametime).max(0.0);
                } else {
                    self.pml.velocity[2] = (self.pml.velocity[2] + gravity * frametime).min(0.0);
                }
            }
            self.step_slide_move();
        } else if self.pml.on_ground {
            // walking on ground
            self.pml.velocity[2] = 0.0;
            self.accelerate(&wishdir, wishspeed, self.settings.accelerate);

            // fix for negative trigger_gravity fields
            if gravity > 0.0 {
                self.pml.velocity[2] = 0.0;
            } else {
                self.pml.velocity[2] -= gravity * frametime;
            }

            if self.pml.velocity[0] == 0.0 && self.pml.velocity[1] == 0.0 {
                return;
            }
            self.step_slide_move();
        } else {
            // not on ground, so little effect on velocity
            if self.settings.air_accelerate != 0.0 {
                self.air_accelerate(&wishdir, wishspeed, self.settings.air_accelerate);
            } else {
                self.accelerate(&wishdir, wishspeed, 1.0);
            }
            // add gravity
            self.pml.velocity[2] -= gravity * frametime;
            self.step_slide_move();
        }
    }

    // --------------------------------------------------------
    // PM_CatagorizePosition
    // --------------------------------------------------------
    fn categorize_position(&mut self) {
        // see if standing on something solid
        let mut point = self.pml.origin;
        point[2] -= GROUND_PROBE_DIST;

        if self.pml.velocity[2] > GROUND_LEAVE_SPEED {
            self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_ON_GROUND);
            self.pml.on_ground = false;
        } else {
            let trace = self.cb.trace(&self.pml.origin, &self.ps.mins, &self.ps.maxs, &point);
            self.pml.groundsurface_flags = trace.surface_flags;
            self.pml.groundcontents = trace.contents;

            let hit = trace.fraction < 1.0 || trace.startsolid;
            if !hit || (trace.normal_z() < MIN_STEP_NORMAL && !trace.startsolid) {
                self.pml.on_ground = false;
                self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_ON_GROUND);
            } else {
                self.pml.on_ground = true;

                // hitting solid ground will end a waterjump
                if has_pm_flag(self.ps.pm_flags, PMF_TIME_WATERJUMP) {
                    self.clear_timers();
                }

                if !has_pm_flag(self.ps.pm_flags, PMF_ON_GROUND) {
                    // just hit the ground
                    self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_ON_GROUND);
                    // don't do landing time if we were just going down a slope
                    if self.pml.velocity[2] < HARD_LANDING_SPEED {
                        self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_TIME_LAND);
                        self.ps.pm_time = if self.pml.velocity[2] < VERY_HARD_LANDING_SPEED {
                            LAND_TIME_HARD
                        } else {
                            LAND_TIME_SOFT
                        };
                    }
                }
            }
        }

        // get waterlevel, accounting for ducking
        let (level, watertype) =
            water_level_at(self.cb, &self.pml.origin, &self.ps.mins, self.ps.viewheight);
        self.ps.waterlevel = level;
        self.ps.watertype = watertype;
    }

    // --------------------------------------------------------
    // PM_CheckJump
    // --------------------------------------------------------
    fn check_jump(&mut self) {
        if has_pm_flag(self.ps.pm_flags, PMF_TIME_LAND) {
            // hasn't been long enough since landing to jump again
            return;
        }

        if !self.wants_jump() {
            // not holding jump
            self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_JUMP_HELD);
            return;
        }

        // must wait for jump to be released
        if has_pm_flag(self.ps.pm_flags, PMF_JUMP_HELD) {
            return;
        }

        if self.ps.pm_type == PmType::Dead {
            return;
        }

        if self.ps.waterlevel >= WaterLevel::Waist {
            // swimming, not jumping
            self.pml.on_ground = false;

            if self.pml.velocity[2] <= -300.0 {
                return;
            }

            self.pml.velocity[2] = if self.ps.watertype == CONTENTS_WATER {
                100.0
            } else if self.ps.watertype == CONTENTS_SLIME {
                80.0
            } else {
                50.0
            };
            return;
        }

        if !self.pml.on_ground {
            return; // in air, so no effect
        }

        self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_JUMP_HELD);
        self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_ON_GROUND);
        self.pml.on_ground = false;
        self.pml.velocity[2] = (self.pml.velocity[2] + JUMP_SPEED).max(JUMP_SPEED);
    }

    // --------------------------------------------------------
    // PM_CheckSpecialMovement
    // --------------------------------------------------------
    fn check_special_movement(&mut self) {
        if self.ps.pm_time != 0 {
            return;
        }

        self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_ON_LADDER);

        // check for ladder
        let mut flatforward: Vec3 = [self.pml.forward[0], self.pml.forward[1], 0.0];
        let has_forward = vector_normalize(&mut flatforward) > 0.0;

        if self.ps.waterlevel < WaterLevel::Waist && has_forward {
            let spot = vector_ma(&self.pml.origin, LADDER_PROBE_DIST, &flatforward);
            let trace = self.cb.trace(&self.pml.origin, &self.ps.mins, &self.ps.maxs, &spot);
            if trace.fraction < 1.0 && trace.contents & CONTENTS_LADDER != 0 {
                self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_ON_LADDER);
            }
        }

        // check for water jump
        let gravity = self.ps.gravity;
        if gravity == 0.0 {
            return;
        }
        if !self.wants_jump() && self.cmd.forwardmove <= 0 {
            return;
        }
        if self.ps.waterlevel != WaterLevel::Waist {
            return;
        }
        if self.ps.watertype & CONTENTS_NO_WATERJUMP != 0 {
            return;
        }
        if !has_forward {
            return;
        }

        // there must be a wall in front of us
        let spot = vector_ma(&self.pml.origin, WATERJUMP_PROBE_DIST, &flatforward);
        let trace = self.cb.trace(&self.pml.origin, &self.ps.mins, &self.ps.maxs, &spot);
        if trace.fraction == 1.0 || trace.plane.is_none() || trace.normal_z() >= MIN_STEP_NORMAL {
            return;
        }

        // simulate the jump and see if we end up somewhere we can stand
        let jump_velocity = [
            flatforward[0] * WATERJUMP_FORWARD_SPEED,
            flatforward[1] * WATERJUMP_FORWARD_SPEED,
            WATERJUMP_UP_SPEED,
        ];
        let mut sim_origin = self.pml.origin;
        let mut sim_velocity = jump_velocity;
        let mut has_time = true;
        let steps = ((10.0 * WATERJUMP_REFERENCE_GRAVITY / gravity).floor().max(0.0) as usize)
            .min(WATERJUMP_MAX_STEPS);

        for _ in 0..steps {
            sim_velocity[2] -= gravity * WATERJUMP_SIM_STEP;
            if sim_velocity[2] < 0.0 {
                has_time = false;
            }
            step_slide_move(
                self.cb,
                &mut sim_origin,
                &mut sim_velocity,
                WATERJUMP_SIM_STEP,
                &self.ps.mins,
                &self.ps.maxs,
                has_time,
            );
        }

        // snap down to see if we landed on something
        let mut down = sim_origin;
        down[2] -= WATERJUMP_DOWN_PROBE;
        let trace = self.cb.trace(&sim_origin, &self.ps.mins, &self.ps.maxs, &down);

        if trace.fraction == 1.0
            || trace.plane.is_none()
            || trace.normal_z() < MIN_STEP_NORMAL
            || trace.endpos[2] < self.pml.origin[2]
        {
            return;
        }

        // a plain step up is walking, not a water jump
        if self.pml.on_ground && (self.pml.origin[2] - trace.endpos[2]).abs() <= STEPSIZE {
            return;
        }

        let (landing, _) =
            water_level_at(self.cb, &trace.endpos, &self.ps.mins, self.ps.viewheight);
        if landing >= WaterLevel::Waist {
            return;
        }

        // jump out of water
        self.pml.velocity = jump_velocity;
        self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_TIME_WATERJUMP);
        self.ps.pm_time = WATERJUMP_TIME;
        log::debug!("water jump from {:?}", self.pml.origin);
    }

    // --------------------------------------------------------
    // PM_FlyMove
    // --------------------------------------------------------
    fn fly_move(&mut self) {
        self.ps.viewheight = 22.0;

        // friction
        let speed = vector_length(&self.pml.velocity);
        if speed < 1.0 {
            self.pml.velocity = VEC3_ORIGIN;
        } else {
            let friction = self.settings.friction * 1.5; // extra friction
            let control = speed.max(self.settings.stop_speed);
            let drop = control * friction * self.pml.frametime;
            let newspeed = (speed - drop).max(0.0) / speed;
            self.pml.velocity = vector_scale(&self.pml.velocity, newspeed);
        }

        // accelerate
        let fmove = self.cmd.forwardmove as f32;
        let smove = self.cmd.sidemove as f32;

        vector_normalize(&mut self.pml.forward);
        vector_normalize(&mut self.pml.right);

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.pml.forward[i] * fmove + self.pml.right[i] * smove;
        }
        wishvel[2] += self.cmd.upmove as f32;

        let mut wishdir = wishvel;
        let wishspeed = vector_normalize(&mut wishdir).min(self.settings.max_speed);

        self.accelerate(&wishdir, wishspeed, self.settings.accelerate);

        // move
        self.pml.origin = vector_ma(&self.pml.origin, self.pml.frametime, &self.pml.velocity);
    }

    // --------------------------------------------------------
    // PM_CheckDuck
    // --------------------------------------------------------
    fn check_duck(&mut self) {
        self.ps.mins = [-16.0, -16.0, -24.0];
        self.ps.maxs[0] = 16.0;
        self.ps.maxs[1] = 16.0;

        if self.ps.pm_type == PmType::Dead {
            self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_DUCKED);
        } else if self.wants_crouch() && has_pm_flag(self.ps.pm_flags, PMF_ON_GROUND) {
            // duck
            self.ps.pm_flags = add_pm_flag(self.ps.pm_flags, PMF_DUCKED);
        } else if has_pm_flag(self.ps.pm_flags, PMF_DUCKED) {
            // try to stand up
            self.ps.maxs[2] = 32.0;
            let trace =
                self.cb.trace(&self.pml.origin, &self.ps.mins, &self.ps.maxs, &self.pml.origin);
            if !trace.allsolid {
                self.ps.pm_flags = remove_pm_flag(self.ps.pm_flags, PMF_DUCKED);
            }
        }

        if has_pm_flag(self.ps.pm_flags, PMF_DUCKED) {
            self.ps.maxs[2] = 4.0;
            self.ps.viewheight = -2.0;
        } else {
            self.ps.maxs[2] = 32.0;
            self.ps.viewheight = 22.0;
        }
    }

    // --------------------------------------------------------
    // PM_DeadMove
    // --------------------------------------------------------
    fn dead_move(&mut self) {
        if !self.pml.on_ground {
            return;
        }

        // extra friction
        let forward = vector_length(&self.pml.velocity) - 20.0;
        if forward <= 0.0 {
            self.pml.velocity = VEC3_ORIGIN;
        } else {
            vector_normalize(&mut self.pml.velocity);
            self.pml.velocity = vector_scale(&self.pml.velocity, forward);
        }
    }

    // --------------------------------------------------------
    // PM_ClampAngles
    // --------------------------------------------------------
    fn clamp_angles(&mut self) {
        if has_pm_flag(self.ps.pm_flags, PMF_TIME_TELEPORT) {
            self.ps.viewangles = [
                0.0,
                angle_mod(self.cmd.angles[YAW] + self.ps.delta_angles[YAW]),
                0.0,
            ];
        } else {
            // circularly clamp the angles with deltas
            for i in 0..3 {
                self.ps.viewangles[i] = angle_mod(self.cmd.angles[i] + self.ps.delta_angles[i]);
            }

            // don't let the player look up or down more than 90 degrees
            let pitch = &mut self.ps.viewangles[PITCH];
            if *pitch > 89.0 && *pitch < 180.0 {
                *pitch = 89.0;
            } else if *pitch < 271.0 && *pitch >= 180.0 {
                *pitch = 271.0;
            }
        }
        let (forward, right, _) = angle_vectors(&self.ps.viewangles);
        self.pml.forward = forward;
        self.pml.right = right;
    }

    /// Runs the final position through the stuck resolver.
    fn check_stuck(&mut self) {
        let (result, origin) = fix_stuck_object(
            &self.pml.origin,
            &self.ps.mins,
            &self.ps.maxs,
            |start, mins, maxs, end| self.cb.trace(start, mins, maxs, end),
        );
        match result {
            FixStuckResult::GoodPosition => {}
            FixStuckResult::Fixed => {
                log::debug!("pmove: unstuck {:?} -> {:?}", self.pml.origin, origin);
                self.pml.origin = origin;
            }
            FixStuckResult::NoGoodPosition => {
                log::debug!("pmove: stuck at {:?}, reverting", self.pml.origin);
                self.pml.origin = self.pml.previous_origin;
            }
        }
    }

    // --------------------------------------------------------
    // Main pmove execution
    // --------------------------------------------------------
    fn execute(&mut self) {
        self.pml.origin = self.ps.origin;
        self.pml.velocity = self.ps.velocity;

        // save old org in case we get stuck
        self.pml.previous_origin = self.ps.origin;

        let msec = self.cmd.msec.min(MAX_CMD_MSEC);
        self.pml.frametime = msec as f32 / 1000.0;

        self.clamp_angles();

        if self.ps.pm_type == PmType::NoClip {
            self.fly_move();
            return;
        }

        if self.ps.pm_type == PmType::Dead {
            self.cmd.forwardmove = 0;
            self.cmd.sidemove = 0;
            self.cmd.upmove = 0;
            self.cmd.buttons.remove(Buttons::JUMP | Buttons::CROUCH);
        }

        if self.ps.pm_type == PmType::Freeze {
            return; // no movement at all
        }

        // set mins, maxs, and viewheight
        self.check_duck();

        // set groundentity, watertype, and waterlevel
        self.categorize_position();

        if self.ps.pm_type == PmType::Dead {
            self.dead_move();
        }

        self.check_special_movement();

        // drop timing counter
        if self.ps.pm_time != 0 {
            let msec = u16::from(msec).max(1);
            if msec >= self.ps.pm_time {
                self.clear_timers();
            } else {
                self.ps.pm_time -= msec;
            }
        }

        if has_pm_flag(self.ps.pm_flags, PMF_TIME_TELEPORT) {
            // teleport pause stays exactly in place
        } else if has_pm_flag(self.ps.pm_flags, PMF_TIME_WATERJUMP) {
            // waterjump has no control, but falls
            self.pml.velocity[2] -= self.ps.gravity * self.pml.frametime;
            if self.pml.velocity[2] < 0.0 {
                // cancel as soon as we are falling down again
                self.clear_timers();
            }

            self.step_slide_move();
        } else {
            self.check_jump();

            self.friction();

            if self.ps.waterlevel >= WaterLevel::Waist {
                self.water_move();
            } else {
                let mut angles = self.ps.viewangles;
                if angles[PITCH] > 180.0 {
                    angles[PITCH] -= 360.0;
                }
                angles[PITCH] /= 3.0;

                let (forward, right, _) = angle_vectors(&angles);
                self.pml.forward = forward;
                self.pml.right = right;

                self.air_move();
            }
        }

        // set groundentity, watertype, and waterlevel for final spot
        self.categorize_position();

        self.check_stuck();
    }

    fn finish(mut self) -> PlayerMoveState {
        self.ps.origin = self.pml.origin;
        self.ps.velocity = self.pml.velocity;
        self.ps
    }
}

// ============================================================
// Public API
// ============================================================

/// Advances one player by one command. Can be called by either the server
/// or the client; identical inputs always give identical results.
pub fn pmove<C: PmoveCallbacks + ?Sized>(
    state: &PlayerMoveState,
    cmd: &UserCmd,
    settings: &PmoveSettings,
    callbacks: &C,
) -> PlayerMoveState {
    let mut ctx = PmoveContext {
        ps: *state,
        cmd: *cmd,
        settings,
        pml: PmLocal::default(),
        cb: callbacks,
    };
    ctx.execute();
    ctx.finish()
}

/// Ticks many independent players against the same world in parallel.
/// `states` and `cmds` are matched up by index.
pub fn pmove_many<C: PmoveCallbacks + Sync + ?Sized>(
    states: &mut [PlayerMoveState],
    cmds: &[UserCmd],
    settings: &PmoveSettings,
    callbacks: &C,
) {
    states
        .par_iter_mut()
        .zip(cmds.par_iter())
        .for_each(|(state, cmd)| *state = pmove(state, cmd, settings, callbacks));
}

// ============================================================
// Unit tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmodel::tests::leaf_model_lumps;
    use crate::cmodel::{CollisionLumps, DBrush, DBrushSide, DPlane};
    use crate::q_shared::{CPlane, CONTENTS_SOLID};

    /// Stub callbacks for testing -- open air, no collisions.
    struct OpenAirCallbacks;

    impl PmoveCallbacks for OpenAirCallbacks {
        fn trace(&self, _start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> Trace {
            Trace::clear(*end)
        }

        fn pointcontents(&self, _point: &Vec3) -> i32 {
            0
        }
    }

    fn up_plane() -> CPlane {
        CPlane::new([0.0, 0.0, 1.0], 0.0)
    }

    /// Stub callbacks that simulate a solid floor at z=0.
    struct FloorCallbacks;

    impl PmoveCallbacks for FloorCallbacks {
        fn trace(&self, start: &Vec3, mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> Trace {
            // the swept box hits the floor when origin_z + mins[2] <= 0
            let effective_floor = -mins[2];
            if end[2] < effective_floor {
                let frac = if (start[2] - end[2]).abs() > f32::EPSILON {
                    ((start[2] - effective_floor) / (start[2] - end[2])).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                Trace {
                    fraction: frac,
                    endpos: [
                        start[0] + frac * (end[0] - start[0]),
                        start[1] + frac * (end[1] - start[1]),
                        effective_floor,
                    ],
                    plane: Some(up_plane()),
                    contents: CONTENTS_SOLID,
                    ..Trace::default()
                }
            } else {
                Trace::clear(*end)
            }
        }

        fn pointcontents(&self, point: &Vec3) -> i32 {
            if point[2] < 0.0 {
                CONTENTS_SOLID
            } else {
                0
            }
        }
    }

    /// A wall facing -x at x = 5 that reaches everywhere.
    struct WallCallbacks;

    const WALL_X: f32 = 5.0;

    impl PmoveCallbacks for WallCallbacks {
        fn trace(&self, start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> Trace {
            if end[0] > WALL_X && start[0] <= WALL_X {
                let frac = (WALL_X - start[0]) / (end[0] - start[0]);
                Trace {
                    fraction: frac,
                    endpos: [
                        WALL_X,
                        start[1] + frac * (end[1] - start[1]),
                        start[2] + frac * (end[2] - start[2]),
                    ],
                    plane: Some(CPlane::new([-1.0, 0.0, 0.0], -WALL_X)),
                    contents: CONTENTS_SOLID,
                    ..Trace::default()
                }
            } else {
                Trace::clear(*end)
            }
        }

        fn pointcontents(&self, _point: &Vec3) -> i32 {
            0
        }
    }

    /// Water everywhere below z = `surface`, over the floor at z=0.
    struct PoolCallbacks {
        surface: f32,
    }

    impl PmoveCallbacks for PoolCallbacks {
        fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
            FloorCallbacks.trace(start, mins, maxs, end)
        }

        fn pointcontents(&self, point: &Vec3) -> i32 {
            if point[2] < 0.0 {
                CONTENTS_SOLID
            } else if point[2] < self.surface {
                CONTENTS_WATER
            } else {
                0
            }
        }
    }

    fn standing_state() -> PlayerMoveState {
        PlayerMoveState {
            origin: [0.0, 0.0, 24.0],
            pm_flags: PMF_ON_GROUND,
            ..PlayerMoveState::default()
        }
    }

    fn cmd(msec: u8, forwardmove: i16) -> UserCmd {
        UserCmd {
            msec,
            forwardmove,
            ..UserCmd::default()
        }
    }

    #[test]
    fn test_clip_velocity() {
        let out = pm_clip_velocity(&[10.0, 0.0, -10.0], &[0.0, 0.0, 1.0], 1.0);
        assert!((out[0] - 10.0).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
        assert!(out[2].abs() < 1e-6); // vertical component removed
    }

    #[test]
    fn test_clip_velocity_overbounce() {
        let out = pm_clip_velocity(&[0.0, 0.0, -100.0], &[0.0, 0.0, 1.0], OVERBOUNCE);
        // should bounce slightly upward: -100 - (-100 * 1.01) = 1.0
        assert!((out[2] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_clip_velocity_never_points_into_plane() {
        let n = 1.0 / 2.0f32.sqrt();
        let normals = [[0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [n, n, 0.0], [0.0, -n, n]];
        let vels = [[300.0, -20.0, -50.0], [12.5, 400.0, 0.0], [-250.0, -250.0, 10.0]];
        for normal in &normals {
            for v in &vels {
                let out = pm_clip_velocity(v, normal, OVERBOUNCE);
                assert!(
                    dot_product(&out, normal) >= -STOP_EPSILON,
                    "{:?} clipped against {:?} gave {:?}",
                    v,
                    normal,
                    out
                );
            }
        }
    }

    #[test]
    fn test_clip_velocity_leaving_plane_keeps_no_inward_part() {
        let out = pm_clip_velocity(&[-250.0, -250.0, 10.0], &[0.0, 0.0, 1.0], OVERBOUNCE);
        assert_eq!(out, [-250.0, -250.0, 0.0]);

        // far enough off the plane that the overshoot is above the snap
        let out = pm_clip_velocity(&[0.0, 40.0, 300.0], &[0.0, 0.0, 1.0], OVERBOUNCE);
        assert_eq!(out, [0.0, 40.0, 0.0]);
    }

    #[test]
    fn test_ground_friction_then_accelerate() {
        let mut state = standing_state();
        state.velocity = [50.0, 0.0, 0.0];
        let settings = PmoveSettings::default();

        let out = pmove(&state, &cmd(25, 200), &settings, &FloorCallbacks);

        let dt = 0.025f32;
        // friction below stop speed uses stop speed as the control
        let after_friction = 50.0 - settings.stop_speed * settings.friction * dt;
        let accel = (settings.accelerate * dt * 200.0).min(200.0 - after_friction);
        let expected_vx = after_friction + accel;

        assert!((out.velocity[0] - expected_vx).abs() < 1e-3, "vx = {}", out.velocity[0]);
        assert!((out.velocity[0] - 85.0).abs() < 1e-3);
        assert_eq!(out.velocity[1], 0.0);
        assert_eq!(out.velocity[2], 0.0);
        assert!((out.origin[0] - expected_vx * dt).abs() < 1e-4, "x = {}", out.origin[0]);
        assert_eq!(out.origin[2], 24.0);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_GROUND));
    }

    #[test]
    fn test_air_move_stops_at_wall() {
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 100.0],
            velocity: [400.0, 0.0, 0.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(25, 200), &PmoveSettings::default(), &WallCallbacks);
        assert_eq!(out.origin[0], 5.0);
        assert!(out.velocity[0] <= 0.0, "velocity into the wall must be gone: {:?}", out.velocity);
    }

    #[test]
    fn test_pmove_is_deterministic() {
        let mut state = standing_state();
        state.velocity = [120.0, -30.0, 0.0];
        let c = UserCmd {
            msec: 16,
            forwardmove: 200,
            sidemove: -100,
            angles: [10.0, 37.0, 0.0],
            ..UserCmd::default()
        };
        let settings = PmoveSettings::default();
        let a = pmove(&state, &c, &settings, &FloorCallbacks);
        let b = pmove(&state, &c, &settings, &FloorCallbacks);
        assert_eq!(a, b);
        for i in 0..3 {
            assert_eq!(a.origin[i].to_bits(), b.origin[i].to_bits());
            assert_eq!(a.velocity[i].to_bits(), b.velocity[i].to_bits());
        }
    }

    #[test]
    fn test_pmove_freeze_no_movement() {
        let state = PlayerMoveState {
            pm_type: PmType::Freeze,
            origin: [100.0, 100.0, 100.0],
            velocity: [10.0, 0.0, 0.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(16, 127), &PmoveSettings::default(), &OpenAirCallbacks);
        assert_eq!(out.origin, state.origin);
        assert_eq!(out.velocity, state.velocity);
    }

    #[test]
    fn test_pmove_noclip_flies() {
        let state = PlayerMoveState {
            pm_type: PmType::NoClip,
            origin: [0.0, 0.0, 100.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(50, 300), &PmoveSettings::default(), &FloorCallbacks);
        assert!(out.origin[0] > 0.0, "noclip should move forward, got {:?}", out.origin);
        assert_eq!(out.origin[2], 100.0, "noclip has no gravity");
    }

    #[test]
    fn test_pmove_gravity_in_air() {
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 200.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(100, 0), &PmoveSettings::default(), &OpenAirCallbacks);
        assert!((out.velocity[2] + 80.0).abs() < 1e-3, "vz = {}", out.velocity[2]);
        assert!(out.origin[2] < 200.0);
        assert!(!has_pm_flag(out.pm_flags, PMF_ON_GROUND));
    }

    #[test]
    fn test_msec_is_clamped() {
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 2000.0],
            ..PlayerMoveState::default()
        };
        let settings = PmoveSettings::default();
        let long = pmove(&state, &cmd(255, 0), &settings, &OpenAirCallbacks);
        let capped = pmove(&state, &cmd(MAX_CMD_MSEC, 0), &settings, &OpenAirCallbacks);
        assert_eq!(long, capped);
    }

    #[test]
    fn test_jump_leaves_ground_and_needs_release() {
        let state = standing_state();
        let settings = PmoveSettings::default();
        let jump = UserCmd {
            msec: 16,
            upmove: 200,
            ..UserCmd::default()
        };
        let out = pmove(&state, &jump, &settings, &FloorCallbacks);
        assert!(out.velocity[2] > 250.0, "vz = {}", out.velocity[2]);
        assert!(out.origin[2] > 24.0);
        assert!(has_pm_flag(out.pm_flags, PMF_JUMP_HELD));
        assert!(!has_pm_flag(out.pm_flags, PMF_ON_GROUND));
    }

    #[test]
    fn test_hard_landing_sets_land_timer() {
        // just above the floor, falling fast
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 24.1],
            velocity: [0.0, 0.0, -500.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(16, 0), &PmoveSettings::default(), &FloorCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_GROUND));
        assert!(has_pm_flag(out.pm_flags, PMF_TIME_LAND));
        assert_eq!(out.pm_time, LAND_TIME_HARD - 16);
        assert_eq!(out.velocity[2], 0.0);
    }

    #[test]
    fn test_timers_run_down() {
        let mut state = standing_state();
        state.pm_flags |= PMF_TIME_LAND;
        state.pm_time = 20;
        let out = pmove(&state, &cmd(16, 0), &PmoveSettings::default(), &FloorCallbacks);
        assert_eq!(out.pm_time, 4);
        let out = pmove(&out, &cmd(16, 0), &PmoveSettings::default(), &FloorCallbacks);
        assert_eq!(out.pm_time, 0);
        assert!(!has_pm_flag(out.pm_flags, PMF_TIME_LAND));
    }

    #[test]
    fn test_duck_shrinks_box() {
        let state = standing_state();
        let crouch = UserCmd {
            msec: 16,
            buttons: Buttons::CROUCH,
            ..UserCmd::default()
        };
        let out = pmove(&state, &crouch, &PmoveSettings::default(), &FloorCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_DUCKED));
        assert_eq!(out.maxs[2], 4.0);
        assert_eq!(out.viewheight, -2.0);

        let out = pmove(&out, &cmd(16, 0), &PmoveSettings::default(), &FloorCallbacks);
        assert!(!has_pm_flag(out.pm_flags, PMF_DUCKED));
        assert_eq!(out.maxs[2], 32.0);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let state = PlayerMoveState {
            delta_angles: [10.0, 0.0, 0.0],
            ..standing_state()
        };
        let look = UserCmd {
            msec: 16,
            angles: [85.0, 90.0, 0.0],
            ..UserCmd::default()
        };
        let out = pmove(&state, &look, &PmoveSettings::default(), &FloorCallbacks);
        assert_eq!(out.viewangles[PITCH], 89.0);
        assert_eq!(out.viewangles[YAW], 90.0);

        let look_up = UserCmd { angles: [-120.0, 0.0, 0.0], ..look };
        let out = pmove(&standing_state(), &look_up, &PmoveSettings::default(), &FloorCallbacks);
        assert_eq!(out.viewangles[PITCH], 271.0);
    }

    #[test]
    fn test_water_level_classification() {
        let settings = PmoveSettings::default();
        let pool = PoolCallbacks { surface: 10.0 };
        let out = pmove(&standing_state(), &cmd(16, 0), &settings, &pool);
        assert_eq!(out.waterlevel, WaterLevel::Feet);
        assert_eq!(out.watertype, CONTENTS_WATER);

        let pool = PoolCallbacks { surface: 30.0 };
        let out = pmove(&standing_state(), &cmd(16, 0), &settings, &pool);
        assert_eq!(out.waterlevel, WaterLevel::Waist);

        let pool = PoolCallbacks { surface: 100.0 };
        let out = pmove(&standing_state(), &cmd(16, 0), &settings, &pool);
        assert_eq!(out.waterlevel, WaterLevel::Under);
    }

    #[test]
    fn test_underwater_idle_drifts_down() {
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 60.0],
            ..PlayerMoveState::default()
        };
        let pool = PoolCallbacks { surface: 200.0 };
        let out = pmove(&state, &cmd(50, 0), &PmoveSettings::default(), &pool);
        assert!(out.velocity[2] < 0.0, "vz = {}", out.velocity[2]);
        // no gravity in water, only the drift
        assert!(out.velocity[2] > -20.0, "vz = {}", out.velocity[2]);
    }

    #[test]
    fn test_ducked_swimmer_is_held_to_duck_speed() {
        let state = PlayerMoveState {
            pm_flags: PMF_ON_GROUND | PMF_DUCKED,
            ..standing_state()
        };
        let swim = UserCmd {
            msec: 250,
            forwardmove: 400,
            buttons: Buttons::CROUCH,
            ..UserCmd::default()
        };
        let pool = PoolCallbacks { surface: 200.0 };

        // wish (400, 0, -200) is cut to 300, halved to 150, then held to 100
        let mut settings = PmoveSettings::default();
        let out = pmove(&state, &swim, &settings, &pool);
        assert!(has_pm_flag(out.pm_flags, PMF_DUCKED));
        assert_eq!(out.waterlevel, WaterLevel::Under);
        let expected = 100.0 * 400.0 / (400.0f32 * 400.0 + 200.0 * 200.0).sqrt();
        assert!((out.velocity[0] - expected).abs() < 0.5, "vx = {}", out.velocity[0]);

        settings.duck_speed = 1000.0;
        let out = pmove(&state, &swim, &settings, &pool);
        assert!(out.velocity[0] > 130.0, "vx = {}", out.velocity[0]);
    }

    #[test]
    fn test_slick_ground_has_no_friction() {
        let mut state = standing_state();
        state.velocity = [200.0, 0.0, 0.0];
        let settings = PmoveSettings {
            ground_is_slick: true,
            ..PmoveSettings::default()
        };
        let out = pmove(&state, &cmd(25, 0), &settings, &FloorCallbacks);
        assert_eq!(out.velocity[0], 200.0);
        let out = pmove(&state, &cmd(25, 0), &PmoveSettings::default(), &FloorCallbacks);
        assert!(out.velocity[0] < 200.0);
    }

    #[test]
    fn test_dead_player_ignores_input() {
        let state = PlayerMoveState {
            pm_type: PmType::Dead,
            ..standing_state()
        };
        let out = pmove(&state, &cmd(25, 400), &PmoveSettings::default(), &FloorCallbacks);
        assert_eq!(out.velocity, VEC3_ORIGIN);
        assert_eq!(out.origin, state.origin);
        assert!(has_pm_flag(out.pm_flags, PMF_DUCKED));
    }

    #[test]
    fn test_step_slide_climbs_step() {
        // floor at z=0 with an 8 unit step starting at x=20
        let lumps = leaf_model_lumps(&[20.0, -512.0, -64.0], &[512.0, 512.0, 8.0], CONTENTS_SOLID);
        let step = WorldCallbacks::new(Arc::new(CollisionModel::from_lumps(lumps).unwrap()));
        let mins = [-16.0, -16.0, -24.0];
        let maxs = [16.0, 16.0, 32.0];
        let mut origin = [0.0, 0.0, 24.0];
        let mut velocity = [300.0, 0.0, 0.0];
        step_slide_move(&step, &mut origin, &mut velocity, 0.1, &mins, &maxs, false);
        assert!(origin[0] > 20.0, "should have walked onto the step: {:?}", origin);
        assert!((origin[2] - 32.0).abs() < 0.1, "standing on the step top: {:?}", origin);
    }

    #[test]
    fn test_embedded_player_is_resolved() {
        // a ceiling the player ends up poking into
        let lumps = leaf_model_lumps(&[-512.0, -512.0, 64.0], &[512.0, 512.0, 128.0], CONTENTS_SOLID);
        let world = WorldCallbacks::new(Arc::new(CollisionModel::from_lumps(lumps).unwrap()));
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 40.0],
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(16, 0), &PmoveSettings::default(), &world);
        let tr = world.trace(&out.origin, &out.mins, &out.maxs, &out.origin);
        assert!(!tr.startsolid, "resolver should free the player, got {:?}", out.origin);
    }

    #[test]
    fn test_pmove_many_matches_serial() {
        let lumps = leaf_model_lumps(&[-512.0, -512.0, -64.0], &[512.0, 512.0, 0.0], CONTENTS_SOLID);
        let world = WorldCallbacks::new(Arc::new(CollisionModel::from_lumps(lumps).unwrap()));
        let settings = PmoveSettings::default();

        let mut states: Vec<PlayerMoveState> = (0..32)
            .map(|i| PlayerMoveState {
                origin: [i as f32 * 8.0 - 128.0, 0.0, 24.0 + i as f32],
                ..PlayerMoveState::default()
            })
            .collect();
        let cmds: Vec<UserCmd> = (0..32)
            .map(|i| UserCmd {
                msec: 16,
                forwardmove: 200,
                angles: [0.0, i as f32 * 11.0, 0.0],
                ..UserCmd::default()
            })
            .collect();

        let serial: Vec<PlayerMoveState> = states
            .iter()
            .zip(&cmds)
            .map(|(s, c)| pmove(s, c, &settings, &world))
            .collect();
        pmove_many(&mut states, &cmds, &settings, &world);
        assert_eq!(states, serial);
    }

    /// A ladder face at x = 16.5 over the floor, directly ahead of a player
    /// at the origin looking down +x.
    struct LadderCallbacks;

    impl PmoveCallbacks for LadderCallbacks {
        fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
            let face = 16.5 - maxs[0];
            if end[0] > face && start[0] <= face {
                let frac = (face - start[0]) / (end[0] - start[0]);
                return Trace {
                    fraction: frac,
                    endpos: [face, end[1], start[2] + frac * (end[2] - start[2])],
                    plane: Some(CPlane::new([-1.0, 0.0, 0.0], -face)),
                    contents: CONTENTS_LADDER | CONTENTS_SOLID,
                    ..Trace::default()
                };
            }
            FloorCallbacks.trace(start, mins, maxs, end)
        }
        fn pointcontents(&self, point: &Vec3) -> i32 {
            FloorCallbacks.pointcontents(point)
        }
    }

    #[test]
    fn test_ladder_climb() {
        let state = standing_state();
        let climb = UserCmd {
            msec: 50,
            forwardmove: 200,
            ..UserCmd::default()
        };
        let out = pmove(&state, &climb, &PmoveSettings::default(), &LadderCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_LADDER));
        assert!(out.origin[2] > state.origin[2], "should climb: {:?}", out.origin);
    }

    #[test]
    fn test_ladder_strafe_slides_along_face() {
        let hanging = PlayerMoveState {
            origin: [0.0, 0.0, 100.0],
            ..PlayerMoveState::default()
        };
        let strafe = UserCmd {
            msec: 50,
            sidemove: 150,
            ..UserCmd::default()
        };

        // off the ground the strafe follows the face, scaled by ladder_mod
        let mut settings = PmoveSettings::default();
        let out = pmove(&hanging, &strafe, &settings, &LadderCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_LADDER));
        assert!((out.velocity[1] + 37.5).abs() < 1e-3, "{:?}", out.velocity);
        assert_eq!(out.velocity[0], 0.0);
        assert_eq!(out.velocity[2], 0.0);

        settings.ladder_mod = 1.0;
        let out = pmove(&hanging, &strafe, &settings, &LadderCallbacks);
        assert!((out.velocity[1] + 75.0).abs() < 1e-3, "{:?}", out.velocity);

        // on the ground sideways input is not capped
        let out = pmove(&standing_state(), &strafe, &PmoveSettings::default(), &LadderCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_LADDER));
        assert!((out.velocity[1] + 75.0).abs() < 1e-3, "{:?}", out.velocity);
    }

    #[test]
    fn test_ladder_backing_off_in_the_air_descends_straight_down() {
        let hanging = PlayerMoveState {
            origin: [0.0, 0.0, 100.0],
            velocity: [0.0, 20.0, 0.0],
            ..PlayerMoveState::default()
        };
        let back = UserCmd {
            msec: 50,
            forwardmove: -100,
            ..UserCmd::default()
        };
        let out = pmove(&hanging, &back, &PmoveSettings::default(), &LadderCallbacks);
        assert!(has_pm_flag(out.pm_flags, PMF_ON_LADDER));
        // wish is straight down at 100: 10 * 0.05 * 100 = 50 per tick
        assert!((out.velocity[2] + 50.0).abs() < 1e-3, "{:?}", out.velocity);
        assert!(out.velocity[0].abs() < 1e-3, "{:?}", out.velocity);
    }

    fn add_box(lumps: &mut CollisionLumps, mins: Vec3, maxs: Vec3) {
        let firstside = lumps.planes.len() as i32;
        for axis in 0..3 {
            let mut n = VEC3_ORIGIN;
            n[axis] = 1.0;
            lumps.planes.push(DPlane { normal: n, dist: maxs[axis] });
            n[axis] = -1.0;
            lumps.planes.push(DPlane { normal: n, dist: -mins[axis] });
        }
        let first_brushside = lumps.brushsides.len() as i32;
        for i in 0..6 {
            lumps.brushsides.push(DBrushSide {
                planenum: firstside + i,
                surface_flags: 0,
            });
        }
        lumps.leafbrushes.push(lumps.brushes.len() as i32);
        lumps.brushes.push(DBrush {
            firstside: first_brushside,
            numsides: 6,
            contents: CONTENTS_SOLID,
        });
        lumps.leafs[0].numleafbrushes += 1;
    }

    /// Pool floor at z=0 with water up to z=30, and a ledge rising to z=40
    /// from x=32 onwards.
    struct LedgePool {
        world: WorldCallbacks,
    }

    impl LedgePool {
        fn new() -> Self {
            let mut lumps =
                leaf_model_lumps(&[-512.0, -512.0, -64.0], &[512.0, 512.0, 0.0], CONTENTS_SOLID);
            // one leaf holds every brush, so it carries their contents
            add_box(&mut lumps, [32.0, -512.0, -64.0], [512.0, 512.0, 40.0]);
            let model = CollisionModel::from_lumps(lumps).unwrap();
            Self {
                world: WorldCallbacks::new(Arc::new(model)),
            }
        }
    }

    impl PmoveCallbacks for LedgePool {
        fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
            self.world.trace(start, mins, maxs, end)
        }

        fn pointcontents(&self, point: &Vec3) -> i32 {
            let mut contents = self.world.pointcontents(point);
            if point[0] < 32.0 && point[2] >= 0.0 && point[2] < 30.0 {
                contents |= CONTENTS_WATER;
            }
            contents
        }
    }

    #[test]
    fn test_water_jump_onto_ledge() {
        let pool = LedgePool::new();
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 24.0 + DIST_EPSILON],
            pm_flags: PMF_ON_GROUND,
            ..PlayerMoveState::default()
        };
        let out = pmove(&state, &cmd(16, 200), &PmoveSettings::default(), &pool);
        assert!(has_pm_flag(out.pm_flags, PMF_TIME_WATERJUMP), "flags {:#x}", out.pm_flags);
        assert_eq!(out.pm_time, WATERJUMP_TIME - 16);
        assert!(out.velocity[2] > 300.0, "vz = {}", out.velocity[2]);
        assert!(out.origin[2] > state.origin[2]);
    }

    #[test]
    fn test_no_water_jump_without_ledge() {
        // same pool, facing away from the ledge
        let pool = LedgePool::new();
        let state = PlayerMoveState {
            origin: [0.0, 0.0, 24.0 + DIST_EPSILON],
            pm_flags: PMF_ON_GROUND,
            ..PlayerMoveState::default()
        };
        let away = UserCmd {
            angles: [0.0, 180.0, 0.0],
            ..cmd(16, 200)
        };
        let out = pmove(&state, &away, &PmoveSettings::default(), &pool);
        assert!(!has_pm_flag(out.pm_flags, PMF_TIME_WATERJUMP));
        assert_eq!(out.waterlevel, WaterLevel::Waist);
    }
}
