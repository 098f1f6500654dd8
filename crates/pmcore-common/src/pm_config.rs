// pm_config.rs -- movement tunables and the fixed constants shared by client and server

use serde::{Deserialize, Serialize};

// ============================================================
// Constants
// ============================================================

/// 1/32 epsilon to keep floating point happy
pub const DIST_EPSILON: f32 = 0.03125;

pub const STEPSIZE: f32 = 18.0;
pub const STOP_EPSILON: f32 = 0.1;
pub const MIN_STEP_NORMAL: f32 = 0.7;
pub const OVERBOUNCE: f32 = 1.01;

pub const MAX_CLIP_PLANES: usize = 5;
pub const MAX_BUMPS: usize = 4;

/// Commands longer than this are clamped before simulation.
pub const MAX_CMD_MSEC: u8 = 250;

/// Vertical speed above which the player is never considered grounded.
pub const GROUND_LEAVE_SPEED: f32 = 180.0;
pub const GROUND_PROBE_DIST: f32 = 0.25;

pub const JUMP_SPEED: f32 = 270.0;
pub const HARD_LANDING_SPEED: f32 = -200.0;
pub const VERY_HARD_LANDING_SPEED: f32 = -400.0;
pub const LAND_TIME_HARD: u16 = 200;
pub const LAND_TIME_SOFT: u16 = 144;

pub const LADDER_PROBE_DIST: f32 = 1.0;
pub const LADDER_CLIMB_SPEED: f32 = 200.0;
pub const LADDER_MAX_SIDE_SPEED: f32 = 25.0;
pub const LADDER_STRAFE_SPEED: f32 = 150.0;
/// Looking further down than this while pushing forward descends a ladder.
pub const LADDER_ASCEND_PITCH: f32 = 15.0;

pub const WATERJUMP_PROBE_DIST: f32 = 40.0;
pub const WATERJUMP_FORWARD_SPEED: f32 = 50.0;
pub const WATERJUMP_UP_SPEED: f32 = 350.0;
pub const WATERJUMP_TIME: u16 = 2048;
pub const WATERJUMP_SIM_STEP: f32 = 0.1;
pub const WATERJUMP_MAX_STEPS: usize = 50;
pub const WATERJUMP_DOWN_PROBE: f32 = 2.0;
/// The jump simulation runs for one second of flight at this gravity.
pub const WATERJUMP_REFERENCE_GRAVITY: f32 = 800.0;

pub const WATER_DRIFT_SPEED: f32 = 60.0;
pub const CONVEYOR_SPEED: f32 = 100.0;

/// Padding used to push a resolved stuck box clear of the surface it touched.
pub const STUCK_PUSH: f32 = 0.125;

// ============================================================
// Settings
// ============================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("unknown movement variable \"{0}\"")]
    UnknownVariable(String),
    #[error("bad value \"{value}\" for {name}")]
    BadValue { name: String, value: String },
}

/// Server-tunable movement parameters. Client and server must agree on
/// every field for prediction to converge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmoveSettings {
    pub friction: f32,
    pub stop_speed: f32,
    pub accelerate: f32,
    pub air_accelerate: f32,
    pub water_accelerate: f32,
    pub water_friction: f32,
    pub max_speed: f32,
    pub duck_speed: f32,
    pub water_speed: f32,
    /// Scales ladder strafing when not at least waist deep.
    pub ladder_mod: f32,
    pub ground_is_slick: bool,
}

impl Default for PmoveSettings {
    fn default() -> Self {
        Self {
            friction: 6.0,
            stop_speed: 100.0,
            accelerate: 10.0,
            air_accelerate: 1.0,
            water_accelerate: 4.0,
            water_friction: 1.0,
            max_speed: 300.0,
            duck_speed: 100.0,
            water_speed: 400.0,
            ladder_mod: 0.5,
            ground_is_slick: false,
        }
    }
}

impl PmoveSettings {
    /// Applies a cvar / configstring style assignment such as
    /// `pm_airaccelerate "0"`.
    pub fn set_var(&mut self, name: &str, value: &str) -> Result<(), SettingsError> {
        let slot = match name {
            "pm_friction" => &mut self.friction,
            "pm_stopspeed" => &mut self.stop_speed,
            "pm_accelerate" => &mut self.accelerate,
            "pm_airaccelerate" | "sv_airaccelerate" => &mut self.air_accelerate,
            "pm_wateraccelerate" => &mut self.water_accelerate,
            "pm_waterfriction" => &mut self.water_friction,
            "pm_maxspeed" => &mut self.max_speed,
            "pm_duckspeed" => &mut self.duck_speed,
            "pm_waterspeed" => &mut self.water_speed,
            "pm_laddermod" => &mut self.ladder_mod,
            "pm_slick" => {
                self.ground_is_slick = parse_value(name, value)? != 0.0;
                return Ok(());
            }
            _ => return Err(SettingsError::UnknownVariable(name.to_string())),
        };
        *slot = parse_value(name, value)?;
        Ok(())
    }
}

fn parse_value(name: &str, value: &str) -> Result<f32, SettingsError> {
    value
        .trim()
        .trim_matches('"')
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SettingsError::BadValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}

// ============================================================
// Unit tests
// ============================================================
