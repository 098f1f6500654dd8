// cl_pred.rs -- client-side movement prediction

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pmcore_common::pm_config::PmoveSettings;
use pmcore_common::pmove::{pmove, PmoveCallbacks};
use pmcore_common::q_shared::{
    has_pm_flag, lerp_angle, vector_lerp, vector_subtract, PlayerMoveState, UserCmd, Vec3,
    PMF_NO_PREDICTION,
};

/// Most commands kept waiting for acknowledgement. Older ones are dropped.
pub const CMD_BACKUP: usize = 64;

/// Misses larger than this (Manhattan distance, world units) are treated as
/// a teleport rather than an error.
pub const TELEPORT_ERROR_DIST: f32 = 80.0;

/// Authoritative state for one server frame, the anchor every replay
/// starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionFrame {
    pub frame: u32,
    pub timestamp_ms: u64,
    pub state: PlayerMoveState,
}

/// How far an acknowledged prediction was from what the server computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionError {
    pub frame: u32,
    pub delta: Vec3,
    pub teleport: bool,
}

impl PredictionError {
    pub fn is_miss(&self) -> bool {
        self.delta != [0.0; 3]
    }
}

/// Latest predicted state, shared with whatever renders it. Only written
/// after a replay has finished.
#[derive(Debug, Clone, Default)]
pub struct PredictedView(Arc<RwLock<PlayerMoveState>>);

impl PredictedView {
    pub fn get(&self) -> PlayerMoveState {
        *self.0.read()
    }

    fn publish(&self, state: PlayerMoveState) {
        *self.0.write() = state;
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingCmd {
    cmd: UserCmd,
    predicted_origin: Vec3,
}

// ============================================================
// ClientPrediction
// ============================================================

/// Command queue and rewind-and-replay state for the local player.
pub struct ClientPrediction<C: PmoveCallbacks> {
    callbacks: C,
    settings: PmoveSettings,
    base: Option<PredictionFrame>,
    queue: VecDeque<PendingCmd>,
    predicted: PlayerMoveState,
    view: PredictedView,
    last_error: Option<PredictionError>,
}

impl<C: PmoveCallbacks> ClientPrediction<C> {
    pub fn new(callbacks: C, settings: PmoveSettings) -> Self {
        Self {
            callbacks,
            settings,
            base: None,
            queue: VecDeque::with_capacity(CMD_BACKUP),
            predicted: PlayerMoveState::default(),
            view: PredictedView::default(),
            last_error: None,
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn settings(&self) -> &PmoveSettings {
        &self.settings
    }

    /// New settings take effect on the next replay.
    pub fn set_settings(&mut self, settings: PmoveSettings) -> PlayerMoveState {
        self.settings = settings;
        self.recompute()
    }

    /// A handle that readers on other threads can poll.
    pub fn view(&self) -> PredictedView {
        self.view.clone()
    }

    pub fn predicted_state(&self) -> PlayerMoveState {
        self.predicted
    }

    pub fn authoritative(&self) -> Option<&PredictionFrame> {
        self.base.as_ref()
    }

    pub fn pending_commands(&self) -> impl Iterator<Item = &UserCmd> + '_ {
        self.queue.iter().map(|p| &p.cmd)
    }

    pub fn last_error(&self) -> Option<PredictionError> {
        self.last_error
    }

    /// Forget everything, as on disconnect.
    pub fn clear(&mut self) {
        self.base = None;
        self.queue.clear();
        self.last_error = None;
        self.predicted = PlayerMoveState::default();
        self.view.publish(self.predicted);
    }

    /// Switch to a new level's collision. Nothing predicted on the old one
    /// carries over.
    pub fn set_world(&mut self, callbacks: C) {
        self.callbacks = callbacks;
        self.clear();
    }

    // ============================================================
    // CL_CheckPredictionError
    // ============================================================

    fn check_prediction_error(&mut self, frame: &PredictionFrame, predicted_origin: &Vec3) {
        if has_pm_flag(frame.state.pm_flags, PMF_NO_PREDICTION) {
            return;
        }

        // compare what the server returned with what we had predicted it to be
        let delta = vector_subtract(&frame.state.origin, predicted_origin);
        let len = delta[0].abs() + delta[1].abs() + delta[2].abs();
        let error = PredictionError {
            frame: frame.frame,
            delta,
            teleport: len > TELEPORT_ERROR_DIST,
        };

        if error.teleport {
            log::debug!("prediction reset on {}: moved {}", frame.frame, len);
        } else if error.is_miss() {
            log::debug!("prediction miss on {}: {}", frame.frame, len);
        }
        self.last_error = Some(error);
    }

    /// Rebase on a new authoritative frame. Commands tagged at or before it
    /// are dropped, the rest are replayed on top of it.
    pub fn set_authoritative(&mut self, frame: PredictionFrame) -> PlayerMoveState {
        if let Some(base) = &self.base {
            if frame.frame < base.frame {
                log::debug!("ignoring stale frame {} (have {})", frame.frame, base.frame);
                return self.predicted;
            }
        }

        let mut acked: Option<Vec3> = None;
        self.queue.retain(|p| match p.cmd.server_frame {
            Some(f) if f <= frame.frame => {
                acked = Some(p.predicted_origin);
                false
            }
            _ => true,
        });

        if let Some(origin) = acked {
            self.check_prediction_error(&frame, &origin);
        }

        self.base = Some(frame);
        self.recompute()
    }

    /// Queue a command that was just sent to the server and predict it.
    pub fn enqueue_command(&mut self, cmd: UserCmd) -> PlayerMoveState {
        if self.queue.len() >= CMD_BACKUP {
            log::warn!("prediction queue overflow, dropping oldest command");
            self.queue.pop_front();
        }
        self.queue.push_back(PendingCmd {
            cmd,
            predicted_origin: self.predicted.origin,
        });
        self.recompute()
    }

    // ============================================================
    // CL_PredictMovement
    // ============================================================

    /// Replays every queued command from the authoritative state, then
    /// publishes the result.
    fn recompute(&mut self) -> PlayerMoveState {
        let Some(base) = &self.base else {
            // nothing to replay from until the first snapshot arrives
            return self.predicted;
        };

        let mut state = base.state;
        if !has_pm_flag(state.pm_flags, PMF_NO_PREDICTION) {
            for pending in self.queue.iter_mut() {
                state = pmove(&state, &pending.cmd, &self.settings, &self.callbacks);
                pending.predicted_origin = state.origin;
            }
        }

        self.predicted = state;
        self.view.publish(state);
        state
    }
}

// ============================================================
// Interpolation
// ============================================================

/// Blends two predicted states for rendering between ticks. Flags, water
/// level and the rest of the discrete fields come from `latest`.
pub fn interpolate_prediction_state(
    previous: &PlayerMoveState,
    latest: &PlayerMoveState,
    alpha: f32,
) -> PlayerMoveState {
    let alpha = if alpha.is_nan() { 1.0 } else { alpha.clamp(0.0, 1.0) };

    let mut out = *latest;
    out.origin = vector_lerp(&previous.origin, &latest.origin, alpha);
    out.velocity = vector_lerp(&previous.velocity, &latest.velocity, alpha);
    for i in 0..3 {
        out.viewangles[i] = lerp_angle(previous.viewangles[i], latest.viewangles[i], alpha);
    }
    out
}
