// fusion.rs: Delay-compensated fusion of flow odometry and visual fixes
//
// Visual fixes arrive well after the image they were computed from. Rather
// than overwrite the pose with a fix (and lose the motion integrated since
// the image was captured), every tick's increment is kept in a short delta
// queue. When a fix is folded in it becomes the new baseline and only the
// increments recorded at or after its capture time are replayed on top.

use serde::{Deserialize, Serialize};

use crate::config::FusionMode;
use crate::delta_queue::DeltaQueues;
use crate::ingest::ReadingIngest;
use crate::odometry::{self, TickInput, TickSkip};
use crate::types::{wrap_angle, AttitudeSample, FusedPose, VisualCorrection};

// ─── State ───────────────────────────────────────────────────────────────────

/// Accumulators owned by the fusion engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusionState {
    // Displacement accumulated since the last fix (world frame)
    pub x: f64,
    pub y: f64,
    pub yaw: f64,

    /// Last fix folded in; all zeros until the first one.
    pub baseline: VisualCorrection,

    // Attitude at the previous successful tick
    pub prev_roll: f64,
    pub prev_pitch: f64,
    pub prev_yaw: f64,

    pub last_velocity_ts: Option<f64>,

    /// Raw attitude yaw captured at the last reset.
    pub yaw_reference: f64,
}

/// A fix that was folded in on this tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedCorrection {
    pub timestamp: f64,
    /// Velocity-sample time minus fix capture time.
    pub latency_secs: f64,
    pub replayed_dx: f64,
    pub replayed_dy: f64,
    pub replayed_dyaw: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FusionOutput {
    pub pose: FusedPose,
    pub correction: Option<AppliedCorrection>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct FusionEngine {
    mode: FusionMode,
    state: FusionState,
    queues: DeltaQueues,
}

impl FusionEngine {
    pub fn new(mode: FusionMode, queue_capacity: usize) -> Self {
        Self {
            mode,
            state: FusionState::default(),
            queues: DeltaQueues::new(queue_capacity),
        }
    }

    pub fn fuse(&mut self, ingest: &mut ReadingIngest) -> Result<FusionOutput, TickSkip> {
        match self.mode {
            FusionMode::Queued => self.fuse_queued(ingest),
            FusionMode::DeadReckoning => self.fuse_dead_reckoning(ingest),
        }
    }

    /// Zero the accumulators and take a fresh yaw reference.
    ///
    /// The next velocity sample only re-establishes the time baseline.
    pub fn reset(&mut self, attitude: &AttitudeSample) {
        let yaw = attitude.yaw();
        self.state = FusionState {
            prev_roll: attitude.roll(),
            prev_pitch: attitude.pitch(),
            prev_yaw: yaw,
            yaw_reference: yaw,
            ..FusionState::default()
        };
        self.queues.clear();
    }

    pub fn state(&self) -> &FusionState {
        &self.state
    }

    pub fn queues(&self) -> &DeltaQueues {
        &self.queues
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    // ── Queued mode ──────────────────────────────────────────────────────

    fn fuse_queued(&mut self, ingest: &mut ReadingIngest) -> Result<FusionOutput, TickSkip> {
        let input = odometry::begin_tick(&mut self.state, ingest)?;

        let correction = ingest
            .take_correction()
            .map(|fix| self.fold_correction(fix, input.timestamp));

        let inc = odometry::advance(&mut self.state, &input);
        self.queues.push(input.timestamp, inc.dx, inc.dy, inc.dyaw);

        let pose = self.compose_pose(
            &input,
            ingest,
            self.state.baseline.x + self.state.x,
            self.state.baseline.y + self.state.y,
        );
        Ok(FusionOutput { pose, correction })
    }

    fn fold_correction(&mut self, fix: VisualCorrection, now: f64) -> AppliedCorrection {
        self.state.x = 0.0;
        self.state.y = 0.0;
        self.state.yaw = fix.yaw;

        let replayed_dx = self.queues.dx.replay_since(fix.timestamp);
        let replayed_dy = self.queues.dy.replay_since(fix.timestamp);
        let replayed_dyaw = self.queues.dyaw.replay_since(fix.timestamp);

        self.state.x += replayed_dx;
        self.state.y += replayed_dy;
        self.state.yaw = wrap_angle(self.state.yaw + replayed_dyaw);

        let latency_secs = now - fix.timestamp;
        log::debug!(
            "visual fix folded: latency {:.3}s, replayed ({:.3}, {:.3}, {:.3})",
            latency_secs,
            replayed_dx,
            replayed_dy,
            replayed_dyaw
        );

        let applied = AppliedCorrection {
            timestamp: fix.timestamp,
            latency_secs,
            replayed_dx,
            replayed_dy,
            replayed_dyaw,
        };
        self.state.baseline = fix;
        applied
    }

    // ── Dead-reckoning mode ──────────────────────────────────────────────

    fn fuse_dead_reckoning(&mut self, ingest: &mut ReadingIngest) -> Result<FusionOutput, TickSkip> {
        let (input, _) = odometry::integrate_tick(&mut self.state, ingest)?;
        // Integrated from a fixed origin, visual fixes only feed the altitude fallback
        let pose = self.compose_pose(&input, ingest, self.state.x, self.state.y);
        Ok(FusionOutput { pose, correction: None })
    }

    fn compose_pose(&self, input: &TickInput, ingest: &ReadingIngest, x: f64, y: f64) -> FusedPose {
        let v = &input.velocity;
        FusedPose {
            timestamp: input.timestamp,
            x,
            y,
            z: odometry::altitude(v, ingest),
            rot_x: input.attitude.roll(),
            rot_y: input.attitude.pitch(),
            rot_z: self.state.yaw,
            vx: v.vx,
            vy: v.vy,
            vz: v.vz,
            wx: v.wx,
            wy: v.wy,
            wz: v.wz,
        }
    }
}
