//! Dead-reckoning integration of optical-flow velocities.
//!
//! Each tick turns the freshest velocity sample into a world-frame
//! displacement using the yaw accumulator held in [`FusionState`].
//! The yaw change itself comes from the attitude stream, never from the gyros.

use serde::{Deserialize, Serialize};

use crate::fusion::FusionState;
use crate::ingest::ReadingIngest;
use crate::types::{body_to_world, wrap_angle, AttitudeSample, PlanarVec, VelocitySample};

/// Why a tick produced nothing. All of these are expected under sporadic
/// sensor delivery; the loop just tries again next tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TickSkip {
    /// No valid velocity sample has been accepted yet.
    NoVelocity,
    /// First sample after start or reset; its timestamp becomes the baseline.
    AwaitingBaseline,
    /// The velocity sample has not changed since the last tick.
    NoNewSample,
    NonFiniteElapsed,
    /// The sample is older than the one already integrated.
    OutOfOrder { dt: f64 },
}

impl TickSkip {
    pub fn label(self) -> &'static str {
        match self {
            Self::NoVelocity => "no_velocity",
            Self::AwaitingBaseline => "awaiting_baseline",
            Self::NoNewSample => "no_new_sample",
            Self::NonFiniteElapsed => "non_finite_elapsed",
            Self::OutOfOrder { .. } => "out_of_order",
        }
    }
}

/// Everything the integration step needs from one tick.
#[derive(Clone, Debug)]
pub struct TickInput {
    pub timestamp: f64,
    pub dt: f64,
    pub dyaw: f64,
    pub velocity: VelocitySample,
    pub attitude: AttitudeSample,
}

/// World-frame displacement produced by one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Increment {
    pub dx: f64,
    pub dy: f64,
    pub dyaw: f64,
}

/// Check elapsed time and take the attitude delta for this tick.
///
/// On success the velocity timestamp and the previous roll/pitch/yaw in
/// `state` move forward. On a skip nothing changes, except that the very
/// first sample latches its timestamp as the baseline.
pub fn begin_tick(state: &mut FusionState, ingest: &ReadingIngest) -> Result<TickInput, TickSkip> {
    let velocity = ingest.latest_velocity().ok_or(TickSkip::NoVelocity)?;

    let previous_ts = match state.last_velocity_ts {
        Some(ts) => ts,
        None => {
            if velocity.timestamp.is_finite() {
                state.last_velocity_ts = Some(velocity.timestamp);
                return Err(TickSkip::AwaitingBaseline);
            }
            return Err(TickSkip::NonFiniteElapsed);
        }
    };

    let dt = velocity.timestamp - previous_ts;
    if !dt.is_finite() {
        log::debug!("elapsed time since last velocity sample is not finite");
        return Err(TickSkip::NonFiniteElapsed);
    }
    if dt == 0.0 {
        return Err(TickSkip::NoNewSample);
    }
    if dt < 0.0 {
        log::debug!("velocity sample {:.3}s older than last integrated one", -dt);
        return Err(TickSkip::OutOfOrder { dt });
    }

    let attitude = ingest.latched_attitude().clone();
    let yaw = attitude.yaw();
    let dyaw = wrap_angle(yaw - state.prev_yaw);

    state.last_velocity_ts = Some(velocity.timestamp);
    state.prev_yaw = yaw;
    state.prev_roll = attitude.roll();
    state.prev_pitch = attitude.pitch();

    Ok(TickInput {
        timestamp: velocity.timestamp,
        dt,
        dyaw,
        velocity: velocity.clone(),
        attitude,
    })
}

/// Accumulate yaw, then rotate the body velocity with the updated yaw.
pub fn advance(state: &mut FusionState, input: &TickInput) -> Increment {
    state.yaw = wrap_angle(state.yaw + input.dyaw);

    let body = PlanarVec::new(input.velocity.vx, input.velocity.vy);
    let world = body_to_world(state.yaw, body) * input.dt;

    state.x += world.x;
    state.y += world.y;

    Increment {
        dx: world.x,
        dy: world.y,
        dyaw: input.dyaw,
    }
}

/// One full integration step: elapsed-time check plus displacement.
pub fn integrate_tick(
    state: &mut FusionState,
    ingest: &ReadingIngest,
) -> Result<(TickInput, Increment), TickSkip> {
    let input = begin_tick(state, ingest)?;
    let increment = advance(state, &input);
    Ok((input, increment))
}

/// Altitude straight from the flow sensor, which reads exactly zero while
/// the vehicle is not airborne; fall back to the visual fix then.
pub fn altitude(velocity: &VelocitySample, ingest: &ReadingIngest) -> f64 {
    if velocity.altitude == 0.0 {
        ingest.latest_correction().map(|c| c.z).unwrap_or(0.0)
    } else {
        velocity.altitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VisualCorrection;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn primed(ingest: &mut ReadingIngest, state: &mut FusionState, t0: f64) {
        ingest.ingest_velocity(&VelocitySample::new(t0, 0.0, 0.0));
        assert_eq!(begin_tick(state, ingest).unwrap_err(), TickSkip::AwaitingBaseline);
    }

    #[test]
    fn test_no_velocity_is_skip() {
        let ingest = ReadingIngest::new(0.5);
        let mut state = FusionState::default();
        assert_eq!(integrate_tick(&mut state, &ingest).unwrap_err(), TickSkip::NoVelocity);
    }

    #[test]
    fn test_zero_elapsed_time_leaves_state_unchanged() {
        let mut ingest = ReadingIngest::new(0.5);
        let mut state = FusionState::default();
        primed(&mut ingest, &mut state, 1.0);

        ingest.ingest_velocity(&VelocitySample::new(1.1, 1.0, 0.0));
        integrate_tick(&mut state, &ingest).unwrap();
        let before = state.clone();

        assert_eq!(integrate_tick(&mut state, &ingest).unwrap_err(), TickSkip::NoNewSample);
        assert_eq!(state, before);
    }

    #[test]
    fn test_out_of_order_sample_is_skipped() {
        let mut ingest = ReadingIngest::new(0.5);
        let mut state = FusionState::default();
        primed(&mut ingest, &mut state, 2.0);
        ingest.ingest_velocity(&VelocitySample::new(1.5, 1.0, 0.0));
        assert!(matches!(
            integrate_tick(&mut state, &ingest),
            Err(TickSkip::OutOfOrder { .. })
        ));
        assert_eq!(state.last_velocity_ts, Some(2.0));
    }

    #[test]
    fn test_body_velocity_rotated_by_yaw() {
        let mut ingest = ReadingIngest::new(0.5);
        let mut state = FusionState::default();
        primed(&mut ingest, &mut state, 0.0);

        // Yaw to +90°: body-forward becomes world +y
        ingest.ingest_attitude(&AttitudeSample::new(0.0, 0.0, 0.0, 90.0));
        ingest.ingest_velocity(&VelocitySample::new(0.5, 2.0, 0.0));
        let (_, inc) = integrate_tick(&mut state, &ingest).unwrap();

        assert_abs_diff_eq!(inc.dyaw, PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inc.dx, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inc.dy, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_yaw_accumulator_stays_wrapped() {
        let mut ingest = ReadingIngest::new(0.5);
        let mut state = FusionState::default();
        primed(&mut ingest, &mut state, 0.0);

        let mut yaw_deg = 0.0;
        for i in 1..500 {
            // Irregular steps, some crossing the ±180° seam of the attitude stream
            yaw_deg += 37.0 + (i % 7) as f64 * 11.0;
            let reported = ((yaw_deg + 180.0) % 360.0) - 180.0;
            ingest.ingest_attitude(&AttitudeSample::new(i as f64, 0.0, 0.0, reported));
            ingest.ingest_velocity(&VelocitySample::new(i as f64 * 0.05, 0.3, 0.1));
            integrate_tick(&mut state, &ingest).unwrap();
            assert!(state.yaw > -PI && state.yaw <= PI, "yaw {} escaped", state.yaw);
        }
    }

    #[test]
    fn test_altitude_falls_back_to_visual_fix_on_ground() {
        let mut ingest = ReadingIngest::new(0.5);
        let grounded = VelocitySample::new(1.0, 0.0, 0.0);
        assert_eq!(altitude(&grounded, &ingest), 0.0);

        ingest.ingest_correction(&VisualCorrection::new(1.0, 0.0, 0.0, 0.8, 0.0), 1.0);
        assert_eq!(altitude(&grounded, &ingest), 0.8);

        let flying = VelocitySample::new(1.0, 0.0, 0.0).with_altitude(1.2);
        assert_eq!(altitude(&flying, &ingest), 1.2);
    }
}
