//! Planar geometry helpers for the pose estimator
//!
//! Thin aliases over nalgebra so the integrator reads in terms of
//! world/body vectors instead of bare tuples.

use nalgebra::{Rotation2, Vector2};
use std::f64::consts::PI;

pub type PlanarVec = Vector2<f64>;
pub type PlanarRot = Rotation2<f64>;

/// Rotate a body-frame planar vector into the world frame.
pub fn body_to_world(yaw: f64, body: PlanarVec) -> PlanarVec {
    PlanarRot::new(yaw) * body
}

/// Wrap an angle into (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid lands on -π for odd multiples of π
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_body_to_world_quarter_turn() {
        let world = body_to_world(PI / 2.0, PlanarVec::new(1.0, 0.0));
        assert_abs_diff_eq!(world.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(world.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wrap_angle_range() {
        assert_eq!(wrap_angle(PI), PI);
        assert_abs_diff_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_angle(PI + 0.1), -PI + 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-PI - 0.1), PI - 0.1, epsilon = 1e-12);
        for i in -50..50 {
            let a = wrap_angle(i as f64 * 0.77);
            assert!(a > -PI && a <= PI, "{} out of range", a);
        }
    }
}
