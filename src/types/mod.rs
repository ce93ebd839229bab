pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Optical-flow velocity reading from the dead-reckoning source.
///
/// Linear velocity is expressed in the body frame. `altitude` is the
/// source's own absolute altitude estimate and reads exactly 0.0 while
/// the vehicle is on the ground.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub timestamp: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl VelocitySample {
    pub fn new(timestamp: f64, vx: f64, vy: f64) -> Self {
        Self {
            timestamp,
            vx,
            vy,
            vz: 0.0,
            wx: 0.0,
            wy: 0.0,
            wz: 0.0,
            altitude: 0.0,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_angular(mut self, wx: f64, wy: f64, wz: f64) -> Self {
        self.wx = wx;
        self.wy = wy;
        self.wz = wz;
        self
    }

    /// Only the horizontal components take part in integration.
    pub fn is_finite(&self) -> bool {
        self.vx.is_finite() && self.vy.is_finite()
    }
}

/// Attitude reading, angles in degrees as delivered by the flight controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttitudeSample {
    pub timestamp: f64,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

impl AttitudeSample {
    pub fn new(timestamp: f64, roll_deg: f64, pitch_deg: f64, yaw_deg: f64) -> Self {
        Self { timestamp, roll_deg, pitch_deg, yaw_deg }
    }

    pub fn roll(&self) -> f64 {
        self.roll_deg.to_radians()
    }

    pub fn pitch(&self) -> f64 {
        self.pitch_deg.to_radians()
    }

    pub fn yaw(&self) -> f64 {
        self.yaw_deg.to_radians()
    }

    pub fn is_finite(&self) -> bool {
        self.roll_deg.is_finite() && self.pitch_deg.is_finite() && self.yaw_deg.is_finite()
    }
}

/// Absolute pose fix from the visual localization pipeline.
///
/// `timestamp` is the moment the image was captured, not the moment the
/// fix arrived. `yaw` is already in radians.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualCorrection {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

impl VisualCorrection {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self { timestamp, x, y, z, yaw }
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
            && self.yaw.is_finite()
    }
}

/// Fused output, built fresh on every successful tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedPose {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rot_x: f64,
    pub rot_y: f64,
    pub rot_z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
}

impl FusedPose {
    pub fn is_finite(&self) -> bool {
        [
            self.x, self.y, self.z, self.rot_x, self.rot_y, self.rot_z, self.vx, self.vy,
            self.vz, self.wx, self.wy, self.wz,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
