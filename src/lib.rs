//! Delay-compensated planar pose estimation for a small flying vehicle.
//!
//! Optical-flow velocities are dead-reckoned at a fixed tick rate and
//! periodically re-based on late visual position fixes. Increments recorded
//! since a fix was captured are replayed on top of it, so latency in the
//! vision pipeline does not throw away motion already integrated.

pub mod config;
pub mod delta_queue;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod ingest;
pub mod live_status;
pub mod odometry;
pub mod publisher;
pub mod recalibration;
pub mod reset;
pub mod session;
pub mod sources;
pub mod types;

pub use config::{EstimatorConfig, FusionMode};
pub use error::{EstimatorError, Result};
pub use estimator::{EstimatorStats, Inbound, PoseEstimator, TickOutcome};
pub use odometry::TickSkip;
pub use types::{AttitudeSample, FusedPose, VelocitySample, VisualCorrection};
