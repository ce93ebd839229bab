use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, Result};

/// Which fusion path produces the published pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Dead reckoning re-based on late visual fixes with delta-queue replay.
    Queued,
    /// Dead reckoning only, integrated from a fixed origin.
    DeadReckoning,
}

impl FusionMode {
    pub fn pose_channel(self) -> &'static str {
        match self {
            Self::Queued => "pose_estimation",
            Self::DeadReckoning => "blind_pose_estimation",
        }
    }

    pub fn reset_complete_channel(self) -> &'static str {
        match self {
            Self::Queued => "end_reset_pose",
            Self::DeadReckoning => "blind_end_reset_pose",
        }
    }

    pub fn uses_corrections(self) -> bool {
        matches!(self, Self::Queued)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub mode: FusionMode,
    /// Prefix under which the flight controller's streams are published.
    pub source_prefix: String,
    pub tick_rate_hz: f64,

    // ── Correction gating ──
    pub staleness_window_secs: f64,
    pub correction_latency_warn_secs: f64,

    // ── Delta queues ──
    pub queue_capacity: usize,

    // ── Reset ──
    pub settling_window_secs: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::Queued,
            source_prefix: String::new(),
            tick_rate_hz: 20.0,
            staleness_window_secs: 0.5,
            correction_latency_warn_secs: 0.25,
            queue_capacity: 200,
            settling_window_secs: 3.0,
        }
    }
}

impl EstimatorConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| EstimatorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| {
            EstimatorError::ConfigParse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "tick_rate_hz must be positive, got {}",
                self.tick_rate_hz
            )));
        }
        if !(self.staleness_window_secs.is_finite() && self.staleness_window_secs >= 0.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "staleness_window_secs must be non-negative, got {}",
                self.staleness_window_secs
            )));
        }
        if !(self.settling_window_secs.is_finite() && self.settling_window_secs >= 0.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "settling_window_secs must be non-negative, got {}",
                self.settling_window_secs
            )));
        }
        if self.queue_capacity == 0 {
            return Err(EstimatorError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_period_secs(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }

    pub fn odometry_channel(&self) -> String {
        format!("{}ardrone/odometry", self.source_prefix)
    }

    pub fn navdata_channel(&self) -> String {
        format!("{}ardrone/navdata", self.source_prefix)
    }
}
