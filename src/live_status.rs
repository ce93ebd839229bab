use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::estimator::{EstimatorSnapshot, EstimatorStats};
use crate::sources::current_timestamp;
use crate::types::FusedPose;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub mode: String,
    pub uptime_seconds: u64,
    pub stream_active: bool,
    pub reset_phase: String,
    pub ingest_suppressed: bool,
    // Counters
    pub velocity_accepted: u64,
    pub velocity_rejected: u64,
    pub attitude_accepted: u64,
    pub attitude_rejected: u64,
    pub corrections_accepted: u64,
    pub corrections_rejected: u64,
    pub corrections_applied: u64,
    pub suppressed_samples: u64,
    pub ticks_published: u64,
    pub ticks_skipped: u64,
    pub resets_completed: u64,
    pub recalibration_failures: u64,
    pub max_correction_latency_secs: f64,
    // Fusion state
    pub delta_queue_len: usize,
    pub heading_deg: f64,
    pub last_pose: Option<FusedPose>,
}

impl LiveStatus {
    pub fn from_snapshot(snapshot: &EstimatorSnapshot, uptime_seconds: u64) -> Self {
        let EstimatorStats {
            velocity_accepted,
            velocity_rejected,
            attitude_accepted,
            attitude_rejected,
            corrections_accepted,
            corrections_rejected,
            corrections_applied,
            suppressed,
            ticks_published,
            ticks_skipped,
            resets_completed,
            recalibration_failures,
            max_correction_latency_secs,
            ..
        } = snapshot.stats;

        Self {
            timestamp: current_timestamp(),
            mode: format!("{:?}", snapshot.mode),
            uptime_seconds,
            stream_active: snapshot.stream_active,
            reset_phase: snapshot.reset_phase.label().to_string(),
            ingest_suppressed: snapshot.ingest_suppressed,
            velocity_accepted,
            velocity_rejected,
            attitude_accepted,
            attitude_rejected,
            corrections_accepted,
            corrections_rejected,
            corrections_applied,
            suppressed_samples: suppressed,
            ticks_published,
            ticks_skipped,
            resets_completed,
            recalibration_failures,
            max_correction_latency_secs,
            delta_queue_len: snapshot.queue_len,
            heading_deg: snapshot.state.yaw.to_degrees(),
            last_pose: snapshot.last_pose.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorConfig;
    use crate::estimator::PoseEstimator;
    use crate::recalibration::NoopRecalibrator;
    use crate::types::VelocitySample;

    #[test]
    fn test_status_reflects_estimator() {
        let mut est = PoseEstimator::new(EstimatorConfig::default(), Box::new(NoopRecalibrator));
        est.ingest_velocity(&VelocitySample::new(0.0, 0.0, 0.0));
        est.ingest_velocity(&VelocitySample::new(0.1, f64::NAN, 0.0));
        est.request_reset();

        let status = LiveStatus::from_snapshot(&est.snapshot(), 7);
        assert_eq!(status.velocity_accepted, 1);
        assert_eq!(status.velocity_rejected, 1);
        assert_eq!(status.reset_phase, "PendingReset");
        assert!(status.ingest_suppressed);
        assert_eq!(status.mode, "Queued");
        assert_eq!(status.uptime_seconds, 7);
        assert!(status.stream_active);
        assert!(status.last_pose.is_none());

        let path = std::env::temp_dir().join("pose_live_status_test.json");
        status.save(&path).unwrap();
        let back: LiveStatus = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.velocity_accepted, 1);
        let _ = std::fs::remove_file(&path);
    }
}
