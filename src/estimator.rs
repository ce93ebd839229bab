// estimator.rs: Tick-driven pose estimator
//
// Owns the ingest cells, the fusion engine and the reset controller. Input
// handlers only write samples; all fusion happens in `tick`, which the host
// loop calls at a fixed rate. Nothing here touches tokio, files or stdout,
// so the same code runs live, in replay and under test.

use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, FusionMode};
use crate::fusion::{AppliedCorrection, FusionEngine, FusionState};
use crate::ingest::{IngestOutcome, ReadingIngest};
use crate::odometry::TickSkip;
use crate::recalibration::Recalibrator;
use crate::reset::{ResetAction, ResetController, ResetPhase};
use crate::types::{AttitudeSample, FusedPose, VelocitySample, VisualCorrection};

// ─── Messages ────────────────────────────────────────────────────────────────

/// One inbound message from any of the four input streams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Velocity(VelocitySample),
    Attitude(AttitudeSample),
    Correction(VisualCorrection),
    Reset,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Published {
        pose: FusedPose,
        correction: Option<AppliedCorrection>,
    },
    Skipped(TickSkip),
    /// Reset in progress, nothing to publish.
    Resetting,
    /// Settling window just elapsed. Emitted once per reset episode.
    ResetComplete,
}

// ─── Counters ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatorStats {
    pub velocity_accepted: u64,
    pub velocity_rejected: u64,
    pub attitude_accepted: u64,
    pub attitude_rejected: u64,
    pub corrections_accepted: u64,
    pub corrections_rejected: u64,
    pub corrections_applied: u64,
    pub suppressed: u64,
    pub ticks_published: u64,
    pub ticks_skipped: u64,
    pub resets_requested: u64,
    pub resets_completed: u64,
    pub recalibration_failures: u64,
    pub max_correction_latency_secs: f64,
}

#[derive(Clone, Debug)]
pub struct EstimatorSnapshot {
    pub mode: FusionMode,
    pub reset_phase: ResetPhase,
    pub ingest_suppressed: bool,
    pub stream_active: bool,
    pub state: FusionState,
    pub queue_len: usize,
    pub last_pose: Option<FusedPose>,
    pub stats: EstimatorStats,
}

// ─── The estimator ───────────────────────────────────────────────────────────

pub struct PoseEstimator {
    config: EstimatorConfig,
    ingest: ReadingIngest,
    engine: FusionEngine,
    reset: ResetController,
    recalibrator: Box<dyn Recalibrator>,
    stats: EstimatorStats,
    last_pose: Option<FusedPose>,
}

impl PoseEstimator {
    pub fn new(config: EstimatorConfig, recalibrator: Box<dyn Recalibrator>) -> Self {
        Self {
            ingest: ReadingIngest::new(config.staleness_window_secs),
            engine: FusionEngine::new(config.mode, config.queue_capacity),
            reset: ResetController::new(config.settling_window_secs),
            recalibrator,
            stats: EstimatorStats::default(),
            last_pose: None,
            config,
        }
    }

    // ── Input handlers ───────────────────────────────────────────────────

    pub fn ingest_velocity(&mut self, sample: &VelocitySample) -> IngestOutcome {
        let outcome = self.ingest.ingest_velocity(sample);
        self.count(outcome, |s| &mut s.velocity_accepted, |s| &mut s.velocity_rejected);
        outcome
    }

    pub fn ingest_attitude(&mut self, sample: &AttitudeSample) -> IngestOutcome {
        let outcome = self.ingest.ingest_attitude(sample);
        self.count(outcome, |s| &mut s.attitude_accepted, |s| &mut s.attitude_rejected);
        outcome
    }

    pub fn ingest_correction(&mut self, sample: &VisualCorrection, now: f64) -> IngestOutcome {
        let outcome = self.ingest.ingest_correction(sample, now);
        self.count(outcome, |s| &mut s.corrections_accepted, |s| &mut s.corrections_rejected);
        outcome
    }

    /// Reset signal. Accumulators and the pending fix are zeroed right away
    /// and ingest is suppressed; recalibration and settling start at the next tick.
    pub fn request_reset(&mut self) {
        if self.reset.request() {
            log::info!("reset requested");
            self.stats.resets_requested += 1;
        }
        self.ingest.set_suppressed(true);
        self.apply_reset();
    }

    /// Dispatch a message from any stream. `now` is its arrival time.
    pub fn handle(&mut self, message: &Inbound, now: f64) -> IngestOutcome {
        match message {
            Inbound::Velocity(v) => self.ingest_velocity(v),
            Inbound::Attitude(a) => self.ingest_attitude(a),
            Inbound::Correction(c) => self.ingest_correction(c, now),
            Inbound::Reset => {
                self.request_reset();
                IngestOutcome::Accepted
            }
        }
    }

    fn count(
        &mut self,
        outcome: IngestOutcome,
        accepted: fn(&mut EstimatorStats) -> &mut u64,
        rejected: fn(&mut EstimatorStats) -> &mut u64,
    ) {
        match outcome {
            IngestOutcome::Accepted => *accepted(&mut self.stats) += 1,
            IngestOutcome::Rejected(_) => *rejected(&mut self.stats) += 1,
            IngestOutcome::Suppressed => self.stats.suppressed += 1,
        }
    }

    // ── Startup ──────────────────────────────────────────────────────────

    /// True once the dead-reckoning stream delivered a valid sample.
    pub fn stream_active(&self) -> bool {
        self.ingest.stream_active()
    }

    /// Startup sequence once the stream is active: flat trim, then zero everything.
    pub fn start(&mut self) {
        self.recalibrate();
        self.apply_reset();
        log::info!(
            "pose estimator started in {:?} mode (visual fixes {}), yaw reference {:.1}°",
            self.config.mode,
            if self.config.mode.uses_corrections() { "fused" } else { "altitude only" },
            self.engine.state().yaw_reference.to_degrees()
        );
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    pub fn tick(&mut self, now: f64) -> TickOutcome {
        match self.reset.poll(now) {
            ResetAction::None => {}
            ResetAction::Begin => {
                log::info!("reset: recalibrating and zeroing pose");
                self.recalibrate();
                self.apply_reset();
                return TickOutcome::Resetting;
            }
            ResetAction::Hold => {
                self.apply_reset();
                return TickOutcome::Resetting;
            }
            ResetAction::Complete => {
                self.ingest.set_suppressed(false);
                self.stats.resets_completed += 1;
                log::info!("reset complete");
                return TickOutcome::ResetComplete;
            }
        }

        match self.engine.fuse(&mut self.ingest) {
            Ok(output) => {
                if let Some(applied) = output.correction.as_ref() {
                    self.stats.corrections_applied += 1;
                    if applied.latency_secs > self.stats.max_correction_latency_secs {
                        self.stats.max_correction_latency_secs = applied.latency_secs;
                    }
                    if applied.latency_secs > self.config.correction_latency_warn_secs {
                        log::warn!(
                            "visual fix applied {:.3}s after capture",
                            applied.latency_secs
                        );
                    }
                }
                self.stats.ticks_published += 1;
                self.last_pose = Some(output.pose.clone());
                TickOutcome::Published {
                    pose: output.pose,
                    correction: output.correction,
                }
            }
            Err(skip) => {
                self.stats.ticks_skipped += 1;
                log::trace!("tick skipped: {:?}", skip);
                TickOutcome::Skipped(skip)
            }
        }
    }

    fn recalibrate(&mut self) {
        // Fire and forget: a failed flat trim never blocks the reset
        if let Err(e) = self.recalibrator.recalibrate() {
            self.stats.recalibration_failures += 1;
            log::warn!("{}, continuing with current calibration", e);
        }
    }

    fn apply_reset(&mut self) {
        self.ingest.clear_for_reset();
        let attitude = self.ingest.latest_attitude().clone();
        self.engine.reset(&attitude);
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &EstimatorStats {
        &self.stats
    }

    pub fn reset_phase(&self) -> ResetPhase {
        self.reset.phase()
    }

    pub fn correction_available(&self) -> bool {
        self.ingest.correction_available()
    }

    pub fn fusion_state(&self) -> &FusionState {
        self.engine.state()
    }

    pub fn snapshot(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            mode: self.engine.mode(),
            reset_phase: self.reset.phase(),
            ingest_suppressed: self.ingest.is_suppressed(),
            stream_active: self.ingest.stream_active(),
            state: self.engine.state().clone(),
            queue_len: self.engine.queues().dx.len(),
            last_pose: self.last_pose.clone(),
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EstimatorError, Result};
    use crate::recalibration::NoopRecalibrator;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRecalibrator {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Recalibrator for CountingRecalibrator {
        fn recalibrate(&mut self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EstimatorError::Recalibration("service unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn started(config: EstimatorConfig) -> PoseEstimator {
        let mut est = PoseEstimator::new(config, Box::new(NoopRecalibrator));
        assert_eq!(
            est.tick(0.0),
            TickOutcome::Skipped(TickSkip::NoVelocity)
        );
        est.ingest_velocity(&VelocitySample::new(0.0, 0.0, 0.0));
        assert!(est.stream_active());
        est.start();
        assert_eq!(est.tick(0.0), TickOutcome::Skipped(TickSkip::NoVelocity));
        est.ingest_velocity(&VelocitySample::new(0.0, 0.0, 0.0));
        assert_eq!(est.tick(0.0), TickOutcome::Skipped(TickSkip::AwaitingBaseline));
        est
    }

    /// Velocity at `t`, then one tick at `t`.
    fn step(est: &mut PoseEstimator, t: f64, vx: f64, vy: f64) -> TickOutcome {
        est.ingest_velocity(&VelocitySample::new(t, vx, vy));
        est.tick(t)
    }

    fn published_x(outcome: &TickOutcome) -> f64 {
        match outcome {
            TickOutcome::Published { pose, .. } => pose.x,
            other => panic!("expected a pose, got {:?}", other),
        }
    }

    #[test]
    fn test_end_to_end_straight_flight_then_late_fix() {
        let mut est = started(EstimatorConfig::default());

        let mut last = TickOutcome::Resetting;
        for i in 1..=20 {
            last = step(&mut est, i as f64 * 0.05, 1.0, 0.0);
        }
        assert_abs_diff_eq!(published_x(&last), 1.0, epsilon = 1e-9);
        if let TickOutcome::Published { pose, .. } = &last {
            assert_abs_diff_eq!(pose.y, 0.0);
        }

        // Fix captured just under 0.5 s before it arrived, at x = 5.0
        est.ingest_correction(&VisualCorrection::new(0.49, 5.0, 0.0, 0.0, 0.0), 0.98);
        let out = step(&mut est, 1.05, 0.0, 0.0);

        // 11 increments of 0.05 were recorded after t = 0.49
        assert_abs_diff_eq!(published_x(&out), 5.55, epsilon = 1e-9);
        assert_eq!(est.stats().corrections_applied, 1);
        assert!(!est.correction_available());
    }

    #[test]
    fn test_zero_elapsed_tick_publishes_nothing() {
        let mut est = started(EstimatorConfig::default());
        step(&mut est, 0.05, 1.0, 0.0);
        let state = est.fusion_state().clone();
        assert_eq!(est.tick(0.1), TickOutcome::Skipped(TickSkip::NoNewSample));
        assert_eq!(est.fusion_state(), &state);
        assert_eq!(est.stats().ticks_published, 1);
    }

    #[test]
    fn test_reset_sequence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recal = CountingRecalibrator { calls: calls.clone(), fail: false };
        let mut est = PoseEstimator::new(EstimatorConfig::default(), Box::new(recal));
        est.ingest_velocity(&VelocitySample::new(0.0, 0.0, 0.0));
        est.start();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        est.ingest_velocity(&VelocitySample::new(0.0, 0.0, 0.0));
        est.tick(0.0);
        for i in 1..=10 {
            step(&mut est, i as f64 * 0.05, 1.0, 1.0);
        }
        est.ingest_correction(&VisualCorrection::new(0.5, 2.0, 2.0, 1.0, 0.3), 0.5);
        assert!(est.correction_available());

        est.ingest_attitude(&AttitudeSample::new(0.5, 0.0, 0.0, 30.0));
        est.request_reset();
        // Zeroed before any tick runs
        let state = est.fusion_state();
        assert_eq!((state.x, state.y, state.yaw), (0.0, 0.0, 0.0));
        assert_eq!(state.baseline, VisualCorrection::default());
        assert!(!est.correction_available());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        est.request_reset();
        assert_eq!(est.stats().resets_requested, 1);

        // Incoming data is discarded straight away
        assert_eq!(
            est.ingest_velocity(&VelocitySample::new(0.55, 5.0, 0.0)),
            IngestOutcome::Suppressed
        );

        assert_eq!(est.tick(0.55), TickOutcome::Resetting);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let state = est.fusion_state();
        assert_eq!((state.x, state.y, state.yaw), (0.0, 0.0, 0.0));
        assert_abs_diff_eq!(state.yaw_reference, 30f64.to_radians());
        assert!(!est.correction_available());

        // Late fix during settling is dropped and the accumulators stay zeroed
        assert_eq!(
            est.ingest_correction(&VisualCorrection::new(1.0, 9.0, 9.0, 1.0, 0.0), 1.0),
            IngestOutcome::Suppressed
        );
        let mut completions = 0;
        let mut t = 0.6;
        while t < 4.0 {
            match est.tick(t) {
                TickOutcome::ResetComplete => completions += 1,
                TickOutcome::Resetting => {
                    assert_eq!(est.fusion_state().x, 0.0);
                }
                other => {
                    assert!(completions == 1, "unexpected {:?} before completion", other);
                }
            }
            t += 0.05;
        }
        assert_eq!(completions, 1);
        assert_eq!(est.stats().resets_completed, 1);
        assert_eq!(est.reset_phase(), ResetPhase::Idle);

        // Ingestion resumes: baseline sample, then motion from the origin
        assert!(est.ingest_velocity(&VelocitySample::new(4.0, 1.0, 0.0)).is_accepted());
        assert_eq!(est.tick(4.0), TickOutcome::Skipped(TickSkip::AwaitingBaseline));
        let out = step(&mut est, 4.05, 1.0, 0.0);
        assert_abs_diff_eq!(published_x(&out), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_failed_recalibration_does_not_block_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recal = CountingRecalibrator { calls: calls.clone(), fail: true };
        let config = EstimatorConfig { settling_window_secs: 0.1, ..EstimatorConfig::default() };
        let mut est = PoseEstimator::new(config, Box::new(recal));

        est.request_reset();
        assert_eq!(est.tick(1.0), TickOutcome::Resetting);
        assert_eq!(est.tick(1.2), TickOutcome::ResetComplete);
        assert_eq!(est.stats().recalibration_failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_dispatches_messages() {
        let mut est = PoseEstimator::new(EstimatorConfig::default(), Box::new(NoopRecalibrator));
        est.handle(&Inbound::Velocity(VelocitySample::new(1.0, 0.1, 0.0)), 1.0);
        est.handle(&Inbound::Attitude(AttitudeSample::new(1.0, 0.0, 0.0, 10.0)), 1.0);
        est.handle(&Inbound::Correction(VisualCorrection::new(0.1, 0.0, 0.0, 0.0, 0.0)), 1.0);
        assert_eq!(est.stats().velocity_accepted, 1);
        assert_eq!(est.stats().attitude_accepted, 1);
        assert_eq!(est.stats().corrections_rejected, 1);

        est.handle(&Inbound::Reset, 1.0);
        assert_eq!(est.reset_phase(), ResetPhase::PendingReset);
        let snap = est.snapshot();
        assert!(snap.ingest_suppressed);
        assert_eq!(snap.mode, FusionMode::Queued);
        assert_eq!(snap.queue_len, 0);
    }

    #[test]
    fn test_inbound_json_shape() {
        let msg: Inbound = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(msg, Inbound::Reset);
        let msg: Inbound = serde_json::from_str(
            r#"{"type":"correction","timestamp":2.0,"x":1.0,"y":2.0,"z":0.5,"yaw":0.1}"#,
        )
        .unwrap();
        assert_eq!(msg, Inbound::Correction(VisualCorrection::new(2.0, 1.0, 2.0, 0.5, 0.1)));
    }
}
