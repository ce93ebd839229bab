//! Latest-sample cells for the three input streams.
//!
//! Handlers write here and nothing else; the tick body is the only reader.
//! Rejected samples leave every cell untouched.

use serde::{Deserialize, Serialize};

use crate::types::{AttitudeSample, VelocitySample, VisualCorrection};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    NonFiniteVelocity,
    NonFiniteAttitude,
    NonFiniteCorrection,
    StaleCorrection { age_secs: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IngestOutcome {
    Accepted,
    Rejected(RejectReason),
    /// A reset is in progress and the sample was discarded.
    Suppressed,
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Clone, Debug)]
pub struct ReadingIngest {
    staleness_window: f64,

    latest_velocity: Option<VelocitySample>,
    latest_attitude: AttitudeSample,
    // Attitude as it was when the latest velocity sample was accepted
    latched_attitude: AttitudeSample,

    latest_correction: Option<VisualCorrection>,
    correction_available: bool,

    stream_active: bool,
    suppressed: bool,
}

impl ReadingIngest {
    pub fn new(staleness_window: f64) -> Self {
        Self {
            staleness_window,
            latest_velocity: None,
            latest_attitude: AttitudeSample::default(),
            latched_attitude: AttitudeSample::default(),
            latest_correction: None,
            correction_available: false,
            stream_active: false,
            suppressed: false,
        }
    }

    pub fn ingest_velocity(&mut self, sample: &VelocitySample) -> IngestOutcome {
        if self.suppressed {
            return IngestOutcome::Suppressed;
        }
        if !sample.is_finite() {
            log::debug!(
                "velocity sample at t={:.3} has non-finite horizontal components, keeping previous",
                sample.timestamp
            );
            return IngestOutcome::Rejected(RejectReason::NonFiniteVelocity);
        }

        self.stream_active = true;
        self.latest_velocity = Some(sample.clone());
        self.latched_attitude = self.latest_attitude.clone();
        IngestOutcome::Accepted
    }

    pub fn ingest_attitude(&mut self, sample: &AttitudeSample) -> IngestOutcome {
        if !sample.is_finite() {
            log::debug!("attitude sample at t={:.3} is not finite", sample.timestamp);
            return IngestOutcome::Rejected(RejectReason::NonFiniteAttitude);
        }
        self.latest_attitude = sample.clone();
        IngestOutcome::Accepted
    }

    /// `now` is the wall-clock (or replay) time at which the fix arrived.
    pub fn ingest_correction(&mut self, sample: &VisualCorrection, now: f64) -> IngestOutcome {
        if self.suppressed {
            return IngestOutcome::Suppressed;
        }
        if !sample.is_finite() {
            log::debug!("visual correction is not finite, disregarded");
            return IngestOutcome::Rejected(RejectReason::NonFiniteCorrection);
        }
        if sample.timestamp < now - self.staleness_window {
            let age_secs = now - sample.timestamp;
            log::debug!("visual correction {:.3}s old, disregarded", age_secs);
            return IngestOutcome::Rejected(RejectReason::StaleCorrection { age_secs });
        }

        self.latest_correction = Some(sample.clone());
        self.correction_available = true;
        IngestOutcome::Accepted
    }

    // ── Tick-side access ─────────────────────────────────────────────────

    pub fn latest_velocity(&self) -> Option<&VelocitySample> {
        self.latest_velocity.as_ref()
    }

    pub fn latest_attitude(&self) -> &AttitudeSample {
        &self.latest_attitude
    }

    pub fn latched_attitude(&self) -> &AttitudeSample {
        &self.latched_attitude
    }

    pub fn latest_correction(&self) -> Option<&VisualCorrection> {
        self.latest_correction.as_ref()
    }

    pub fn correction_available(&self) -> bool {
        self.correction_available
    }

    /// Hand the pending correction to the fusion engine and clear the flag.
    pub fn take_correction(&mut self) -> Option<VisualCorrection> {
        if !self.correction_available {
            return None;
        }
        self.correction_available = false;
        self.latest_correction.clone()
    }

    pub fn stream_active(&self) -> bool {
        self.stream_active
    }

    // ── Reset-side access ────────────────────────────────────────────────

    pub fn set_suppressed(&mut self, suppressed: bool) {
        self.suppressed = suppressed;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Forget the pending fix and any velocity recorded before the reset.
    pub fn clear_for_reset(&mut self) {
        self.latest_correction = None;
        self.correction_available = false;
        self.latest_velocity = None;
        self.latched_attitude = self.latest_attitude.clone();
    }
}
