use serde::{Deserialize, Serialize};

/// Where the reset sequence currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResetPhase {
    Idle,
    /// Signal received, handled at the next tick.
    PendingReset,
    /// Accumulators are held at zero until `deadline`.
    Settling { deadline: f64 },
}

impl ResetPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PendingReset => "PendingReset",
            Self::Settling { .. } => "Settling",
        }
    }
}

/// What the tick loop has to do for the reset this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetAction {
    /// No reset in progress, fuse normally.
    None,
    /// Recalibrate, zero the accumulators and start settling.
    Begin,
    /// Still settling: re-apply the zeroing, publish nothing.
    Hold,
    /// Settling window elapsed: announce completion and resume.
    Complete,
}

/// Idle → PendingReset → Settling → Idle.
///
/// There is no failure state; once requested, a reset always completes.
pub struct ResetController {
    phase: ResetPhase,
    settling_window: f64,
}

impl ResetController {
    pub fn new(settling_window: f64) -> Self {
        Self {
            phase: ResetPhase::Idle,
            settling_window,
        }
    }

    /// Returns false when a reset was already pending.
    pub fn request(&mut self) -> bool {
        if self.phase == ResetPhase::PendingReset {
            return false;
        }
        self.phase = ResetPhase::PendingReset;
        true
    }

    pub fn poll(&mut self, now: f64) -> ResetAction {
        match self.phase {
            ResetPhase::Idle => ResetAction::None,
            ResetPhase::PendingReset => {
                self.phase = ResetPhase::Settling {
                    deadline: now + self.settling_window,
                };
                ResetAction::Begin
            }
            ResetPhase::Settling { deadline } => {
                if now >= deadline {
                    self.phase = ResetPhase::Idle;
                    ResetAction::Complete
                } else {
                    ResetAction::Hold
                }
            }
        }
    }

    /// True from the request until completion; ingest is suppressed meanwhile.
    pub fn is_active(&self) -> bool {
        self.phase != ResetPhase::Idle
    }

    pub fn phase(&self) -> ResetPhase {
        self.phase
    }
}
