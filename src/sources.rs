use std::collections::VecDeque;
use std::f64::consts::PI;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::estimator::Inbound;
use crate::types::{
    body_to_world, wrap_angle, AttitudeSample, PlanarVec, VelocitySample, VisualCorrection,
};

/// Parameters of the simulated flight.
#[derive(Clone, Debug)]
pub struct FlightProfile {
    /// Forward speed in the body frame (m/s)
    pub speed: f64,
    /// Yaw rate (deg/s); the vehicle flies a circle
    pub turn_rate_deg: f64,
    /// Constant bias added to the reported forward velocity (m/s)
    pub velocity_bias: f64,
    pub altitude: f64,
    /// Seconds between visual fixes; 0 disables them
    pub correction_period: f64,
    /// Seconds between image capture and fix delivery
    pub correction_latency: f64,
    /// Seconds between reset triggers; 0 disables them
    pub reset_every: f64,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            speed: 0.5,
            turn_rate_deg: 12.0,
            velocity_bias: 0.04,
            altitude: 1.0,
            correction_period: 0.5,
            correction_latency: 0.3,
            reset_every: 0.0,
        }
    }
}

/// Ground truth plus sensor models for a circling vehicle.
///
/// `step` advances the truth to time `t` and returns whatever the sensors
/// would have emitted by then. Fixes carry their capture time and are held
/// back until `capture + correction_latency`.
pub struct FlightSimulator {
    profile: FlightProfile,
    start: f64,
    last_t: f64,
    x: f64,
    y: f64,
    yaw: f64,
    // Pose at the last reset; fixes are expressed relative to it
    origin: (f64, f64, f64),
    next_correction: f64,
    next_reset: f64,
    in_flight: VecDeque<(f64, VisualCorrection)>,
}

impl FlightSimulator {
    pub fn new(profile: FlightProfile, start: f64) -> Self {
        Self {
            next_correction: start + profile.correction_period,
            next_reset: start + profile.reset_every,
            profile,
            start,
            last_t: start,
            x: 0.0,
            y: 0.0,
            yaw: 0.0,
            origin: (0.0, 0.0, 0.0),
            in_flight: VecDeque::new(),
        }
    }

    pub fn true_position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.yaw)
    }

    pub fn step(&mut self, t: f64) -> Vec<Inbound> {
        let dt = (t - self.last_t).max(0.0);
        self.last_t = t;

        self.yaw = wrap_angle(self.yaw + self.profile.turn_rate_deg.to_radians() * dt);
        self.x += self.profile.speed * self.yaw.cos() * dt;
        self.y += self.profile.speed * self.yaw.sin() * dt;

        let mut out = Vec::with_capacity(3);

        // Flight controller reports yaw in degrees on (-180, 180]
        let wobble = ((t - self.start) * 2.0 * PI * 0.3).sin();
        out.push(Inbound::Attitude(AttitudeSample::new(
            t,
            wobble * 1.5,
            wobble * 0.8,
            self.yaw.to_degrees(),
        )));

        let velocity = VelocitySample::new(t, self.profile.speed + self.profile.velocity_bias, 0.0)
            .with_altitude(self.profile.altitude)
            .with_angular(0.0, 0.0, self.profile.turn_rate_deg.to_radians());
        out.push(Inbound::Velocity(velocity));

        if self.profile.correction_period > 0.0 && t >= self.next_correction {
            let (fx, fy, fyaw) = self.relative_to_origin();
            let fix = VisualCorrection::new(t, fx, fy, self.profile.altitude, fyaw);
            self.in_flight.push_back((t + self.profile.correction_latency, fix));
            self.next_correction += self.profile.correction_period;
        }
        while self.in_flight.front().map_or(false, |(due, _)| *due <= t) {
            if let Some((_, fix)) = self.in_flight.pop_front() {
                out.push(Inbound::Correction(fix));
            }
        }

        if self.profile.reset_every > 0.0 && t >= self.next_reset {
            out.push(Inbound::Reset);
            self.next_reset += self.profile.reset_every;
            // Reset puts the origin back under the vehicle
            self.origin = (self.x, self.y, self.yaw);
            self.in_flight.clear();
        }

        out
    }

    fn relative_to_origin(&self) -> (f64, f64, f64) {
        let (ox, oy, oyaw) = self.origin;
        let offset = body_to_world(-oyaw, PlanarVec::new(self.x - ox, self.y - oy));
        (offset.x, offset.y, wrap_angle(self.yaw - oyaw))
    }
}

/// Simulated sensors at 50 Hz.
pub async fn simulated_flight_loop(tx: Sender<Inbound>, profile: FlightProfile) {
    let mut interval = interval(Duration::from_millis(20));
    let mut sim = FlightSimulator::new(profile, current_timestamp());
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        for message in sim.step(current_timestamp()) {
            match tx.try_send(message) {
                Ok(_) => {
                    sample_count += 1;
                    if sample_count % 500 == 0 {
                        log::debug!("[sim] {} messages", sample_count);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("[sim] channel closed after {} messages", sample_count);
                    return;
                }
                Err(TrySendError::Full(_)) => {
                    // Channel full, drop this sample
                }
            }
        }
    }
}

/// Where the estimator's notion of "now" comes from.
///
/// The simulator stamps samples with wall time. A recorded or piped feed
/// carries its own time base, so the latest velocity timestamp stands in for
/// the clock there; staleness and the settling window are then measured in
/// the feed's time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Clock {
    Wall,
    Stream { latest: Option<f64> },
}

impl Clock {
    pub fn stream() -> Self {
        Self::Stream { latest: None }
    }

    /// Advance the clock on an incoming message. Never moves backwards.
    pub fn observe(&mut self, message: &Inbound) {
        if let (Self::Stream { latest }, Inbound::Velocity(v)) = (self, message) {
            if v.timestamp.is_finite() && latest.map_or(true, |t| v.timestamp > t) {
                *latest = Some(v.timestamp);
            }
        }
    }

    pub fn now(&self) -> f64 {
        match self {
            Self::Wall => current_timestamp(),
            Self::Stream { latest } => latest.unwrap_or(0.0),
        }
    }
}

/// One JSON-encoded `Inbound` message per line on stdin.
///
/// Timestamps may use any time base; pair this source with [`Clock::stream`].
pub async fn stdin_loop(tx: Sender<Inbound>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_count = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::info!("[stdin] end of input after {} lines", line_count);
                break;
            }
            Err(e) => {
                log::warn!("[stdin] read failed: {}", e);
                break;
            }
        };
        line_count += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message = match parse_inbound(trimmed) {
            Some(m) => m,
            None => continue,
        };

        match tx.try_send(message) {
            Ok(_) => {}
            Err(TrySendError::Closed(_)) => break,
            Err(TrySendError::Full(_)) => {
                log::debug!("[stdin] channel full, dropping line {}", line_count);
            }
        }
    }
}

fn parse_inbound(line: &str) -> Option<Inbound> {
    match serde_json::from_str(line) {
        Ok(message) => Some(message),
        Err(e) => {
            log::warn!("[stdin] ignoring malformed message: {}", e);
            None
        }
    }
}

pub fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run(sim: &mut FlightSimulator, from: f64, to: f64) -> Vec<(f64, Inbound)> {
        let mut out = Vec::new();
        let mut t = from;
        while t <= to {
            for m in sim.step(t) {
                out.push((t, m));
            }
            t += 0.02;
        }
        out
    }

    #[test]
    fn test_fixes_arrive_late_with_capture_time() {
        let profile = FlightProfile { correction_latency: 0.3, ..FlightProfile::default() };
        let mut sim = FlightSimulator::new(profile, 0.0);
        let fixes: Vec<(f64, VisualCorrection)> = run(&mut sim, 0.02, 3.0)
            .into_iter()
            .filter_map(|(t, m)| match m {
                Inbound::Correction(c) => Some((t, c)),
                _ => None,
            })
            .collect();

        assert!(fixes.len() >= 4);
        for (arrival, fix) in &fixes {
            assert!(arrival - fix.timestamp >= 0.3 - 1e-9);
            assert!(arrival - fix.timestamp < 0.3 + 0.05);
        }
    }

    #[test]
    fn test_truth_follows_a_circle() {
        let profile = FlightProfile {
            speed: 1.0,
            turn_rate_deg: 90.0,
            correction_period: 0.0,
            ..FlightProfile::default()
        };
        let mut sim = FlightSimulator::new(profile, 0.0);
        for i in 1..=1000 {
            sim.step(i as f64 * 0.001);
        }
        // Quarter circle of radius 2/π
        let r = 2.0 / PI;
        let (x, y, yaw) = sim.true_position();
        assert_abs_diff_eq!(x, r, epsilon = 1e-2);
        assert_abs_diff_eq!(y, r, epsilon = 1e-2);
        assert_abs_diff_eq!(yaw, PI / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_periodic_reset() {
        let profile = FlightProfile { reset_every: 1.0, ..FlightProfile::default() };
        let mut sim = FlightSimulator::new(profile, 0.0);
        let resets = run(&mut sim, 0.02, 3.5)
            .into_iter()
            .filter(|(_, m)| *m == Inbound::Reset)
            .count();
        assert_eq!(resets, 3);
    }

    #[test]
    fn test_stream_clock_follows_velocity() {
        let mut clock = Clock::stream();
        assert_eq!(clock.now(), 0.0);
        clock.observe(&Inbound::Velocity(VelocitySample::new(12.5, 0.0, 0.0)));
        clock.observe(&Inbound::Correction(VisualCorrection::new(99.0, 0.0, 0.0, 0.0, 0.0)));
        assert_eq!(clock.now(), 12.5);
        // Late sample does not rewind it
        clock.observe(&Inbound::Velocity(VelocitySample::new(12.0, 0.0, 0.0)));
        assert_eq!(clock.now(), 12.5);
    }

    #[test]
    fn test_feed_time_base_keeps_fixes_fresh() {
        use crate::config::EstimatorConfig;
        use crate::estimator::PoseEstimator;
        use crate::recalibration::NoopRecalibrator;

        // Feed stamped from its own epoch, far from wall time
        let feed = [
            Inbound::Velocity(VelocitySample::new(100.0, 1.0, 0.0)),
            Inbound::Velocity(VelocitySample::new(100.2, 1.0, 0.0)),
            Inbound::Correction(VisualCorrection::new(99.9, 3.0, 0.0, 0.0, 0.0)),
        ];
        let mut clock = Clock::stream();
        let mut est = PoseEstimator::new(EstimatorConfig::default(), Box::new(NoopRecalibrator));
        for message in &feed {
            clock.observe(message);
            assert!(est.handle(message, clock.now()).is_accepted());
        }

        let mut wall = PoseEstimator::new(EstimatorConfig::default(), Box::new(NoopRecalibrator));
        assert!(!wall.handle(&feed[2], Clock::Wall.now()).is_accepted());
    }

    #[test]
    fn test_malformed_line_is_ignored() {
        assert!(parse_inbound("not json").is_none());
        assert_eq!(parse_inbound(r#"{"type":"reset"}"#), Some(Inbound::Reset));
    }
}
