//! Session recording: every inbound message and every tick, in the order the
//! live loop saw them, so a run can be replayed through a fresh estimator.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::estimator::{EstimatorStats, Inbound};
use crate::types::FusedPose;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message handed to the estimator at `time`.
    Input { time: f64, message: Inbound },
    /// Startup sequence ran (stream became active).
    Start { time: f64 },
    /// A tick at `time`; `pose` is what it published, if anything.
    Tick { time: f64, pose: Option<FusedPose> },
}

impl SessionEvent {
    pub fn time(&self) -> f64 {
        match self {
            Self::Input { time, .. } | Self::Start { time } | Self::Tick { time, .. } => *time,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionLog {
    pub config: EstimatorConfig,
    pub started_at: String,
    pub events: Vec<SessionEvent>,
    #[serde(default)]
    pub stats: EstimatorStats,
}

impl SessionLog {
    pub fn new(config: EstimatorConfig, started_at: impl Into<String>) -> Self {
        Self {
            config,
            started_at: started_at.into(),
            events: Vec::new(),
            stats: EstimatorStats::default(),
        }
    }

    pub fn record_input(&mut self, time: f64, message: Inbound) {
        self.events.push(SessionEvent::Input { time, message });
    }

    pub fn record_start(&mut self, time: f64) {
        self.events.push(SessionEvent::Start { time });
    }

    pub fn record_tick(&mut self, time: f64, pose: Option<FusedPose>) {
        self.events.push(SessionEvent::Tick { time, pose });
    }

    pub fn tick_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Tick { .. }))
            .count()
    }

    /// Pretty JSON, gzip-compressed when the path ends in `.gz`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer_pretty(&mut gz, self)?;
            gz.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if is_gzip(path) {
            let reader = BufReader::new(GzDecoder::new(file));
            Ok(serde_json::from_reader(reader)?)
        } else {
            let reader = BufReader::new(file);
            Ok(serde_json::from_reader(reader)?)
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}
