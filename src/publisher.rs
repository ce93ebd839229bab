//! Output side: fused poses and reset-complete notifications.

use std::io::Write;

use serde::Serialize;

use crate::config::FusionMode;
use crate::error::Result;
use crate::types::FusedPose;

pub trait PoseSink {
    fn publish_pose(&mut self, pose: &FusedPose) -> Result<()>;
    fn publish_reset_complete(&mut self, timestamp: f64) -> Result<()>;
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    channel: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct ResetComplete {
    timestamp: f64,
}

/// One JSON object per line, tagged with the channel it belongs to.
pub struct JsonLinesSink<W: Write> {
    out: W,
    pose_channel: &'static str,
    reset_channel: &'static str,
    published: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W, mode: FusionMode) -> Self {
        Self {
            out,
            pose_channel: mode.pose_channel(),
            reset_channel: mode.reset_complete_channel(),
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line<T: Serialize>(&mut self, channel: &str, body: T) -> Result<()> {
        let line = serde_json::to_string(&Envelope { channel, body })?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        self.published += 1;
        Ok(())
    }
}

impl<W: Write> PoseSink for JsonLinesSink<W> {
    fn publish_pose(&mut self, pose: &FusedPose) -> Result<()> {
        let channel = self.pose_channel;
        self.write_line(channel, pose)
    }

    fn publish_reset_complete(&mut self, timestamp: f64) -> Result<()> {
        let channel = self.reset_channel;
        self.write_line(channel, ResetComplete { timestamp })
    }
}
