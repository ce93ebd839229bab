//! Flat-trim / sensor recalibration collaborator.
//!
//! Must only run while the vehicle lies flat on the ground. The estimator
//! calls it once at startup and once per reset episode and never looks at
//! anything beyond whether the call reported an error.

use std::process::Command;

use crate::error::{EstimatorError, Result};

pub trait Recalibrator: Send {
    fn recalibrate(&mut self) -> Result<()>;
}

/// Does nothing. For replay and for sources that calibrate themselves.
#[derive(Debug, Default)]
pub struct NoopRecalibrator;

impl Recalibrator for NoopRecalibrator {
    fn recalibrate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs an external command, e.g. a service call into the flight controller driver.
#[derive(Debug, Clone)]
pub struct CommandRecalibrator {
    program: String,
    args: Vec<String>,
}

impl CommandRecalibrator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-style command line on whitespace. No quoting support.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl Recalibrator for CommandRecalibrator {
    fn recalibrate(&mut self) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| EstimatorError::Recalibration(format!("{}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EstimatorError::Recalibration(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
