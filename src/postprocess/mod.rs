//! Whole-sequence rewriting hooks run after a pass completes.
//!
//! Hooks run in a fixed order and each one sees the previous hook's output:
//! static-component hooks in node order, then observation-level hooks, with
//! the guiding correction always last.

pub mod guiding;

use crate::config::{Config, Value, EXPOSURE_TIME, INSTRUMENT_SYSTEM, OBSERVE_SYSTEM};
use crate::error::Result;
use crate::sequence::ConfigSequence;
use crate::types::ReadMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Instrument parameter written by [`ReadModeInjector`]
pub const READ_MODE: &str = "readMode";

/// Rewrites a finished sequence.
pub trait ConfigPostProcessor: fmt::Debug + Send + Sync {
    /// Short name used in errors and logs
    fn name(&self) -> &str;

    fn post_process(&self, sequence: ConfigSequence) -> Result<ConfigSequence>;
}

/// Shared hook handle
pub type HookHandle = Arc<dyn ConfigPostProcessor>;

/// Run hooks in order, threading the sequence through each.
pub fn run_hooks(mut sequence: ConfigSequence, hooks: &[HookHandle]) -> Result<ConfigSequence> {
    for hook in hooks {
        tracing::debug!("Running post-processor {}", hook.name());
        sequence = hook.post_process(sequence)?;
    }
    Ok(sequence)
}

fn default_bright_below() -> f64 {
    1.0
}

fn default_medium_below() -> f64 {
    30.0
}

fn default_system() -> String {
    INSTRUMENT_SYSTEM.to_string()
}

/// Derives the detector read mode from the exposure time in effect.
///
/// The read mode is written only on steps where it changes, matching the
/// delta form of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModeInjector {
    #[serde(default = "default_system")]
    pub system: String,
    /// Exposures shorter than this (seconds) read out in bright mode
    #[serde(default = "default_bright_below")]
    pub bright_below: f64,
    /// Exposures shorter than this (seconds) read out in medium mode
    #[serde(default = "default_medium_below")]
    pub medium_below: f64,
}

impl Default for ReadModeInjector {
    fn default() -> Self {
        Self {
            system: default_system(),
            bright_below: default_bright_below(),
            medium_below: default_medium_below(),
        }
    }
}

impl ReadModeInjector {
    pub fn read_mode(&self, exposure_time: f64) -> ReadMode {
        if exposure_time < self.bright_below {
            ReadMode::Bright
        } else if exposure_time < self.medium_below {
            ReadMode::Medium
        } else {
            ReadMode::Faint
        }
    }

    fn exposure_time(&self, full: &Config) -> Option<f64> {
        full.parameter(&self.system, EXPOSURE_TIME)
            .or_else(|| full.parameter(OBSERVE_SYSTEM, EXPOSURE_TIME))
            .and_then(Value::as_f64)
    }
}

impl ConfigPostProcessor for ReadModeInjector {
    fn name(&self) -> &str {
        "read-mode"
    }

    fn post_process(&self, sequence: ConfigSequence) -> Result<ConfigSequence> {
        let mut full = Config::new();
        let mut last_mode = None;
        let mut steps = sequence.into_steps();
        for step in &mut steps {
            full.merge_from(step);
            let Some(exposure) = self.exposure_time(&full) else {
                continue;
            };
            let mode = self.read_mode(exposure);
            if last_mode != Some(mode) {
                step.put_parameter(&self.system, READ_MODE, mode.to_string());
                last_mode = Some(mode);
            }
        }
        Ok(ConfigSequence::from_steps(steps))
    }
}
