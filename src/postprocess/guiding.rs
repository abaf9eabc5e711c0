//! Guiding correction across offset positions.
//!
//! Offset steps carry a temporary `telescope:tmpGuideState` describing the
//! guiding wanted at that position (a default plus per-probe overrides).
//! After the sequence is built, [`GuideCorrection`] replaces it with one
//! `telescope:guideWith<PROBE>` setting per required probe, and parks
//! available probes that the observation never uses on the first step.

use super::ConfigPostProcessor;
use crate::config::{SysConfig, Value, TELESCOPE_SYSTEM};
use crate::error::{Result, SequenceError};
use crate::item_key::ItemKey;
use crate::sequence::ConfigSequence;
use crate::types::GuideOption;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Telescope parameter holding the temporary guide state
pub const GUIDE_STATE_PARAM: &str = "tmpGuideState";

const DEFAULT_PARAM: &str = "default";

/// Default guiding at an offset position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DefaultGuide {
    #[default]
    On,
    Off,
}

impl DefaultGuide {
    pub fn option(&self) -> GuideOption {
        match self {
            Self::On => GuideOption::Guide,
            Self::Off => GuideOption::Freeze,
        }
    }
}

/// Guiding wanted at one offset position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideState {
    #[serde(default)]
    pub default: DefaultGuide,
    /// Per-probe settings that differ from the default
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, GuideOption>,
}

impl GuideState {
    pub fn off() -> Self {
        Self {
            default: DefaultGuide::Off,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, probe: impl Into<String>, option: GuideOption) -> Self {
        self.overrides.insert(probe.into(), option);
        self
    }

    /// Encode as a nested step value.
    pub fn to_value(&self) -> Value {
        let mut sys = SysConfig::new(GUIDE_STATE_PARAM).with(DEFAULT_PARAM, self.default.to_string());
        for (probe, option) in &self.overrides {
            sys.put(probe.clone(), option.to_string());
        }
        Value::Nested(sys)
    }

    /// Decode a value written by [`GuideState::to_value`].
    pub fn from_value(value: &Value) -> Option<Self> {
        let sys = value.as_nested()?;
        let default = DefaultGuide::from_str(sys.get(DEFAULT_PARAM)?.as_str()?).ok()?;
        let mut overrides = BTreeMap::new();
        for param in sys.parameters().iter().filter(|p| p.name != DEFAULT_PARAM) {
            let option = GuideOption::from_str(param.value.as_str()?).ok()?;
            overrides.insert(param.name.clone(), option);
        }
        Some(Self { default, overrides })
    }

    /// Setting for `probe` at this position.
    pub fn option_for(&self, probe: &str) -> GuideOption {
        self.overrides
            .get(probe)
            .copied()
            .unwrap_or_else(|| self.default.option())
    }
}

/// Key of the temporary guide state item
pub fn guide_state_key() -> ItemKey {
    ItemKey::new(TELESCOPE_SYSTEM, GUIDE_STATE_PARAM)
}

/// Key of the per-probe setting, e.g. `telescope:guideWithPWFS1`.
pub fn guide_with_key(probe: &str) -> ItemKey {
    ItemKey::new(
        TELESCOPE_SYSTEM,
        format!("guideWith{}", probe.to_uppercase()),
    )
}

/// Replaces temporary guide states with per-probe settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideCorrection {
    /// Probes with a primary guide star assigned
    #[serde(default)]
    pub required: Vec<String>,
    /// Probes available to the observation; unused ones are parked
    #[serde(default)]
    pub available: Vec<String>,
}

impl GuideCorrection {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            available: Vec::new(),
        }
    }

    pub fn with_available<I, S>(mut self, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available = available.into_iter().map(Into::into).collect();
        self
    }

    /// Available probes that no guide star uses.
    pub fn parked_probes(&self) -> Vec<&str> {
        self.available
            .iter()
            .filter(|p| !self.required.contains(p))
            .map(String::as_str)
            .collect()
    }
}

impl ConfigPostProcessor for GuideCorrection {
    fn name(&self) -> &str {
        "guiding"
    }

    fn post_process(&self, sequence: ConfigSequence) -> Result<ConfigSequence> {
        let mut steps = sequence.into_steps();

        if let Some(first) = steps.first_mut() {
            for probe in self.parked_probes() {
                let key = guide_with_key(probe);
                // Settings written by the sequence itself win
                if !first.contains_item(&key) {
                    first.put_item(&key, GuideOption::Park.to_string());
                }
            }
        }

        let state_key = guide_state_key();
        for (index, step) in steps.iter_mut().enumerate() {
            let Some(value) = step.remove_item(&state_key) else {
                continue;
            };
            let state = GuideState::from_value(&value).ok_or_else(|| {
                SequenceError::post_process(
                    self.name(),
                    format!("malformed guide state at step {}", index),
                )
            })?;
            for probe in &self.required {
                step.put_item(&guide_with_key(probe), state.option_for(probe).to_string());
            }
        }

        Ok(ConfigSequence::from_steps(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn offset_step(state: &GuideState) -> Config {
        let mut step = Config::new();
        step.put_parameter(TELESCOPE_SYSTEM, "p", 0.0);
        step.put_parameter(TELESCOPE_SYSTEM, GUIDE_STATE_PARAM, state.to_value());
        step
    }

    #[test]
    fn test_guide_state_value_round_trip() {
        let state = GuideState::off().with_override("pwfs2", GuideOption::Guide);
        assert_eq!(GuideState::from_value(&state.to_value()), Some(state));
        assert_eq!(GuideState::from_value(&Value::from("on")), None);
    }

    #[test]
    fn test_guide_state_replaced_per_required_probe() {
        let correction = GuideCorrection::new(["pwfs1", "oiwfs"]);
        let sequence = ConfigSequence::from_steps(vec![
            offset_step(&GuideState::default()),
            offset_step(&GuideState::off().with_override("oiwfs", GuideOption::Guide)),
        ]);

        let out = correction.post_process(sequence).expect("post process");
        let steps: Vec<&Config> = out.iter().collect();

        assert!(!steps[0].contains_item(&guide_state_key()));
        assert_eq!(
            steps[0].item(&guide_with_key("pwfs1")),
            Some(&Value::from("guide"))
        );
        assert_eq!(
            steps[1].item(&guide_with_key("pwfs1")),
            Some(&Value::from("freeze"))
        );
        assert_eq!(
            steps[1].item(&guide_with_key("oiwfs")),
            Some(&Value::from("guide"))
        );
    }

    #[test]
    fn test_unused_probes_parked_on_first_step() {
        let correction =
            GuideCorrection::new(["pwfs1"]).with_available(["pwfs1", "pwfs2", "oiwfs"]);
        let mut first = offset_step(&GuideState::default());
        first.put_item(&guide_with_key("oiwfs"), "guide");
        let sequence =
            ConfigSequence::from_steps(vec![first, offset_step(&GuideState::default())]);

        let out = correction.post_process(sequence).expect("post process");
        let steps: Vec<&Config> = out.iter().collect();

        assert_eq!(
            steps[0].item(&guide_with_key("pwfs2")),
            Some(&Value::from("park"))
        );
        assert_eq!(
            steps[0].item(&guide_with_key("oiwfs")),
            Some(&Value::from("guide"))
        );
        assert!(!steps[1].contains_item(&guide_with_key("pwfs2")));
    }

    #[test]
    fn test_malformed_guide_state_fails() {
        let mut step = Config::new();
        step.put_parameter(TELESCOPE_SYSTEM, GUIDE_STATE_PARAM, "sideways");
        let err = GuideCorrection::new(["pwfs1"])
            .post_process(ConfigSequence::from_steps(vec![step]))
            .expect_err("malformed state");
        assert!(err.to_string().contains("guiding"));
    }
}
