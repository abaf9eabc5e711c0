//! Apply-once builder for static observation components.

use super::{Phase, SequenceBuilder};
use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::options::SequenceOptions;
use crate::tree::{NodeKey, StaticComponent};
use std::sync::Arc;

/// Writes a static component's configuration once per pass.
pub struct StaticBuilder {
    component: Arc<StaticComponent>,
    phase: Phase,
    applied: bool,
}

impl StaticBuilder {
    pub fn new(component: Arc<StaticComponent>) -> Self {
        Self {
            component,
            phase: Phase::Unreset,
            applied: false,
        }
    }

    fn has_values(&self) -> bool {
        self.component.config().is_some_and(|c| !c.is_empty())
    }
}

impl SequenceBuilder for StaticBuilder {
    fn node_key(&self) -> &NodeKey {
        self.component.key()
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn reset(&mut self, _options: &SequenceOptions) -> Result<()> {
        self.applied = false;
        self.phase = Phase::Ready;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        self.phase.require_reset(self.node_key())?;
        let more = !self.applied && self.has_values();
        self.phase = self.phase.after_poll(more);
        Ok(more)
    }

    fn apply_next(&mut self, step: &mut Config, _prior_full: &Config) -> Result<()> {
        self.phase.require_applicable(self.node_key())?;
        if self.applied {
            return Err(ProtocolError::Exhausted {
                node: self.node_key().clone(),
            }
            .into());
        }
        if let Some(config) = self.component.config() {
            for sys in config.systems() {
                step.put_system(sys.clone());
            }
        }
        self.applied = true;
        self.phase = Phase::InProgress { child: None };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SysConfig, Value};

    #[test]
    fn test_applies_once_per_pass() {
        let mut config = Config::new();
        config.put_system(SysConfig::new("instrument").with("filter", "J"));
        let component = Arc::new(StaticComponent::new("instrument", config));
        let mut builder = StaticBuilder::new(component);

        assert!(builder.has_next().is_err());
        for _ in 0..2 {
            builder.reset(&SequenceOptions::new()).expect("reset");
            assert!(builder.has_next().expect("has_next"));
            let mut step = Config::new();
            builder.apply_next(&mut step, &Config::new()).expect("apply");
            assert_eq!(
                step.parameter("instrument", "filter"),
                Some(&Value::from("J"))
            );
            assert!(!builder.has_next().expect("has_next"));
        }
    }

    #[test]
    fn test_empty_config_has_no_steps() {
        let component = Arc::new(StaticComponent::new("notes", Config::new()));
        let mut builder = StaticBuilder::new(component);
        builder.reset(&SequenceOptions::new()).expect("reset");
        assert!(!builder.has_next().expect("has_next"));
    }
}
