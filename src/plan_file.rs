//! Observation plan files for saving and loading expansion inputs.
//!
//! A plan is a JSON document describing one observation: its static
//! components, its sequence trees, execution history and the options of the
//! pass. Enumerated values (observe types, classes, calibration categories)
//! are typed, so a plan with a misspelled value fails to parse.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::calibration::{InMemoryCalibrationProvider, ParameterKeyExtractor};
use crate::config::Config;
use crate::execution::{ExecutionRecord, ObservationContext};
use crate::options::SequenceOptions;
use crate::postprocess::guiding::GuideCorrection;
use crate::postprocess::ReadModeInjector;
use crate::source::StepSource;
use crate::tree::{NodeKey, ObservationNode, ProgramInfo, SequenceNode, StaticComponent};

/// An apply-once component of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    /// Derive the read mode from exposure times after the pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_mode: Option<ReadModeInjector>,
}

/// One node of a sequence tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StepSource>,
    /// Annotation nodes carry notes only and never produce steps
    #[serde(default)]
    pub annotation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    fn to_node(&self) -> SequenceNode {
        let key = self
            .key
            .as_ref()
            .map(NodeKey::new)
            .unwrap_or_else(NodeKey::generate);
        if self.annotation {
            return SequenceNode::annotation(key);
        }
        SequenceNode::new(key, self.source.clone())
            .with_children(self.children.iter().map(NodeSpec::to_node))
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a NodeSpec>) {
        out.push(self);
        for child in &self.children {
            child.visit(out);
        }
    }
}

/// Pass options stored in the plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    #[serde(default)]
    pub collapse_repeats: bool,
    #[serde(default)]
    pub add_observation_count: bool,
}

/// Observation plan that can be saved/loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    /// Steps are decorated with data labels when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    #[serde(default)]
    pub program: ProgramInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub science_band: Option<u32>,

    #[serde(default)]
    pub static_components: Vec<StaticSpec>,
    #[serde(default)]
    pub sequence: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guiding: Option<GuideCorrection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,

    #[serde(default)]
    pub options: PlanOptions,
    /// Instrument parameters that select calibrations
    #[serde(default)]
    pub calibration_key: Vec<String>,
    /// JSON calibration table; relative paths resolve against the plan file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_table: Option<PathBuf>,
}

impl PlanFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the plan to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write plan to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load a plan from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read plan from {:?}", path.as_ref()))?;

        let mut plan: Self =
            serde_json::from_str(&content).context("Failed to parse plan JSON")?;

        if let (Some(table), Some(dir)) = (&plan.calibration_table, path.as_ref().parent()) {
            if table.is_relative() {
                plan.calibration_table = Some(dir.join(table));
            }
        }
        Ok(plan)
    }

    fn nodes(&self) -> Vec<&NodeSpec> {
        let mut nodes = Vec::new();
        for root in &self.sequence {
            root.visit(&mut nodes);
        }
        nodes
    }

    /// Validate the plan
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.observation_id {
            if id.trim().is_empty() {
                anyhow::bail!("Observation id must not be blank");
            }
        }

        // Node keys identify steps in metadata and must be unique
        let mut keys = BTreeSet::new();
        for component in &self.static_components {
            if component.name.trim().is_empty() {
                anyhow::bail!("Static components must be named");
            }
            if let Some(key) = &component.key {
                if !keys.insert(key.as_str()) {
                    anyhow::bail!("Duplicate node key '{}'", key);
                }
            }
            if let Some(read_mode) = &component.read_mode {
                if read_mode.bright_below > read_mode.medium_below {
                    anyhow::bail!(
                        "Read mode thresholds of '{}' are out of order",
                        component.name
                    );
                }
            }
        }

        for node in self.nodes() {
            if let Some(key) = &node.key {
                if key.trim().is_empty() {
                    anyhow::bail!("Node keys must not be blank");
                }
                if !keys.insert(key.as_str()) {
                    anyhow::bail!("Duplicate node key '{}'", key);
                }
            }
            if let Some(StepSource::Calibration(_)) = &node.source {
                if !node.children.is_empty() {
                    anyhow::bail!("Calibration nodes cannot have children");
                }
                if self.calibration_key.is_empty() {
                    tracing::warn!(
                        "Plan has calibration nodes but no calibration key; they will report mapping errors"
                    );
                }
            }
            if let Some(StepSource::ParameterTable(table)) = &node.source {
                if table.columns.is_empty() {
                    anyhow::bail!("Parameter table for '{}' has no columns", table.system);
                }
            }
        }

        if let Some(guiding) = &self.guiding {
            for probe in &guiding.required {
                if !guiding.available.is_empty() && !guiding.available.contains(probe) {
                    anyhow::bail!("Guide probe '{}' is not available", probe);
                }
            }
        }

        Ok(())
    }

    /// Observation context, present when the plan names the observation or
    /// carries execution history.
    pub fn context(&self) -> Option<ObservationContext> {
        if self.observation_id.is_none() && self.execution.is_none() {
            return None;
        }
        Some(ObservationContext {
            observation_id: self.observation_id.clone(),
            program: self.program.clone(),
            science_band: self.science_band,
            record: self.execution.clone(),
        })
    }

    /// Build the observation tree.
    pub fn to_observation(&self) -> ObservationNode {
        let key = self
            .observation_id
            .as_ref()
            .map(NodeKey::new)
            .unwrap_or_else(NodeKey::generate);
        let mut observation = ObservationNode::new(key);

        for spec in &self.static_components {
            let mut component = match &spec.config {
                Some(config) => StaticComponent::new(spec.name.clone(), config.clone()),
                None => StaticComponent::empty(spec.name.clone()),
            };
            if let Some(key) = &spec.key {
                component = component.with_key(NodeKey::new(key));
            }
            if let Some(read_mode) = &spec.read_mode {
                component = component.with_hook(Arc::new(read_mode.clone()));
            }
            observation = observation.with_static(component);
        }

        for root in &self.sequence {
            observation = observation.with_sequence(root.to_node());
        }
        if let Some(context) = self.context() {
            observation = observation.with_context(context);
        }
        if let Some(guiding) = &self.guiding {
            observation = observation.with_guiding(guiding.clone());
        }
        observation
    }

    /// Options for expanding this plan, loading `calibration_table` (or
    /// `table_override` when given).
    pub fn sequence_options(&self, table_override: Option<&Path>) -> Result<SequenceOptions> {
        let mut options = SequenceOptions::new()
            .collapse_repeats(self.options.collapse_repeats)
            .add_observation_count(self.options.add_observation_count)
            .with_program(self.program.clone());

        if !self.calibration_key.is_empty() {
            options = options.with_key_extractor(Arc::new(ParameterKeyExtractor::new(
                self.calibration_key.iter().cloned(),
            )));
        }

        let table = table_override.or(self.calibration_table.as_deref());
        if let Some(path) = table {
            let provider = InMemoryCalibrationProvider::load_from_file(path)?;
            options = options.with_provider(Arc::new(provider));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ParameterTable, RepeatSource};
    use crate::types::ObserveType;

    fn node(key: &str, source: StepSource) -> NodeSpec {
        NodeSpec {
            key: Some(key.to_string()),
            source: Some(source),
            ..NodeSpec::default()
        }
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut plan = PlanFile::new();
        let darks = StepSource::Repeat(RepeatSource::new(ObserveType::Dark, 1));
        plan.sequence = vec![node("a", darks.clone()), node("a", darks)];
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_empty_table_rejected() {
        let mut plan = PlanFile::new();
        plan.sequence = vec![node(
            "t",
            StepSource::ParameterTable(ParameterTable::new("instrument")),
        )];
        let err = plan.validate().expect_err("no columns");
        assert!(err.to_string().contains("no columns"));
    }

    #[test]
    fn test_context_only_when_identified() {
        let mut plan = PlanFile::new();
        assert!(plan.context().is_none());
        plan.observation_id = Some("GS-2024A-Q-1-1".into());
        let ctx = plan.context().expect("context");
        assert_eq!(ctx.data_label(1), "GS-2024A-Q-1-1-001");
    }

    #[test]
    fn test_annotation_nodes_have_no_builder() {
        let spec = NodeSpec {
            key: Some("note".into()),
            annotation: true,
            ..NodeSpec::default()
        };
        let node = Arc::new(spec.to_node());
        assert!(node.builder().is_none());
    }
}
