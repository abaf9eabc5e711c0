//! Property-Based Tests for obsseq
//!
//! These tests verify:
//! - Exhaustion counts and child ordering of composite nodes
//! - Metadata completeness along the active path
//! - Cumulative reconstruction of full states from step deltas
//! - The collapse-repeats option

use obsseq::builder::composite::CompositeBuilder;
use obsseq::config::{OBSERVE_SYSTEM, OBSERVE_TYPE};
use obsseq::metadata::MetaData;
use obsseq::source::{ParameterTable, RepeatSource};
use obsseq::types::ObserveType;
use obsseq::{
    Config, ConfigSequence, NodeKey, Phase, Result, SequenceBuilder, SequenceDriver, SequenceNode,
    SequenceOptions, StepSource, Value,
};
use proptest::prelude::*;
use std::sync::Arc;

fn repeat(key: &str, observe_type: ObserveType, count: u32) -> SequenceNode {
    SequenceNode::new(
        NodeKey::new(key),
        Some(StepSource::Repeat(RepeatSource::new(observe_type, count))),
    )
}

fn table(key: &str, rows: usize) -> SequenceNode {
    let values: Vec<Value> = (0..rows).map(|i| Value::from(i as i64)).collect();
    SequenceNode::new(
        NodeKey::new(key),
        Some(StepSource::ParameterTable(
            ParameterTable::new("instrument").with_column("position", values),
        )),
    )
}

fn run(node: SequenceNode, options: &SequenceOptions) -> ConfigSequence {
    let mut builder = CompositeBuilder::new(Arc::new(node));
    SequenceDriver::new()
        .run(&mut builder, options)
        .expect("pass")
}

/// Wraps a root builder and keeps every cumulative state the driver hands it
struct RecordingRoot {
    inner: CompositeBuilder,
    priors: Vec<Config>,
}

impl SequenceBuilder for RecordingRoot {
    fn node_key(&self) -> &NodeKey {
        self.inner.node_key()
    }

    fn phase(&self) -> Phase {
        self.inner.phase()
    }

    fn reset(&mut self, options: &SequenceOptions) -> Result<()> {
        self.priors.clear();
        self.inner.reset(options)
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn apply_next(&mut self, step: &mut Config, prior_full: &Config) -> Result<()> {
        self.priors.push(prior_full.clone());
        self.inner.apply_next(step, prior_full)
    }
}

fn observe_type(step: &Config) -> Option<String> {
    step.parameter(OBSERVE_SYSTEM, OBSERVE_TYPE)
        .map(ToString::to_string)
}

// =============================================================================
// Exhaustion
// =============================================================================

proptest! {
    /// n own values over children [A, B] produce n * (a + b) ticks
    #[test]
    fn composite_tick_count(n in 0usize..5, a in 0u32..4, b in 1u32..4) {
        let node = table("rows", n)
            .with_child(repeat("a", ObserveType::Dark, a))
            .with_child(repeat("b", ObserveType::Flat, b));
        let sequence = run(node, &SequenceOptions::new());
        prop_assert_eq!(sequence.len(), n * (a + b) as usize);
    }

    /// Within each own value, all of A's steps precede all of B's
    #[test]
    fn composite_children_ordered(n in 1usize..4, a in 1u32..4, b in 1u32..4) {
        let node = table("rows", n)
            .with_child(repeat("a", ObserveType::Dark, a))
            .with_child(repeat("b", ObserveType::Flat, b));
        let sequence = run(node, &SequenceOptions::new());
        let per_pass = (a + b) as usize;
        for chunk in sequence.steps().chunks(per_pass) {
            let types: Vec<Option<String>> = chunk.iter().map(observe_type).collect();
            let darks = types.iter().take(a as usize).all(|t| t.as_deref() == Some("DARK"));
            let flats = types.iter().skip(a as usize).all(|t| t.as_deref() == Some("FLAT"));
            prop_assert!(darks && flats);
        }
    }
}

// =============================================================================
// Metadata completeness
// =============================================================================

proptest! {
    /// Every step lists the full root-to-leaf path of the nodes that ran it
    #[test]
    fn node_keys_cover_active_path(depth in 1usize..5, leaf in 1u32..4) {
        let mut node = repeat("leaf", ObserveType::Object, leaf);
        let mut expected = vec![NodeKey::new("leaf")];
        for level in (0..depth).rev() {
            let key = format!("group{}", level);
            node = SequenceNode::new(NodeKey::new(key.as_str()), Some(StepSource::Group))
                .with_child(node);
            expected.insert(0, NodeKey::new(key));
        }
        let sequence = run(node, &SequenceOptions::new());
        prop_assert_eq!(sequence.len(), leaf as usize);
        for step in sequence.iter() {
            prop_assert_eq!(MetaData::node_keys(step), expected.clone());
        }
    }
}

// =============================================================================
// Cumulative reconstruction
// =============================================================================

proptest! {
    /// The state the driver passes to step i is the reconstruction through step i - 1
    #[test]
    fn driver_prior_state_matches_reconstruction(rows in 1usize..5, count in 1u32..4) {
        let node = table("rows", rows).with_child(repeat("objects", ObserveType::Object, count));
        let mut root = RecordingRoot {
            inner: CompositeBuilder::new(Arc::new(node)),
            priors: Vec::new(),
        };
        let sequence = SequenceDriver::new()
            .run(&mut root, &SequenceOptions::new())
            .expect("pass");
        let full_states = sequence.all_steps();

        prop_assert_eq!(root.priors.len(), sequence.len());
        prop_assert!(root.priors[0].is_empty());
        for i in 1..sequence.len() {
            prop_assert_eq!(&root.priors[i], &full_states[i - 1]);
        }

        // The final state holds the last table row and the repeated observe type
        let last = &full_states[full_states.len() - 1];
        prop_assert_eq!(
            last.parameter("instrument", "position"),
            Some(&Value::from((rows - 1) as i64))
        );
        let last_observe_type = observe_type(last);
        prop_assert_eq!(last_observe_type.as_deref(), Some("OBJECT"));

        // Merging is idempotent
        let mut again = last.clone();
        for step in sequence.iter() {
            again.merge_from(step);
        }
        prop_assert_eq!(&again, last);
    }
}

// =============================================================================
// Collapse repeats
// =============================================================================

proptest! {
    /// A repeat of N collapses to exactly one step
    #[test]
    fn collapse_repeats_yields_one(count in 1u32..20) {
        let options = SequenceOptions::new().collapse_repeats(true);
        let sequence = run(repeat("objects", ObserveType::Object, count), &options);
        prop_assert_eq!(sequence.len(), 1);

        let sequence = run(repeat("objects", ObserveType::Object, count), &SequenceOptions::new());
        prop_assert_eq!(sequence.len(), count as usize);
    }
}
