//! Immutable declarative node tree.
//!
//! Node data is shared through `Arc` and never mutated while sequencing.
//! Builders are created on demand: each call to [`SequenceNode::builder`] or
//! [`ObservationNode::composer`] returns fresh builders with their own
//! iteration state over the same shared data, so independent passes over one
//! tree never interfere.

use crate::builder::component::StaticBuilder;
use crate::builder::composite::CompositeBuilder;
use crate::builder::observation::ObservationComposer;
use crate::builder::SequenceBuilder;
use crate::calibration::expander::CalibrationExpander;
use crate::config::Config;
use crate::execution::{ObservationContext, SkippedStatusMarker};
use crate::postprocess::guiding::GuideCorrection;
use crate::postprocess::HookHandle;
use crate::source::StepSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Program-level information the sequence needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramInfo {
    #[serde(default)]
    pub program_id: Option<String>,
    /// Proprietary period stamped on chargeable steps
    #[serde(default)]
    pub proprietary_months: u32,
}

/// Whether a node takes part in sequencing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Exposes the builder protocol
    #[default]
    Iterator,
    /// Attached to the tree but never sequenced (notes, annotations)
    Annotation,
}

/// A node of a sequence tree: optional own step source plus ordered children.
#[derive(Debug, Clone)]
pub struct SequenceNode {
    key: NodeKey,
    kind: NodeKind,
    data: Option<StepSource>,
    children: Vec<Arc<SequenceNode>>,
}

impl SequenceNode {
    pub fn new(key: NodeKey, data: Option<StepSource>) -> Self {
        Self {
            key,
            kind: NodeKind::Iterator,
            data,
            children: Vec::new(),
        }
    }

    /// Node with a generated key.
    pub fn with_source(data: StepSource) -> Self {
        Self::new(NodeKey::generate(), Some(data))
    }

    /// Node that is carried in the tree but never sequenced.
    pub fn annotation(key: NodeKey) -> Self {
        Self {
            key,
            kind: NodeKind::Annotation,
            data: None,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: SequenceNode) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = SequenceNode>) -> Self {
        self.children.extend(children.into_iter().map(Arc::new));
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn data(&self) -> Option<&StepSource> {
        self.data.as_ref()
    }

    pub fn children(&self) -> &[Arc<SequenceNode>] {
        &self.children
    }

    /// Fresh builder for this node, or `None` when the node does not take
    /// part in sequencing.
    ///
    /// Calibration sources become leaf expanders; every other node becomes a
    /// composite over its participating children. A calibration node's own
    /// children never take part in sequencing.
    pub fn builder(self: &Arc<Self>) -> Option<Box<dyn SequenceBuilder>> {
        if self.kind == NodeKind::Annotation {
            return None;
        }
        match &self.data {
            Some(StepSource::Calibration(source)) => Some(Box::new(CalibrationExpander::new(
                self.key.clone(),
                source.clone(),
            ))),
            _ => Some(Box::new(CompositeBuilder::new(Arc::clone(self)))),
        }
    }

    /// Builders for the children that participate, in document order.
    pub fn child_builders(&self) -> Vec<Box<dyn SequenceBuilder>> {
        self.children.iter().filter_map(|c| c.builder()).collect()
    }

    /// Number of nodes in this subtree, this node included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

/// An apply-once configuration component of an observation.
#[derive(Debug, Clone)]
pub struct StaticComponent {
    key: NodeKey,
    name: String,
    config: Option<Config>,
    hook: Option<HookHandle>,
}

impl StaticComponent {
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self {
            key: NodeKey::generate(),
            name: name.into(),
            config: Some(config),
            hook: None,
        }
    }

    /// Component without configuration; it contributes nothing.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            key: NodeKey::generate(),
            name: name.into(),
            config: None,
            hook: None,
        }
    }

    pub fn with_key(mut self, key: NodeKey) -> Self {
        self.key = key;
        self
    }

    /// Attach a post-processing hook run after the sequence is built.
    pub fn with_hook(mut self, hook: HookHandle) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn hook(&self) -> Option<&HookHandle> {
        self.hook.as_ref()
    }

    /// Components without configuration have no builder.
    pub fn builder(self: &Arc<Self>) -> Option<Box<dyn SequenceBuilder>> {
        self.config.as_ref()?;
        Some(Box::new(StaticBuilder::new(Arc::clone(self))))
    }
}

/// Root of one observation: static components plus top-level sequence trees.
#[derive(Debug, Clone)]
pub struct ObservationNode {
    key: NodeKey,
    static_components: Vec<Arc<StaticComponent>>,
    sequences: Vec<Arc<SequenceNode>>,
    context: Option<ObservationContext>,
    guiding: Option<GuideCorrection>,
}

impl ObservationNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            static_components: Vec::new(),
            sequences: Vec::new(),
            context: None,
            guiding: None,
        }
    }

    pub fn with_static(mut self, component: StaticComponent) -> Self {
        self.static_components.push(Arc::new(component));
        self
    }

    pub fn with_sequence(mut self, tree: SequenceNode) -> Self {
        self.sequences.push(Arc::new(tree));
        self
    }

    /// Decorate produced steps with data labels, status and carried values.
    pub fn with_context(mut self, context: ObservationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Correct guiding across offset positions after the sequence is built.
    pub fn with_guiding(mut self, guiding: GuideCorrection) -> Self {
        self.guiding = Some(guiding);
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn static_components(&self) -> &[Arc<StaticComponent>] {
        &self.static_components
    }

    pub fn sequences(&self) -> &[Arc<SequenceNode>] {
        &self.sequences
    }

    pub fn context(&self) -> Option<&ObservationContext> {
        self.context.as_ref()
    }

    pub fn guiding(&self) -> Option<&GuideCorrection> {
        self.guiding.as_ref()
    }

    /// Hooks to run after a pass, in invocation order: static component
    /// hooks in node order, status rewriting when decorated, then the
    /// guiding correction last.
    pub fn post_processors(&self) -> Vec<HookHandle> {
        let mut hooks: Vec<HookHandle> = self
            .static_components
            .iter()
            .filter_map(|c| c.hook().cloned())
            .collect();
        if self.context.is_some() {
            hooks.push(Arc::new(SkippedStatusMarker));
        }
        if let Some(guiding) = &self.guiding {
            hooks.push(Arc::new(guiding.clone()));
        }
        hooks
    }

    /// Fresh root composer over this observation.
    pub fn composer(self: &Arc<Self>) -> ObservationComposer {
        ObservationComposer::new(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RepeatSource;
    use crate::types::ObserveType;

    #[test]
    fn test_node_key_generation_is_unique() {
        let a = NodeKey::generate();
        let b = NodeKey::generate();
        assert_ne!(a, b);
        assert_eq!(NodeKey::new("seq").as_str(), "seq");
    }

    #[test]
    fn test_calibration_node_ignores_children() {
        use crate::config::{OBSERVE_SYSTEM, OBSERVE_TYPE};
        use crate::options::SequenceOptions;
        use crate::source::CalibrationSource;
        use crate::types::CalibrationCategory;

        let node = Arc::new(
            SequenceNode::new(
                NodeKey::new("flats"),
                Some(StepSource::Calibration(CalibrationSource::new(
                    CalibrationCategory::Flat,
                ))),
            )
            .with_child(SequenceNode::new(
                NodeKey::new("objects"),
                Some(StepSource::Repeat(RepeatSource::new(ObserveType::Object, 3))),
            )),
        );
        let mut builder = node.builder().expect("calibration builder");
        builder.reset(&SequenceOptions::new()).expect("reset");

        let mut steps = Vec::new();
        while builder.has_next().expect("poll") {
            let mut step = Config::new();
            builder.apply_next(&mut step, &Config::new()).expect("apply");
            steps.push(step);
        }
        // No table behind the options: a single fallback step, no child steps
        assert_eq!(steps.len(), 1);
        assert_ne!(
            steps[0].parameter(OBSERVE_SYSTEM, OBSERVE_TYPE),
            Some(&crate::config::Value::from("OBJECT"))
        );
    }

    #[test]
    fn test_annotation_children_are_skipped() {
        let node = SequenceNode::new(NodeKey::new("root"), Some(StepSource::Group))
            .with_child(SequenceNode::annotation(NodeKey::new("note")))
            .with_child(SequenceNode::new(
                NodeKey::new("observe"),
                Some(StepSource::Repeat(RepeatSource::new(ObserveType::Object, 2))),
            ));

        assert_eq!(node.node_count(), 3);
        let builders = node.child_builders();
        assert_eq!(builders.len(), 1);
        assert_eq!(builders[0].node_key(), &NodeKey::new("observe"));
    }

    #[test]
    fn test_empty_static_component_has_no_builder() {
        let component = Arc::new(StaticComponent::empty("notes"));
        assert!(component.builder().is_none());
    }
}
