//! Driver pass behavior and sequence queries over expanded passes.

use obsseq::builder::composite::CompositeBuilder;
use obsseq::source::{ParameterTable, RepeatSource};
use obsseq::types::ObserveType;
use obsseq::{
    Config, ConfigPostProcessor, ConfigSequence, ItemKey, NodeKey, ObservationNode, Result,
    SequenceBuilder, SequenceDriver, SequenceError, SequenceNode, SequenceOptions,
    StaticComponent, StepSource, SysConfig, Value,
};
use std::sync::{Arc, Mutex};

/// Records the order hooks ran in
#[derive(Debug)]
struct Probe {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl ConfigPostProcessor for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_process(&self, sequence: ConfigSequence) -> Result<ConfigSequence> {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.name.clone());
        }
        Ok(sequence)
    }
}

fn probe(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Probe> {
    Arc::new(Probe {
        name: name.to_string(),
        log: Arc::clone(log),
    })
}

fn filter_tree() -> SequenceNode {
    SequenceNode::new(
        NodeKey::new("filters"),
        Some(StepSource::ParameterTable(
            ParameterTable::new("instrument").with_column("filter", ["J", "H", "K"]),
        )),
    )
    .with_child(SequenceNode::new(
        NodeKey::new("objects"),
        Some(StepSource::Repeat(
            RepeatSource::new(ObserveType::Object, 2).with_exposure(30.0, 1),
        )),
    ))
}

#[test]
fn test_builder_protocol_on_driver_root() {
    let mut builder = CompositeBuilder::new(Arc::new(filter_tree()));
    let err = builder
        .apply_next(&mut Config::new(), &Config::new())
        .expect_err("not reset");
    assert!(err.is_protocol());

    builder.reset(&SequenceOptions::new()).expect("reset");
    assert!(builder.has_next().is_ok());
}

#[test]
fn test_hook_order_statics_driver_then_guiding() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut config = Config::new();
    config.put_system(SysConfig::new("instrument").with("readMode", "faint"));

    let observation = Arc::new(
        ObservationNode::new(NodeKey::new("obs"))
            .with_static(StaticComponent::new("first", config.clone()).with_hook(probe("first", &log)))
            .with_static(StaticComponent::new("second", config).with_hook(probe("second", &log)))
            .with_sequence(filter_tree()),
    );
    let driver = SequenceDriver::new().with_post_processor(probe("driver", &log));
    driver
        .expand(&observation, &SequenceOptions::new())
        .expect("pass");

    let order = log.lock().map(|l| l.clone()).unwrap_or_default();
    assert_eq!(order, vec!["first", "second", "driver"]);
}

#[test]
fn test_sequence_queries_over_pass() {
    let mut builder = CompositeBuilder::new(Arc::new(filter_tree()));
    let sequence = SequenceDriver::new()
        .run(&mut builder, &SequenceOptions::new())
        .expect("pass");
    assert_eq!(sequence.len(), 6);

    let filter = ItemKey::new("instrument", "filter");
    assert_eq!(
        sequence.distinct_item_values(&filter),
        vec![Value::from("J"), Value::from("H"), Value::from("K")]
    );
    assert_eq!(sequence.item_value(1, &filter), Some(Value::from("J")));
    assert!(sequence.iterated_keys().contains(&filter));
    assert!(sequence
        .static_keys()
        .contains(&ItemKey::new("observe", "exposureTime")));

    let mut template = Config::new();
    template.put_item(&filter, "K");
    assert_eq!(sequence.first_matching(&template), Some(4));

    let compact = sequence.compact_view();
    assert!(compact[1].parameter("instrument", "filter").is_none());
    assert_eq!(
        compact[2].parameter("instrument", "filter"),
        Some(&Value::from("H"))
    );
}

#[test]
fn test_failing_hook_returns_no_sequence() {
    #[derive(Debug)]
    struct Broken;

    impl ConfigPostProcessor for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn post_process(&self, _sequence: ConfigSequence) -> Result<ConfigSequence> {
            Err(SequenceError::post_process("broken", "cannot rewrite"))
        }
    }

    let observation = Arc::new(
        ObservationNode::new(NodeKey::new("obs"))
            .with_static(StaticComponent::new("broken", Config::new()).with_hook(Arc::new(Broken)))
            .with_sequence(filter_tree()),
    );
    let result = SequenceDriver::new().expand(&observation, &SequenceOptions::new());
    assert!(matches!(result, Err(SequenceError::PostProcess { .. })));
}
