//! Per-step bookkeeping stored under reserved systems.
//!
//! # Design
//!
//! Bookkeeping travels inside the step itself so it survives into the
//! produced sequence:
//!
//! | System      | Parameter       | Meaning                                   |
//! |-------------|-----------------|-------------------------------------------|
//! | `metadata`  | `stepCount`     | 1-based data label counter                |
//! | `metadata`  | `complete`      | dataset already executed                  |
//! | `metadata`  | `nodeKeys`      | node keys on the active path, root first  |
//! | `smartgcal` | `mappingError`  | no calibration matched this step          |
//! | `smartgcal` | `stepNumber`    | index within a calibration plan           |
//! | `smartgcal` | `executedSteps` | recorded calibration steps to replay      |

use crate::config::{Config, Value};
use crate::tree::NodeKey;

/// Reserved metadata system name
pub const METADATA_SYSTEM: &str = "metadata";
pub const STEP_COUNT: &str = "stepCount";
pub const COMPLETE: &str = "complete";
pub const NODE_KEYS: &str = "nodeKeys";

/// Reserved calibration bookkeeping system name
pub const SMARTGCAL_SYSTEM: &str = "smartgcal";
pub const MAPPING_ERROR: &str = "mappingError";
pub const STEP_NUMBER: &str = "stepNumber";
pub const EXECUTED_STEPS: &str = "executedSteps";

/// Accessors for the `metadata` system of one step
pub struct MetaData;

impl MetaData {
    /// Append a node key to this step's traversal path.
    pub fn add_node_key(step: &mut Config, key: &NodeKey) {
        let sys = step.system_or_append(METADATA_SYSTEM);
        let mut keys = match sys.get(NODE_KEYS) {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        keys.push(Value::Text(key.to_string()));
        sys.put(NODE_KEYS, Value::List(keys));
    }

    pub fn node_keys(step: &Config) -> Vec<NodeKey> {
        step.parameter(METADATA_SYSTEM, NODE_KEYS)
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(NodeKey::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_step_count(step: &mut Config, count: u32) {
        step.put_parameter(METADATA_SYSTEM, STEP_COUNT, count);
    }

    pub fn step_count(step: &Config) -> Option<i64> {
        step.parameter(METADATA_SYSTEM, STEP_COUNT)
            .and_then(Value::as_i64)
    }

    pub fn set_complete(step: &mut Config, complete: bool) {
        step.put_parameter(METADATA_SYSTEM, COMPLETE, complete);
    }

    /// Missing flag reads as not complete.
    pub fn is_complete(step: &Config) -> bool {
        step.parameter(METADATA_SYSTEM, COMPLETE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Accessors for the `smartgcal` system of one step
pub struct Smartgcal;

impl Smartgcal {
    pub fn set_mapping_error(step: &mut Config, error: bool) {
        step.put_parameter(SMARTGCAL_SYSTEM, MAPPING_ERROR, error);
    }

    pub fn mapping_error(step: &Config) -> bool {
        step.parameter(SMARTGCAL_SYSTEM, MAPPING_ERROR)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_step_number(step: &mut Config, number: i64) {
        step.put_parameter(SMARTGCAL_SYSTEM, STEP_NUMBER, number);
    }

    /// Step number within a calibration plan, -1 when the step has none.
    pub fn step_number(step: &Config) -> i64 {
        step.parameter(SMARTGCAL_SYSTEM, STEP_NUMBER)
            .and_then(Value::as_i64)
            .unwrap_or(-1)
    }

    pub fn executed_steps(step: &Config) -> usize {
        step.parameter(SMARTGCAL_SYSTEM, EXECUTED_STEPS)
            .and_then(Value::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Record how many calibration steps of the plan starting at `index`
    /// were executed, from the recorded steps of a previous run.
    ///
    /// The run is the contiguous block of recorded steps whose step numbers
    /// increase by one from the step at `index`; its length is the last step
    /// number plus one.
    pub fn set_executed_steps(step: &mut Config, recorded: &[Config], index: usize) {
        let Some(first) = recorded.get(index) else {
            return;
        };
        let mut last = Self::step_number(first);
        if last < 0 {
            return;
        }
        for next in recorded.iter().skip(index + 1) {
            let number = Self::step_number(next);
            if number != last + 1 {
                break;
            }
            last = number;
        }
        step.put_parameter(SMARTGCAL_SYSTEM, EXECUTED_STEPS, last + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_keys_accumulate_in_order() {
        let mut step = Config::new();
        MetaData::add_node_key(&mut step, &NodeKey::new("root"));
        MetaData::add_node_key(&mut step, &NodeKey::new("leaf"));
        assert_eq!(
            MetaData::node_keys(&step),
            vec![NodeKey::new("root"), NodeKey::new("leaf")]
        );
    }

    #[test]
    fn test_defaults_when_absent() {
        let step = Config::new();
        assert!(!MetaData::is_complete(&step));
        assert_eq!(MetaData::step_count(&step), None);
        assert!(!Smartgcal::mapping_error(&step));
        assert_eq!(Smartgcal::step_number(&step), -1);
        assert_eq!(Smartgcal::executed_steps(&step), 0);
    }

    #[test]
    fn test_executed_steps_counts_contiguous_run() {
        let recorded: Vec<Config> = [0, 1, 2, -1, 0]
            .iter()
            .map(|n| {
                let mut c = Config::new();
                if *n >= 0 {
                    Smartgcal::set_step_number(&mut c, *n);
                }
                c
            })
            .collect();

        let mut step = Config::new();
        Smartgcal::set_executed_steps(&mut step, &recorded, 0);
        assert_eq!(Smartgcal::executed_steps(&step), 3);

        let mut step = Config::new();
        Smartgcal::set_executed_steps(&mut step, &recorded, 3);
        assert_eq!(Smartgcal::executed_steps(&step), 0);

        let mut step = Config::new();
        Smartgcal::set_executed_steps(&mut step, &recorded, 4);
        assert_eq!(Smartgcal::executed_steps(&step), 1);
    }
}
