//! The produced sequence of steps.
//!
//! Steps are stored as the deltas the builders wrote. Full states are
//! reconstructed on demand by merging deltas in order, so queries that talk
//! about "the value at step i" always see everything in effect at that step.

use crate::config::{Config, Value};
use crate::item_key::ItemKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered list of step configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSequence {
    steps: Vec<Config>,
}

impl ConfigSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Config>) -> Self {
        Self { steps }
    }

    pub fn push(&mut self, step: Config) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps as written (deltas).
    pub fn iter(&self) -> std::slice::Iter<'_, Config> {
        self.steps.iter()
    }

    pub fn steps(&self) -> &[Config] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Config> {
        self.steps
    }

    /// Full state in effect at step `index`.
    pub fn step(&self, index: usize) -> Option<Config> {
        if index >= self.steps.len() {
            return None;
        }
        let mut full = Config::new();
        for step in &self.steps[..=index] {
            full.merge_from(step);
        }
        Some(full)
    }

    /// Full state of every step.
    pub fn all_steps(&self) -> Vec<Config> {
        let mut full = Config::new();
        self.steps
            .iter()
            .map(|step| {
                full.merge_from(step);
                full.clone()
            })
            .collect()
    }

    /// Each step reduced to the items that changed from the step before.
    /// The first step is kept whole.
    pub fn compact_view(&self) -> Vec<Config> {
        let mut previous = Config::new();
        let mut compact = Vec::with_capacity(self.steps.len());
        for full in self.all_steps() {
            let mut step = full.clone();
            step.remove_matching(&previous);
            compact.push(step);
            previous = full;
        }
        compact
    }

    /// Value of `key` in effect at step `index`.
    pub fn item_value(&self, index: usize, key: &ItemKey) -> Option<Value> {
        self.step(index)?.item(key).cloned()
    }

    /// Value of `key` in effect at every step.
    pub fn item_value_at_each_step(&self, key: &ItemKey) -> Vec<Option<Value>> {
        self.all_steps()
            .iter()
            .map(|full| full.item(key).cloned())
            .collect()
    }

    /// Distinct values `key` takes, in order of first appearance.
    pub fn distinct_item_values(&self, key: &ItemKey) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::new();
        for value in self.item_value_at_each_step(key).into_iter().flatten() {
            if !values.contains(&value) {
                values.push(value);
            }
        }
        values
    }

    fn all_keys(&self) -> Vec<ItemKey> {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        for step in &self.steps {
            for key in step.keys() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Keys whose value differs across steps, in order of first appearance.
    pub fn iterated_keys(&self) -> Vec<ItemKey> {
        let fulls = self.all_steps();
        self.all_keys()
            .into_iter()
            .filter(|key| {
                let mut values = fulls.iter().map(|full| full.item(key));
                match values.next() {
                    Some(first) => values.any(|v| v != first),
                    None => false,
                }
            })
            .collect()
    }

    /// Keys set on the first step and never changed afterwards.
    pub fn static_keys(&self) -> Vec<ItemKey> {
        let iterated: BTreeSet<ItemKey> = self.iterated_keys().into_iter().collect();
        self.all_keys()
            .into_iter()
            .filter(|key| !iterated.contains(key))
            .collect()
    }

    /// Index of the first step whose full state matches `template`.
    pub fn first_matching(&self, template: &Config) -> Option<usize> {
        self.all_steps()
            .iter()
            .position(|full| full.matches(template))
    }

    /// New sequence of the full states accepted by `pred`.
    pub fn filter<F>(&self, pred: F) -> ConfigSequence
    where
        F: Fn(&Config) -> bool,
    {
        Self::from_steps(self.all_steps().into_iter().filter(|s| pred(s)).collect())
    }

    /// Steps `from..to`; the first carries its full state so the result
    /// stands alone.
    pub fn sub_sequence(&self, from: usize, to: usize) -> ConfigSequence {
        let to = to.min(self.steps.len());
        if from >= to {
            return Self::new();
        }
        let mut steps = Vec::with_capacity(to - from);
        if let Some(first) = self.step(from) {
            steps.push(first);
        }
        steps.extend(self.steps[from + 1..to].iter().cloned());
        Self::from_steps(steps)
    }
}

impl<'a> IntoIterator for &'a ConfigSequence {
    type Item = &'a Config;
    type IntoIter = std::slice::Iter<'a, Config>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
