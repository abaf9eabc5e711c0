//! Step configuration data model.
//!
//! A [`Config`] is one instant's instrument settings: an ordered list of named
//! systems ([`SysConfig`]), each holding unique-named parameters. System order
//! is observable (static systems sort ahead of sequence systems), so every
//! operation here is explicit about where a system lands.
//!
//! Parameter lists are shared copy-on-write. Cloning a step or merging it into
//! the cumulative full state never copies a parameter list until one side
//! writes to it, and a write never leaks into the other side.

use crate::item_key::ItemKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// Well-known systems and parameters shared by sources and decorators.
pub const INSTRUMENT_SYSTEM: &str = "instrument";
pub const TELESCOPE_SYSTEM: &str = "telescope";
pub const OBSERVE_SYSTEM: &str = "observe";
pub const CALIBRATION_SYSTEM: &str = "calibration";
pub const OCS_SYSTEM: &str = "ocs";

pub const OBSERVE_TYPE: &str = "observeType";
pub const OBS_CLASS: &str = "class";
pub const EXPOSURE_TIME: &str = "exposureTime";
pub const COADDS: &str = "coadds";
pub const REPEAT_COUNT: &str = "repeatCount";
pub const PROPRIETARY_MONTHS: &str = "proprietaryMonths";

// ============================================================================
// Values
// ============================================================================

/// Arbitrary-typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// Nested sub-configuration (e.g. a target position inside `telescope`)
    Nested(SysConfig),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value; integers widen to float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&SysConfig> {
        match self {
            Self::Nested(sys) => Some(sys),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Nested(sys) => write!(f, "{{{}}}", sys.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<SysConfig> for Value {
    fn from(sys: SysConfig) -> Self {
        Self::Nested(sys)
    }
}

// ============================================================================
// Systems
// ============================================================================

/// One named parameter inside a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

/// A named system: unique-named parameters in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysConfig {
    name: String,
    parameters: Arc<Vec<Parameter>>,
}

impl SysConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Arc::new(Vec::new()),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(param, value);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, param: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == param)
            .map(|p| &p.value)
    }

    pub fn contains(&self, param: &str) -> bool {
        self.get(param).is_some()
    }

    /// Set a parameter, replacing any existing value in place.
    /// Returns the previous value.
    pub fn put(&mut self, param: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let param = param.into();
        let value = value.into();
        let params = Arc::make_mut(&mut self.parameters);
        match params.iter_mut().find(|p| p.name == param) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
            None => {
                params.push(Parameter { name: param, value });
                None
            }
        }
    }

    pub fn remove(&mut self, param: &str) -> Option<Value> {
        let index = self.parameters.iter().position(|p| p.name == param)?;
        Some(Arc::make_mut(&mut self.parameters).remove(index).value)
    }

    /// Merge every parameter of `other` into this system (last write wins).
    pub fn merge(&mut self, other: &SysConfig) {
        if self.parameters.is_empty() {
            self.parameters = Arc::clone(&other.parameters);
            return;
        }
        for p in other.parameters.iter() {
            self.put(p.name.clone(), p.value.clone());
        }
    }

    /// True if both systems currently share one parameter list.
    pub fn shares_storage_with(&self, other: &SysConfig) -> bool {
        Arc::ptr_eq(&self.parameters, &other.parameters)
    }

    fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let value = self.get(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        value.as_nested()?.get_path(rest)
    }

    fn put_path(&mut self, path: &[String], value: Value) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        if rest.is_empty() {
            return self.put(first.clone(), value);
        }
        let params = Arc::make_mut(&mut self.parameters);
        let index = match params.iter().position(|p| &p.name == first) {
            Some(i) => i,
            None => {
                params.push(Parameter {
                    name: first.clone(),
                    value: Value::Nested(SysConfig::new(first.clone())),
                });
                params.len() - 1
            }
        };
        if !matches!(params[index].value, Value::Nested(_)) {
            params[index].value = Value::Nested(SysConfig::new(first.clone()));
        }
        match &mut params[index].value {
            Value::Nested(nested) => nested.put_path(rest, value),
            _ => None,
        }
    }

    fn remove_path(&mut self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        if rest.is_empty() {
            return self.remove(first);
        }
        self.get(first)?.as_nested()?;
        let params = Arc::make_mut(&mut self.parameters);
        let entry = params.iter_mut().find(|p| &p.name == first)?;
        match &mut entry.value {
            Value::Nested(nested) => nested.remove_path(rest),
            _ => None,
        }
    }

    fn collect_entries(&self, prefix: &ItemKey, out: &mut Vec<(ItemKey, Value)>) {
        for p in self.parameters.iter() {
            let key = prefix.child(p.name.clone());
            match &p.value {
                Value::Nested(nested) => nested.collect_entries(&key, out),
                other => out.push((key, other.clone())),
            }
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// An ordered collection of named systems: one step's settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    systems: Vec<SysConfig>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn systems(&self) -> &[SysConfig] {
        &self.systems
    }

    pub fn system_names(&self) -> Vec<String> {
        self.systems.iter().map(|s| s.name.clone()).collect()
    }

    pub fn system(&self, name: &str) -> Option<&SysConfig> {
        self.systems.iter().find(|s| s.name == name)
    }

    pub fn system_mut(&mut self, name: &str) -> Option<&mut SysConfig> {
        self.systems.iter_mut().find(|s| s.name == name)
    }

    pub fn contains_system(&self, name: &str) -> bool {
        self.system(name).is_some()
    }

    /// The named system, appended empty if absent.
    pub fn system_or_append(&mut self, name: &str) -> &mut SysConfig {
        let index = match self.systems.iter().position(|s| s.name == name) {
            Some(i) => i,
            None => {
                self.systems.push(SysConfig::new(name));
                self.systems.len() - 1
            }
        };
        &mut self.systems[index]
    }

    /// Insert a system. An existing system of the same name absorbs the
    /// parameters and keeps its position; otherwise the system is appended.
    pub fn put_system(&mut self, sys: SysConfig) {
        match self.system_mut(&sys.name) {
            Some(existing) => existing.merge(&sys),
            None => self.systems.push(sys),
        }
    }

    /// Insert a system at the front, merging with any existing one.
    pub fn prepend_system(&mut self, sys: SysConfig) {
        let merged = match self.remove_system(&sys.name) {
            Some(mut existing) => {
                existing.merge(&sys);
                existing
            }
            None => sys,
        };
        self.systems.insert(0, merged);
    }

    pub fn remove_system(&mut self, name: &str) -> Option<SysConfig> {
        let index = self.systems.iter().position(|s| s.name == name)?;
        Some(self.systems.remove(index))
    }

    /// Move the named systems (those present) to the front, keeping the
    /// relative order given in `names`.
    pub fn move_to_front(&mut self, names: &[String]) {
        let mut front = Vec::new();
        for name in names {
            if let Some(sys) = self.remove_system(name) {
                front.push(sys);
            }
        }
        front.append(&mut self.systems);
        self.systems = front;
    }

    pub fn parameter(&self, system: &str, param: &str) -> Option<&Value> {
        self.system(system)?.get(param)
    }

    pub fn put_parameter(
        &mut self,
        system: &str,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.system_or_append(system).put(param, value)
    }

    /// Value of a single item. Keys of depth one name whole systems and
    /// never resolve to a value.
    pub fn item(&self, key: &ItemKey) -> Option<&Value> {
        let (system, path) = key.segments().split_first()?;
        self.system(system)?.get_path(path)
    }

    pub fn contains_item(&self, key: &ItemKey) -> bool {
        self.item(key).is_some()
    }

    /// Set a single item, creating the system and nested levels as needed.
    pub fn put_item(&mut self, key: &ItemKey, value: impl Into<Value>) -> Option<Value> {
        let (system, path) = key.segments().split_first()?;
        if path.is_empty() {
            return None;
        }
        self.system_or_append(system).put_path(path, value.into())
    }

    /// Remove a single item. Systems left empty are dropped.
    pub fn remove_item(&mut self, key: &ItemKey) -> Option<Value> {
        let (system, path) = key.segments().split_first()?;
        let removed = self.system_mut(system)?.remove_path(path);
        if self.system(system).is_some_and(SysConfig::is_empty) {
            self.remove_system(system);
        }
        removed
    }

    /// Every leaf item, flattened, in system then parameter order.
    pub fn entries(&self) -> Vec<(ItemKey, Value)> {
        let mut out = Vec::new();
        for sys in &self.systems {
            sys.collect_entries(&ItemKey::root(sys.name.clone()), &mut out);
        }
        out
    }

    /// Leaf items whose key is `parent` or descends from it.
    pub fn entries_under(&self, parent: &ItemKey) -> Vec<(ItemKey, Value)> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| k.is_under(parent))
            .collect()
    }

    pub fn keys(&self) -> Vec<ItemKey> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Number of leaf items.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.iter().all(SysConfig::is_empty)
    }

    /// True if every item of `template` is present here with an equal value.
    pub fn matches(&self, template: &Config) -> bool {
        template
            .entries()
            .iter()
            .all(|(k, v)| self.item(k) == Some(v))
    }

    /// Remove every item whose key and value also appear in `other`.
    pub fn remove_matching(&mut self, other: &Config) {
        for (key, value) in other.entries() {
            if self.item(&key) == Some(&value) {
                self.remove_item(&key);
            }
        }
    }

    /// Merge every system of `other` into this config, parameter by
    /// parameter. Systems new to this config are appended and share their
    /// parameter list with `other` until either side writes.
    pub fn merge_from(&mut self, other: &Config) {
        for sys in &other.systems {
            self.put_system(sys.clone());
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.entries() {
            writeln!(f, "{} = {}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> ItemKey {
        ItemKey::parse(text).expect("valid key")
    }

    #[test]
    fn test_put_system_merges_instead_of_duplicating() {
        let mut config = Config::new();
        config.put_system(SysConfig::new("instrument").with("filter", "J"));
        config.put_system(SysConfig::new("telescope").with("p", 10.0));
        config.put_system(
            SysConfig::new("instrument")
                .with("filter", "K")
                .with("exposureTime", 30.0),
        );

        assert_eq!(config.system_names(), vec!["instrument", "telescope"]);
        assert_eq!(
            config.parameter("instrument", "filter"),
            Some(&Value::from("K"))
        );
        assert_eq!(config.system("instrument").map(SysConfig::len), Some(2));
    }

    #[test]
    fn test_prepend_and_move_to_front() {
        let mut config = Config::new();
        config.put_system(SysConfig::new("a").with("x", 1));
        config.put_system(SysConfig::new("b").with("x", 2));
        config.put_system(SysConfig::new("c").with("x", 3));

        config.move_to_front(&["c".to_string(), "missing".to_string(), "b".to_string()]);
        assert_eq!(config.system_names(), vec!["c", "b", "a"]);

        config.prepend_system(SysConfig::new("a").with("y", 4));
        assert_eq!(config.system_names(), vec!["a", "c", "b"]);
        assert_eq!(config.parameter("a", "x"), Some(&Value::Int(1)));
        assert_eq!(config.parameter("a", "y"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_nested_items() {
        let mut config = Config::new();
        config.put_item(&key("telescope:base:name"), "M31");
        config.put_item(&key("telescope:p"), 0.0);

        assert_eq!(
            config.item(&key("telescope:base:name")),
            Some(&Value::from("M31"))
        );
        assert!(config.item(&key("telescope")).is_none());

        let keys: Vec<String> = config.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["telescope:base:name", "telescope:p"]);

        assert_eq!(
            config.remove_item(&key("telescope:base:name")),
            Some(Value::from("M31"))
        );
        assert!(!config.contains_item(&key("telescope:base:name")));
    }

    #[test]
    fn test_remove_item_drops_empty_system() {
        let mut config = Config::new();
        config.put_item(&key("observe:observeType"), "OBJECT");
        config.remove_item(&key("observe:observeType"));
        assert!(!config.contains_system("observe"));
        assert!(config.is_empty());
    }

    #[test]
    fn test_matches_and_remove_matching() {
        let mut full = Config::new();
        full.put_item(&key("instrument:filter"), "J");
        full.put_item(&key("instrument:exposureTime"), 10.0);

        let mut template = Config::new();
        template.put_item(&key("instrument:filter"), "J");
        assert!(full.matches(&template));
        assert!(full.matches(&Config::new()));

        template.put_item(&key("instrument:filter"), "K");
        assert!(!full.matches(&template));

        let mut previous = Config::new();
        previous.put_item(&key("instrument:filter"), "J");
        previous.put_item(&key("instrument:exposureTime"), 5.0);
        full.remove_matching(&previous);
        assert_eq!(full.len(), 1);
        assert!(full.contains_item(&key("instrument:exposureTime")));
    }

    #[test]
    fn test_copy_on_write_sharing() {
        let mut step = Config::new();
        step.put_item(&key("instrument:filter"), "J");

        let mut full = Config::new();
        full.merge_from(&step);

        let shared = full
            .system("instrument")
            .zip(step.system("instrument"))
            .is_some_and(|(a, b)| a.shares_storage_with(b));
        assert!(shared, "new systems should share storage until written");

        full.put_item(&key("instrument:filter"), "K");
        assert_eq!(step.item(&key("instrument:filter")), Some(&Value::from("J")));
        assert_eq!(full.item(&key("instrument:filter")), Some(&Value::from("K")));
    }

    #[test]
    fn test_value_json_is_untagged() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[true, 3, 2.5, "J", [1, 2]]"#).expect("parse values");
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::from("J"),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ]
        );
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
    }
}
