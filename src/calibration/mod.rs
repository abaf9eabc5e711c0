//! Calibration records and the provider boundary.
//!
//! A calibration table maps an instrument-specific [`CalibrationKey`] to one
//! or more [`Calibration`] records. Records arrive as string property maps
//! (`"Calibration Lamps" => "Ar+CuAr"`) and are validated on parse:
//!
//! - at least one lamp
//! - arcs and flats never mixed
//! - at most one flat lamp
//!
//! The engine only sees the provider through [`CalibrationProvider`]; the
//! key comes from an instrument-specific [`CalibrationKeyExtractor`].

pub mod expander;

use crate::config::{
    Config, SysConfig, Value, CALIBRATION_SYSTEM, COADDS, EXPOSURE_TIME, OBSERVE_SYSTEM,
    OBSERVE_TYPE,
};
use crate::error::{Result, SequenceError};
use crate::metadata::{Smartgcal, SMARTGCAL_SYSTEM, STEP_NUMBER};
use crate::types::{Basecal, CalFilter, CalibrationCategory, Diffuser, Lamp, ObserveType, Shutter};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Property names used by calibration tables
pub const PROP_LAMPS: &str = "Calibration Lamps";
pub const PROP_SHUTTER: &str = "Calibration Shutter";
pub const PROP_FILTER: &str = "Calibration Filter";
pub const PROP_DIFFUSER: &str = "Calibration Diffuser";
pub const PROP_OBSERVE: &str = "Calibration Observe";
pub const PROP_EXPOSURE_TIME: &str = "Calibration Exposure Time";
pub const PROP_COADDS: &str = "Calibration Coadds";
pub const PROP_BASECAL: &str = "Calibration Basecal";

/// Parameters of the `calibration` system
pub const LAMP: &str = "lamp";
pub const SHUTTER: &str = "shutter";
pub const FILTER: &str = "filter";
pub const DIFFUSER: &str = "diffuser";
pub const BASECAL_DAY: &str = "basecalDay";
pub const BASECAL_NIGHT: &str = "basecalNight";

const SEPARATOR: char = '+';

// ============================================================================
// Lookup key
// ============================================================================

/// Instrument configuration values that select calibrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationKey {
    values: BTreeMap<String, String>,
}

impl CalibrationKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for CalibrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

// ============================================================================
// Provider boundary
// ============================================================================

/// Failure raised by a calibration provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl From<ProviderError> for SequenceError {
    fn from(err: ProviderError) -> Self {
        SequenceError::Provider(err.0)
    }
}

/// Source of calibrations for an instrument configuration.
///
/// One instance is threaded through a whole pass and must answer
/// consistently for its duration.
pub trait CalibrationProvider: Send + Sync {
    fn calibrations(&self, key: &CalibrationKey)
        -> std::result::Result<Vec<Calibration>, ProviderError>;
}

/// Derives a lookup key from an instrument system. `None` means the
/// instrument does not support calibration lookup in this configuration.
pub trait CalibrationKeyExtractor: Send + Sync {
    fn extract(&self, instrument: &SysConfig) -> Option<CalibrationKey>;
}

/// Key extractor that reads a fixed list of instrument parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterKeyExtractor {
    parameters: Vec<String>,
}

impl ParameterKeyExtractor {
    pub fn new<I, S>(parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

impl CalibrationKeyExtractor for ParameterKeyExtractor {
    fn extract(&self, instrument: &SysConfig) -> Option<CalibrationKey> {
        let mut key = CalibrationKey::new();
        for param in &self.parameters {
            let value = instrument.get(param)?;
            key = key.with(param.clone(), value.to_string());
        }
        Some(key)
    }
}

// ============================================================================
// Calibration record
// ============================================================================

/// One calibration: lamp setup plus how many exposures to take.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub lamps: BTreeSet<Lamp>,
    pub shutter: Shutter,
    pub filter: CalFilter,
    pub diffuser: Diffuser,
    /// Number of exposures
    pub observe: u32,
    pub exposure_time: f64,
    pub coadds: u32,
    pub basecals: BTreeSet<Basecal>,
}

impl Calibration {
    /// Parse a calibration from table properties.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self> {
        let calibration = Self {
            lamps: parse_lamps(required(props, PROP_LAMPS)?)?,
            shutter: parse_enum(props, PROP_SHUTTER)?,
            filter: parse_enum(props, PROP_FILTER)?,
            diffuser: parse_enum(props, PROP_DIFFUSER)?,
            observe: parse_number(props, PROP_OBSERVE)?,
            exposure_time: parse_number(props, PROP_EXPOSURE_TIME)?,
            coadds: parse_number(props, PROP_COADDS)?,
            basecals: parse_basecals(props.get(PROP_BASECAL).map(String::as_str).unwrap_or(""))?,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    /// Check the lamp combination.
    pub fn validate(&self) -> Result<()> {
        let arcs = self.lamps.iter().filter(|l| l.is_arc()).count();
        let flats = self.lamps.len() - arcs;
        if self.lamps.is_empty() {
            return Err(SequenceError::calibration("at least one lamp must be selected"));
        }
        if arcs > 0 && flats > 0 {
            return Err(SequenceError::calibration(
                "mixing of arcs and flats is not allowed",
            ));
        }
        if flats > 1 {
            return Err(SequenceError::calibration(
                "only one flat lamp at a time allowed",
            ));
        }
        Ok(())
    }

    pub fn is_arc(&self) -> bool {
        self.lamps.iter().any(Lamp::is_arc)
    }

    pub fn is_flat(&self) -> bool {
        !self.is_arc()
    }

    pub fn is_basecal_day(&self) -> bool {
        self.basecals.contains(&Basecal::Day)
    }

    pub fn is_basecal_night(&self) -> bool {
        self.basecals.contains(&Basecal::Night)
    }

    pub fn belongs_to(&self, category: CalibrationCategory) -> bool {
        match category {
            CalibrationCategory::Flat => self.is_flat(),
            CalibrationCategory::Arc => self.is_arc(),
            CalibrationCategory::BasecalDay => self.is_basecal_day(),
            CalibrationCategory::BasecalNight => self.is_basecal_night(),
        }
    }

    pub fn observe_type(&self) -> ObserveType {
        if self.is_arc() {
            ObserveType::Arc
        } else {
            ObserveType::Flat
        }
    }

    /// Lamps as written into steps, e.g. `Ar+CuAr`.
    pub fn lamps_text(&self) -> String {
        self.lamps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// The complete step fragment for exposure `step_number` of a plan.
    pub fn planned_step(&self, step_number: i64) -> Config {
        let mut step = Config::new();
        step.put_parameter(CALIBRATION_SYSTEM, LAMP, self.lamps_text());
        step.put_parameter(CALIBRATION_SYSTEM, SHUTTER, self.shutter.to_string());
        step.put_parameter(CALIBRATION_SYSTEM, FILTER, self.filter.to_string());
        step.put_parameter(CALIBRATION_SYSTEM, DIFFUSER, self.diffuser.to_string());
        step.put_parameter(CALIBRATION_SYSTEM, BASECAL_DAY, self.is_basecal_day());
        step.put_parameter(CALIBRATION_SYSTEM, BASECAL_NIGHT, self.is_basecal_night());
        step.put_parameter(OBSERVE_SYSTEM, OBSERVE_TYPE, self.observe_type().to_string());
        step.put_parameter(OBSERVE_SYSTEM, EXPOSURE_TIME, self.exposure_time);
        step.put_parameter(OBSERVE_SYSTEM, COADDS, self.coadds);
        Smartgcal::set_step_number(&mut step, step_number);
        step
    }
}

fn required<'a>(props: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str> {
    props
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SequenceError::calibration(format!("value for '{}' is missing", name)))
}

fn parse_enum<T: FromStr>(props: &BTreeMap<String, String>, name: &str) -> Result<T> {
    let text = required(props, name)?;
    T::from_str(text.trim()).map_err(|_| {
        SequenceError::calibration(format!("illegal value for '{}': '{}'", name, text))
    })
}

fn parse_number<T: FromStr>(props: &BTreeMap<String, String>, name: &str) -> Result<T> {
    parse_enum(props, name)
}

fn parse_lamps(text: &str) -> Result<BTreeSet<Lamp>> {
    text.split(SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            Lamp::from_str(name)
                .map_err(|_| SequenceError::calibration(format!("unknown lamp {}", name)))
        })
        .collect()
}

fn parse_basecals(text: &str) -> Result<BTreeSet<Basecal>> {
    text.split(SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .map(|name| {
            Basecal::from_str(name)
                .map_err(|_| SequenceError::calibration(format!("unknown basecal {}", name)))
        })
        .collect()
}

// ============================================================================
// Recorded steps
// ============================================================================

/// Items that identify an executed calibration step.
const FUNDAMENTALS: &[(&str, &str)] = &[
    (CALIBRATION_SYSTEM, LAMP),
    (CALIBRATION_SYSTEM, SHUTTER),
    (CALIBRATION_SYSTEM, FILTER),
    (CALIBRATION_SYSTEM, DIFFUSER),
    (CALIBRATION_SYSTEM, BASECAL_DAY),
    (CALIBRATION_SYSTEM, BASECAL_NIGHT),
    (OBSERVE_SYSTEM, EXPOSURE_TIME),
    (OBSERVE_SYSTEM, COADDS),
    (SMARTGCAL_SYSTEM, STEP_NUMBER),
];

/// A step being built, read as the calibration it recorded.
///
/// Values come from the current step first and fall back to the previous
/// full state, so a replayed step sees the values that were actually used.
pub struct RecordedCalibrationStep<'a> {
    current: &'a Config,
    previous: &'a Config,
}

impl<'a> RecordedCalibrationStep<'a> {
    pub fn new(current: &'a Config, previous: &'a Config) -> Self {
        Self { current, previous }
    }

    /// Minimal calibration items of an executed step.
    pub fn fundamentals(recorded: &Config) -> Config {
        let mut minimal = Config::new();
        for (system, param) in FUNDAMENTALS {
            if let Some(value) = recorded.parameter(system, param) {
                minimal.put_parameter(system, *param, value.clone());
            }
        }
        minimal
    }

    fn item(&self, system: &str, param: &str) -> Option<&'a Value> {
        self.current
            .parameter(system, param)
            .or_else(|| self.previous.parameter(system, param))
    }

    fn text(&self, param: &str) -> Result<String> {
        self.item(CALIBRATION_SYSTEM, param)
            .map(ToString::to_string)
            .ok_or_else(|| {
                SequenceError::calibration(format!("recorded step has no calibration {}", param))
            })
    }

    pub fn step_number(&self) -> i64 {
        self.item(SMARTGCAL_SYSTEM, STEP_NUMBER)
            .and_then(Value::as_i64)
            .unwrap_or(-1)
    }

    /// Rebuild the calibration this step recorded.
    pub fn calibration(&self) -> Result<Calibration> {
        let mut props = BTreeMap::new();
        props.insert(PROP_LAMPS.to_string(), self.text(LAMP)?);
        props.insert(PROP_SHUTTER.to_string(), self.text(SHUTTER)?);
        props.insert(PROP_FILTER.to_string(), self.text(FILTER)?);
        props.insert(PROP_DIFFUSER.to_string(), self.text(DIFFUSER)?);
        props.insert(PROP_OBSERVE.to_string(), "1".to_string());

        let exposure = self
            .item(OBSERVE_SYSTEM, EXPOSURE_TIME)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        props.insert(PROP_EXPOSURE_TIME.to_string(), exposure.to_string());
        let coadds = self
            .item(OBSERVE_SYSTEM, COADDS)
            .and_then(Value::as_i64)
            .unwrap_or(1);
        props.insert(PROP_COADDS.to_string(), coadds.to_string());

        let flag = |param: &str| {
            self.item(CALIBRATION_SYSTEM, param)
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        let mut basecals = Vec::new();
        if flag(BASECAL_DAY) {
            basecals.push("Day");
        }
        if flag(BASECAL_NIGHT) {
            basecals.push("Night");
        }
        props.insert(PROP_BASECAL.to_string(), basecals.join("+"));

        Calibration::from_properties(&props)
    }

    /// The complete step fragment, fundamentals plus derived items.
    pub fn complete(&self) -> Result<Config> {
        Ok(self.calibration()?.planned_step(self.step_number()))
    }
}

/// Write every item of `fragment` into `step`.
pub fn apply_fragment(fragment: &Config, step: &mut Config) {
    for (key, value) in fragment.entries() {
        step.put_item(&key, value);
    }
}

// ============================================================================
// In-memory provider
// ============================================================================

/// One row of a calibration table file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTableRow {
    pub key: CalibrationKey,
    pub calibration: BTreeMap<String, String>,
}

/// Provider over a fixed table, exact key match.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCalibrationProvider {
    entries: Vec<(CalibrationKey, Calibration)>,
}

impl InMemoryCalibrationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: CalibrationKey, calibration: Calibration) -> Self {
        self.insert(key, calibration);
        self
    }

    pub fn insert(&mut self, key: CalibrationKey, calibration: Calibration) {
        self.entries.push((key, calibration));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a provider from parsed table rows, validating each record.
    pub fn from_rows(rows: Vec<CalibrationTableRow>) -> Result<Self> {
        let mut provider = Self::new();
        for (index, row) in rows.into_iter().enumerate() {
            let calibration = Calibration::from_properties(&row.calibration).map_err(|e| {
                SequenceError::calibration(format!("row {}: {}", index, e))
            })?;
            provider.insert(row.key, calibration);
        }
        Ok(provider)
    }

    /// Load a JSON calibration table.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read calibration table: {:?}", path))?;
        let rows: Vec<CalibrationTableRow> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse calibration table: {:?}", path))?;
        let provider = Self::from_rows(rows)
            .with_context(|| format!("Invalid calibration table: {:?}", path))?;
        tracing::debug!("Loaded {} calibrations from {:?}", provider.len(), path);
        Ok(provider)
    }
}

impl CalibrationProvider for InMemoryCalibrationProvider {
    fn calibrations(
        &self,
        key: &CalibrationKey,
    ) -> std::result::Result<Vec<Calibration>, ProviderError> {
        Ok(self
            .entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, c)| c.clone())
            .collect())
    }
}
