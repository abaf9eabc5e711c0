//! Leaf step generators.
//!
//! [`StepSource`] is the closed set of things a sequence node can iterate
//! over. Each variant carries only the data it needs; iteration state lives
//! in a [`SourceCursor`] created by `reset` and owned by the builder.
//!
//! | Variant          | Steps                            | Writes                         |
//! |------------------|----------------------------------|--------------------------------|
//! | `Group`          | 1                                | nothing                        |
//! | `Repeat`         | count (1 when collapsed)         | `observe:*`                    |
//! | `ParameterTable` | longest column                   | one system, column by column   |
//! | `Offsets`        | positions                        | `telescope:p/q/tmpGuideState`  |
//! | `Calibration`    | decided by the calibration table | see `calibration::expander`    |

use crate::config::{
    Config, Value, COADDS, EXPOSURE_TIME, OBSERVE_SYSTEM, OBSERVE_TYPE, OBS_CLASS, REPEAT_COUNT,
    TELESCOPE_SYSTEM,
};
use crate::options::SequenceOptions;
use crate::postprocess::guiding::{GuideState, GUIDE_STATE_PARAM};
use crate::types::{CalibrationCategory, ObsClass, ObserveType};
use serde::{Deserialize, Serialize};

/// Offset position parameters in the telescope system
pub const OFFSET_P: &str = "p";
pub const OFFSET_Q: &str = "q";

/// What a sequence node iterates over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSource {
    /// Succeeds exactly once so that children become reachable
    Group,
    Repeat(RepeatSource),
    ParameterTable(ParameterTable),
    Offsets(OffsetList),
    Calibration(CalibrationSource),
}

impl StepSource {
    /// Number of values this source yields in one pass.
    pub fn step_count(&self, options: &SequenceOptions) -> usize {
        match self {
            Self::Group => 1,
            Self::Repeat(repeat) => repeat.step_count(options.collapse_repeats),
            Self::ParameterTable(table) => table.step_count(),
            Self::Offsets(offsets) => offsets.positions.len(),
            // Unreachable through SequenceNode::builder, which routes these to CalibrationExpander
            Self::Calibration(_) => 0,
        }
    }

    fn write(&self, index: usize, step: &mut Config, options: &SequenceOptions) {
        match self {
            Self::Group | Self::Calibration(_) => {}
            Self::Repeat(repeat) => repeat.write(step, options.add_observation_count),
            Self::ParameterTable(table) => table.write(index, step),
            Self::Offsets(offsets) => {
                if let Some(position) = offsets.positions.get(index) {
                    position.write(step);
                }
            }
        }
    }
}

/// Fixed repeat of one observe type (science, dark, bias...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatSource {
    pub observe_type: ObserveType,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coadds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_class: Option<ObsClass>,
}

impl RepeatSource {
    pub fn new(observe_type: ObserveType, count: u32) -> Self {
        Self {
            observe_type,
            count,
            exposure_time: None,
            coadds: None,
            obs_class: None,
        }
    }

    pub fn with_exposure(mut self, exposure_time: f64, coadds: u32) -> Self {
        self.exposure_time = Some(exposure_time);
        self.coadds = Some(coadds);
        self
    }

    pub fn with_class(mut self, obs_class: ObsClass) -> Self {
        self.obs_class = Some(obs_class);
        self
    }

    fn step_count(&self, collapse: bool) -> usize {
        match (self.count, collapse) {
            (0, _) => 0,
            (_, true) => 1,
            (n, false) => n as usize,
        }
    }

    fn write(&self, step: &mut Config, add_observation_count: bool) {
        let observe = step.system_or_append(OBSERVE_SYSTEM);
        observe.put(OBSERVE_TYPE, self.observe_type.to_string());
        if let Some(exposure) = self.exposure_time {
            observe.put(EXPOSURE_TIME, exposure);
        }
        if let Some(coadds) = self.coadds {
            observe.put(COADDS, coadds);
        }
        if let Some(class) = self.obs_class {
            observe.put(OBS_CLASS, class.to_string());
        }
        if add_observation_count {
            observe.put(REPEAT_COUNT, self.count);
        }
    }
}

/// One named column of a parameter table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Iterates one system's parameters row by row.
///
/// Columns may differ in length; a step only carries the columns that
/// still have a value at its row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    pub system: String,
    pub columns: Vec<TableColumn>,
}

impl ParameterTable {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.columns.push(TableColumn {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    fn step_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.len())
            .max()
            .unwrap_or(0)
    }

    fn write(&self, row: usize, step: &mut Config) {
        let sys = step.system_or_append(&self.system);
        for column in &self.columns {
            if let Some(value) = column.values.get(row) {
                sys.put(column.name.clone(), value.clone());
            }
        }
    }
}

/// One telescope offset position and its guiding state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetPosition {
    pub p: f64,
    pub q: f64,
    #[serde(default)]
    pub guide: GuideState,
}

impl OffsetPosition {
    pub fn new(p: f64, q: f64) -> Self {
        Self {
            p,
            q,
            guide: GuideState::default(),
        }
    }

    pub fn with_guide(mut self, guide: GuideState) -> Self {
        self.guide = guide;
        self
    }

    fn write(&self, step: &mut Config) {
        let telescope = step.system_or_append(TELESCOPE_SYSTEM);
        telescope.put(OFFSET_P, self.p);
        telescope.put(OFFSET_Q, self.q);
        telescope.put(GUIDE_STATE_PARAM, self.guide.to_value());
    }
}

/// List of offset positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetList {
    pub positions: Vec<OffsetPosition>,
}

impl OffsetList {
    pub fn new(positions: impl IntoIterator<Item = OffsetPosition>) -> Self {
        Self {
            positions: positions.into_iter().collect(),
        }
    }
}

fn default_arc_class() -> ObsClass {
    ObsClass::ProgCal
}

/// Calibration node settings; the steps come from the calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSource {
    pub category: CalibrationCategory,
    /// Manual class; the class is derived automatically when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_class: Option<ObsClass>,
    /// Class of arcs that are not night baseline calibrations
    #[serde(default = "default_arc_class")]
    pub default_arc_class: ObsClass,
}

impl CalibrationSource {
    pub fn new(category: CalibrationCategory) -> Self {
        Self {
            category,
            obs_class: None,
            default_arc_class: default_arc_class(),
        }
    }

    pub fn with_class(mut self, obs_class: ObsClass) -> Self {
        self.obs_class = Some(obs_class);
        self
    }

    pub fn with_default_arc_class(mut self, obs_class: ObsClass) -> Self {
        self.default_arc_class = obs_class;
        self
    }
}

/// Iteration state over one source for one pass.
#[derive(Debug, Clone)]
pub struct SourceCursor {
    index: usize,
    total: usize,
    options: SequenceOptions,
}

impl SourceCursor {
    /// Fresh cursor positioned before the first value.
    pub fn reset(source: &StepSource, options: &SequenceOptions) -> Self {
        Self {
            index: 0,
            total: source.step_count(options),
            options: options.clone(),
        }
    }

    pub fn has_next(&self) -> bool {
        self.index < self.total
    }

    /// Values already written this pass.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Write the next value of `source` into `step` and advance.
    pub fn apply_next(&mut self, source: &StepSource, step: &mut Config) {
        source.write(self.index, step, &self.options);
        self.index += 1;
    }
}
