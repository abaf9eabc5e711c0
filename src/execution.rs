//! Observation-level step decoration.
//!
//! When an observation carries an [`ObservationContext`], every tick is
//! decorated around the composer's own work:
//!
//! 1. before applying: data label counter, mapping-error reset, completion
//!    flag and, for executed steps, the recorded calibration fundamentals
//! 2. on the first tick: the `ocs` system with program and observation ids
//! 3. after applying: data label, status, science band and, for science
//!    steps, object / exposure time / coadds carried forward from earlier
//!    instrument and telescope settings
//!
//! A `ready` status followed later by a `complete` one becomes `skipped`.
//! That rewrite needs the finished sequence, so it runs as the
//! [`SkippedStatusMarker`] post-processor.

use crate::calibration::{apply_fragment, RecordedCalibrationStep};
use crate::config::{
    Config, SysConfig, Value, COADDS, EXPOSURE_TIME, INSTRUMENT_SYSTEM, OBSERVE_SYSTEM,
    OBSERVE_TYPE, OCS_SYSTEM, TELESCOPE_SYSTEM,
};
use crate::error::Result;
use crate::item_key::ItemKey;
use crate::metadata::{MetaData, Smartgcal};
use crate::postprocess::ConfigPostProcessor;
use crate::sequence::ConfigSequence;
use crate::tree::ProgramInfo;
use crate::types::{ObsStatus, ObserveType};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Observe-system parameters written by the decoration
pub const DATA_LABEL: &str = "dataLabel";
pub const STATUS: &str = "status";
pub const SCI_BAND: &str = "sciBand";
pub const OBJECT: &str = "object";

/// `ocs` system parameters
pub const PROGRAM_ID: &str = "programId";
pub const OBSERVATION_ID: &str = "observationId";

/// Execution state of one recorded dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub label: String,
    #[serde(default)]
    pub in_progress: bool,
}

/// What has already been executed for an observation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(default)]
    pub datasets: Vec<DatasetRecord>,
    /// Steps as they were executed, indexed by data label counter - 1
    #[serde(default)]
    pub completed_steps: Vec<Config>,
}

impl ExecutionRecord {
    /// Status of a dataset label: unknown or in-progress datasets are ready.
    pub fn status(&self, label: &str) -> ObsStatus {
        match self.datasets.iter().find(|d| d.label == label) {
            Some(d) if !d.in_progress => ObsStatus::Complete,
            _ => ObsStatus::Ready,
        }
    }
}

/// Observation facts used to decorate steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationContext {
    #[serde(default)]
    pub observation_id: Option<String>,
    #[serde(default)]
    pub program: ProgramInfo,
    #[serde(default)]
    pub science_band: Option<u32>,
    #[serde(default)]
    pub record: Option<ExecutionRecord>,
}

impl ObservationContext {
    pub fn new(observation_id: impl Into<String>) -> Self {
        Self {
            observation_id: Some(observation_id.into()),
            ..Self::default()
        }
    }

    pub fn with_program(mut self, program: ProgramInfo) -> Self {
        self.program = program;
        self
    }

    pub fn with_science_band(mut self, band: u32) -> Self {
        self.science_band = Some(band);
        self
    }

    pub fn with_record(mut self, record: ExecutionRecord) -> Self {
        self.record = Some(record);
        self
    }

    /// Data label for counter `n`: `<obsid>-NNN`, or `NNN` without an id.
    pub fn data_label(&self, n: u32) -> String {
        match &self.observation_id {
            Some(id) => format!("{}-{:03}", id, n),
            None => format!("{:03}", n),
        }
    }

    fn status(&self, n: u32) -> ObsStatus {
        match (&self.observation_id, &self.record) {
            (Some(_), Some(record)) => record.status(&self.data_label(n)),
            _ => ObsStatus::Ready,
        }
    }

    /// The `ocs` system added to the first step.
    pub fn ocs_system(&self) -> SysConfig {
        SysConfig::new(OCS_SYSTEM)
            .with(
                PROGRAM_ID,
                self.program.program_id.clone().unwrap_or_default(),
            )
            .with(
                OBSERVATION_ID,
                self.observation_id.clone().unwrap_or_default(),
            )
    }
}

/// Per-pass decoration state, rebuilt on every reset
#[derive(Debug, Clone, PartialEq)]
pub struct ObsState {
    data_label_counter: u32,
    exposure_time: Option<Value>,
    coadds: Option<Value>,
    object_name: Option<String>,
}

impl Default for ObsState {
    fn default() -> Self {
        Self {
            data_label_counter: 1,
            exposure_time: None,
            coadds: None,
            object_name: None,
        }
    }
}

impl ObsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_label_counter(&self) -> u32 {
        self.data_label_counter
    }

    /// Bookkeeping written before the builders apply the step.
    pub fn init_step(&self, step: &mut Config, ctx: &ObservationContext) {
        let n = self.data_label_counter;
        MetaData::set_step_count(step, n);
        Smartgcal::set_mapping_error(step, false);

        let complete = ctx.status(n) == ObsStatus::Complete;
        MetaData::set_complete(step, complete);
        if !complete {
            return;
        }

        let Some(record) = &ctx.record else {
            return;
        };
        let index = (n - 1) as usize;
        if let Some(recorded) = record.completed_steps.get(index) {
            apply_fragment(&RecordedCalibrationStep::fundamentals(recorded), step);
            Smartgcal::set_executed_steps(step, &record.completed_steps, index);
        }
    }

    /// Decoration written after the builders applied the step.
    pub fn update_step(&mut self, step: &mut Config, ctx: &ObservationContext) {
        self.remember(step);

        let n = self.data_label_counter;
        let observe_type = step
            .parameter(OBSERVE_SYSTEM, OBSERVE_TYPE)
            .and_then(Value::as_str)
            .and_then(|s| ObserveType::from_str(s).ok());

        let observe = step.system_or_append(OBSERVE_SYSTEM);
        observe.put(DATA_LABEL, ctx.data_label(n));
        observe.put(STATUS, ctx.status(n).to_string());
        if let Some(band) = ctx.science_band {
            observe.put(SCI_BAND, band);
        }

        if observe_type.is_some_and(|t| t.is_science()) {
            if !observe.contains(OBJECT) {
                if let Some(name) = &self.object_name {
                    observe.put(OBJECT, name.clone());
                }
            }
            if !observe.contains(EXPOSURE_TIME) {
                if let Some(exposure) = &self.exposure_time {
                    observe.put(EXPOSURE_TIME, exposure.clone());
                }
            }
            if !observe.contains(COADDS) {
                if let Some(coadds) = &self.coadds {
                    observe.put(COADDS, coadds.clone());
                }
            }
        }
    }

    pub fn advance(&mut self) {
        self.data_label_counter += 1;
    }

    fn remember(&mut self, step: &Config) {
        if let Some(instrument) = step.system(INSTRUMENT_SYSTEM) {
            if let Some(exposure) = instrument.get(EXPOSURE_TIME) {
                self.exposure_time = Some(exposure.clone());
            }
            if let Some(coadds) = instrument.get(COADDS) {
                self.coadds = Some(coadds.clone());
            }
        }
        let name_key = ItemKey::root(TELESCOPE_SYSTEM).child("base").child("name");
        if let Some(name) = step.item(&name_key).and_then(Value::as_str) {
            if !name.is_empty() {
                self.object_name = Some(name.to_string());
            }
        }
    }
}

/// Rewrites `ready` statuses that precede a `complete` one to `skipped`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkippedStatusMarker;

impl ConfigPostProcessor for SkippedStatusMarker {
    fn name(&self) -> &str {
        "skipped-status"
    }

    fn post_process(&self, sequence: ConfigSequence) -> Result<ConfigSequence> {
        let ready = Value::from(ObsStatus::Ready.to_string());
        let complete = Value::from(ObsStatus::Complete.to_string());

        let mut steps = sequence.into_steps();
        let mut pending = Vec::new();
        for index in 0..steps.len() {
            match steps[index].parameter(OBSERVE_SYSTEM, STATUS) {
                Some(status) if *status == ready => pending.push(index),
                Some(status) if *status == complete => {
                    for earlier in pending.drain(..) {
                        steps[earlier].put_parameter(
                            OBSERVE_SYSTEM,
                            STATUS,
                            ObsStatus::Skipped.to_string(),
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(ConfigSequence::from_steps(steps))
    }
}
