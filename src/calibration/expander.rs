//! Leaf builder that expands a calibration node into planned steps.
//!
//! The plan is looked up once per pass, on the first applied tick, from the
//! instrument configuration in effect at that point. Every tick then takes
//! one of three paths:
//!
//! | Step                                   | Written                                  |
//! |----------------------------------------|------------------------------------------|
//! | already executed (complete, numbered)  | the recorded calibration, rebuilt        |
//! | no matching calibration                | `observeType = CAL`, mapping error flag  |
//! | otherwise                              | planned step, class, proprietary months  |

use crate::builder::{Phase, SequenceBuilder};
use crate::calibration::{apply_fragment, Calibration, RecordedCalibrationStep};
use crate::config::{
    Config, SysConfig, INSTRUMENT_SYSTEM, OBSERVE_SYSTEM, OBSERVE_TYPE, OBS_CLASS,
    PROPRIETARY_MONTHS,
};
use crate::error::{ProtocolError, Result};
use crate::metadata::{MetaData, Smartgcal};
use crate::options::SequenceOptions;
use crate::source::CalibrationSource;
use crate::tree::NodeKey;
use crate::types::{CalibrationCategory, ObsClass, ObserveType};
use tracing::{debug, warn};

/// One step of the calibration plan
#[derive(Debug, Clone)]
struct PlannedStep {
    config: Config,
    basecal_night: bool,
}

#[derive(Debug)]
struct ExpansionState {
    options: SequenceOptions,
    first_time: bool,
    /// Computed on the first applied tick
    planned: Option<Vec<PlannedStep>>,
    step_count: usize,
    executed_steps: usize,
}

/// Builder for a calibration node.
pub struct CalibrationExpander {
    key: NodeKey,
    source: CalibrationSource,
    phase: Phase,
    state: Option<ExpansionState>,
}

impl CalibrationExpander {
    pub fn new(key: NodeKey, source: CalibrationSource) -> Self {
        Self {
            key,
            source,
            phase: Phase::Unreset,
            state: None,
        }
    }

    /// Class stamped on a planned step when the node sets none.
    pub fn automatic_class(&self, basecal_night: bool) -> ObsClass {
        match self.source.category {
            CalibrationCategory::BasecalDay => ObsClass::DayCal,
            CalibrationCategory::BasecalNight => ObsClass::PartnerCal,
            CalibrationCategory::Flat if basecal_night => ObsClass::PartnerCal,
            CalibrationCategory::Flat => ObsClass::ProgCal,
            CalibrationCategory::Arc if basecal_night => ObsClass::PartnerCal,
            CalibrationCategory::Arc => self.source.default_arc_class,
        }
    }

    fn obs_class(&self, basecal_night: bool) -> ObsClass {
        self.source
            .obs_class
            .unwrap_or_else(|| self.automatic_class(basecal_night))
    }

    fn stamp_class(&self, step: &mut Config, options: &SequenceOptions, basecal_night: bool) {
        let class = self.obs_class(basecal_night);
        let months = if class.is_chargeable() {
            options.program.proprietary_months
        } else {
            0
        };
        let observe = step.system_or_append(OBSERVE_SYSTEM);
        observe.put(OBS_CLASS, class.to_string());
        observe.put(PROPRIETARY_MONTHS, months);
    }

    /// Look up and expand the calibrations for the instrument in effect.
    fn plan(
        &self,
        step: &Config,
        prior_full: &Config,
        options: &SequenceOptions,
    ) -> Result<Vec<PlannedStep>> {
        let mut instrument = prior_full
            .system(INSTRUMENT_SYSTEM)
            .cloned()
            .unwrap_or_else(|| SysConfig::new(INSTRUMENT_SYSTEM));
        if let Some(current) = step.system(INSTRUMENT_SYSTEM) {
            instrument.merge(current);
        }

        let Some(extractor) = &options.key_extractor else {
            debug!("No calibration key extractor for {}", self.key);
            return Ok(Vec::new());
        };
        let Some(lookup) = extractor.extract(&instrument) else {
            debug!("Instrument configuration has no calibration key for {}", self.key);
            return Ok(Vec::new());
        };

        let calibrations: Vec<Calibration> = options
            .provider()
            .calibrations(&lookup)?
            .into_iter()
            .filter(|c| c.belongs_to(self.source.category))
            .collect();
        debug!(
            "{} {} calibration(s) for [{}]",
            calibrations.len(),
            self.source.category,
            lookup
        );

        let mut planned = Vec::new();
        for calibration in &calibrations {
            for _ in 0..calibration.observe {
                let number = planned.len() as i64;
                planned.push(PlannedStep {
                    config: calibration.planned_step(number),
                    basecal_night: calibration.is_basecal_night(),
                });
            }
        }
        Ok(planned)
    }
}

impl SequenceBuilder for CalibrationExpander {
    fn node_key(&self) -> &NodeKey {
        &self.key
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn reset(&mut self, options: &SequenceOptions) -> Result<()> {
        self.state = Some(ExpansionState {
            options: options.clone(),
            first_time: true,
            planned: None,
            step_count: 0,
            executed_steps: 0,
        });
        self.phase = Phase::Ready;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        self.phase.require_reset(&self.key)?;
        let more = match &self.state {
            Some(state) => {
                let planned = state.planned.as_ref().map_or(0, Vec::len);
                state.first_time
                    || state.step_count < planned
                    || state.step_count < state.executed_steps
            }
            None => false,
        };
        self.phase = self.phase.after_poll(more);
        Ok(more)
    }

    fn apply_next(&mut self, step: &mut Config, prior_full: &Config) -> Result<()> {
        self.phase.require_applicable(&self.key)?;
        let Some(mut state) = self.state.take() else {
            return Err(ProtocolError::NotReset {
                node: self.key.clone(),
            }
            .into());
        };

        let result = self.apply_with(&mut state, step, prior_full);
        self.state = Some(state);
        result?;

        self.phase = Phase::InProgress { child: None };
        Ok(())
    }
}

impl CalibrationExpander {
    fn apply_with(
        &self,
        state: &mut ExpansionState,
        step: &mut Config,
        prior_full: &Config,
    ) -> Result<()> {
        state.first_time = false;
        MetaData::add_node_key(step, &self.key);

        if state.planned.is_none() {
            state.planned = Some(self.plan(step, prior_full, &state.options)?);
        }
        let planned = state.planned.as_deref().unwrap_or_default();

        if MetaData::is_complete(step) && Smartgcal::step_number(step) >= 0 {
            let recorded = RecordedCalibrationStep::new(step, prior_full);
            let fragment = recorded.complete()?;
            let basecal_night = recorded.calibration()?.is_basecal_night();
            apply_fragment(&fragment, step);
            self.stamp_class(step, &state.options, basecal_night);
            state.executed_steps = Smartgcal::executed_steps(step);
        } else if planned.is_empty() {
            warn!("No {} calibrations mapped for {}", self.source.category, self.key);
            step.put_parameter(OBSERVE_SYSTEM, OBSERVE_TYPE, ObserveType::Cal.to_string());
            Smartgcal::set_mapping_error(step, true);
        } else if let Some(next) = planned.get(state.step_count) {
            apply_fragment(&next.config, step);
            self.stamp_class(step, &state.options, next.basecal_night);
        } else {
            return Err(ProtocolError::Exhausted {
                node: self.key.clone(),
            }
            .into());
        }

        state.step_count += 1;
        Ok(())
    }
}
