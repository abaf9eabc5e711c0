//! Root builder of an observation.
//!
//! # Design
//!
//! The composer owns two groups of builders:
//!
//! - **statics**: apply-once components, written on the first tick only
//! - **sequences**: the top-level sequence trees, run one after another
//!
//! After every tick the systems introduced by the statics are moved to the
//! front of the step so they always precede sequence-introduced systems.
//! When the observation carries an [`ObservationContext`], each tick is
//! also decorated through [`ObsState`].
//!
//! The composer does not stamp its own key into step metadata.

use super::{Phase, SequenceBuilder};
use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::execution::{ObsState, ObservationContext};
use crate::options::SequenceOptions;
use crate::tree::{NodeKey, ObservationNode};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct ComposerState {
    options: SequenceOptions,
    first_time: bool,
    /// Active sequence tree
    current: Option<usize>,
    next_index: usize,
    static_pending: bool,
    decoration: Option<ObsState>,
}

/// Builder over a whole observation.
pub struct ObservationComposer {
    node: Arc<ObservationNode>,
    statics: Vec<Box<dyn SequenceBuilder>>,
    sequences: Vec<Box<dyn SequenceBuilder>>,
    /// Names of the systems the statics write, in component order
    static_systems: Vec<String>,
    phase: Phase,
    state: Option<ComposerState>,
}

impl ObservationComposer {
    pub fn new(node: Arc<ObservationNode>) -> Self {
        let statics = node
            .static_components()
            .iter()
            .filter_map(|c| c.builder())
            .collect();
        let sequences = node.sequences().iter().filter_map(|s| s.builder()).collect();

        let mut static_systems: Vec<String> = Vec::new();
        for component in node.static_components() {
            let Some(config) = component.config() else {
                continue;
            };
            for name in config.system_names() {
                if !static_systems.contains(&name) {
                    static_systems.push(name);
                }
            }
        }

        Self {
            node,
            statics,
            sequences,
            static_systems,
            phase: Phase::Unreset,
            state: None,
        }
    }

    pub fn observation(&self) -> &Arc<ObservationNode> {
        &self.node
    }

    fn context(&self) -> Option<&ObservationContext> {
        self.node.context()
    }
}

/// Move to the next sequence tree with steps, resetting each one visited.
fn next_sequence(
    sequences: &mut [Box<dyn SequenceBuilder>],
    state: &mut ComposerState,
) -> Result<()> {
    while state.next_index < sequences.len() {
        let index = state.next_index;
        state.next_index += 1;
        let sequence = &mut sequences[index];
        sequence.reset(&state.options)?;
        if sequence.has_next()? {
            debug!("Entering sequence {} ({})", index, sequence.node_key());
            state.current = Some(index);
            return Ok(());
        }
    }
    state.current = None;
    Ok(())
}

impl SequenceBuilder for ObservationComposer {
    fn node_key(&self) -> &NodeKey {
        self.node.key()
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn reset(&mut self, options: &SequenceOptions) -> Result<()> {
        let mut options = options.clone();
        // A context without a program id keeps the caller's program
        if let Some(ctx) = self
            .context()
            .filter(|ctx| ctx.program.program_id.is_some())
        {
            options.program = ctx.program.clone();
        }

        let mut static_pending = false;
        for builder in &mut self.statics {
            builder.reset(&options)?;
            static_pending |= builder.has_next()?;
        }

        let mut state = ComposerState {
            options,
            first_time: true,
            current: None,
            next_index: 0,
            static_pending,
            decoration: self.context().map(|_| ObsState::new()),
        };
        next_sequence(&mut self.sequences, &mut state)?;

        self.state = Some(state);
        self.phase = Phase::Ready;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        self.phase.require_reset(self.node.key())?;
        let sequences = &mut self.sequences;
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };

        let more = if state.first_time {
            state.current.is_some() || state.static_pending
        } else if let Some(index) = state.current {
            if sequences[index].has_next()? {
                true
            } else {
                next_sequence(sequences, state)?;
                state.current.is_some()
            }
        } else {
            false
        };

        self.phase = self.phase.after_poll(more);
        Ok(more)
    }

    fn apply_next(&mut self, step: &mut Config, prior_full: &Config) -> Result<()> {
        self.phase.require_applicable(self.node.key())?;
        let node = Arc::clone(&self.node);
        let Some(state) = self.state.as_mut() else {
            return Err(ProtocolError::NotReset {
                node: node.key().clone(),
            }
            .into());
        };
        if !state.first_time && state.current.is_none() {
            return Err(ProtocolError::Exhausted {
                node: node.key().clone(),
            }
            .into());
        }
        let first_tick = state.first_time;
        state.first_time = false;

        let ctx = node.context();
        if let (Some(ctx), Some(decoration)) = (ctx, state.decoration.as_ref()) {
            decoration.init_step(step, ctx);
        }

        if first_tick {
            for builder in &mut self.statics {
                if builder.has_next()? {
                    builder.apply_next(step, prior_full)?;
                }
            }
        }

        let current = state.current;
        if let Some(index) = current {
            self.sequences[index].apply_next(step, prior_full)?;
        }

        step.move_to_front(&self.static_systems);

        if let (Some(ctx), Some(decoration)) = (ctx, state.decoration.as_mut()) {
            decoration.update_step(step, ctx);
            if first_tick {
                step.prepend_system(ctx.ocs_system());
            }
            decoration.advance();
        }

        self.phase = Phase::InProgress { child: current };
        Ok(())
    }
}
