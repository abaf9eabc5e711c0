//! Composition of a node's own source with its ordered children.
//!
//! # Semantics
//!
//! - Children run sequentially: child `i + 1` starts only once child `i` is
//!   exhausted. Children without steps are skipped.
//! - Each own value replays the full run of children, so a node with `n` own
//!   values over children yielding `a` and `b` steps produces `n * (a + b)`
//!   steps.
//! - One tick writes at most two contributions into the step: the own value
//!   (only on the tick right after the own source advanced) and the active
//!   child's step.
//! - The node key is stamped on every tick, whether or not the node wrote.
//! - The own source gates its children: when it yields nothing on the first
//!   poll, the children are never visited.

use super::{Phase, SequenceBuilder};
use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::metadata::MetaData;
use crate::options::SequenceOptions;
use crate::source::SourceCursor;
use crate::tree::{NodeKey, SequenceNode};
use std::sync::Arc;
use tracing::debug;

/// Iteration state, rebuilt by every `reset`
#[derive(Debug)]
struct IterationState {
    options: SequenceOptions,
    /// `None` when the node carries no data
    own: Option<SourceCursor>,
    current: Option<usize>,
    next_index: usize,
    first_time: bool,
    apply_own: bool,
}

/// Builder for a sequence node with children.
pub struct CompositeBuilder {
    node: Arc<SequenceNode>,
    children: Vec<Box<dyn SequenceBuilder>>,
    phase: Phase,
    state: Option<IterationState>,
}

impl CompositeBuilder {
    pub fn new(node: Arc<SequenceNode>) -> Self {
        let children = node.child_builders();
        Self {
            node,
            children,
            phase: Phase::Unreset,
            state: None,
        }
    }

    /// Number of participating children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn state_mut(&mut self) -> Result<&mut IterationState> {
        let node = self.node.key().clone();
        self.state
            .as_mut()
            .ok_or_else(|| ProtocolError::NotReset { node }.into())
    }
}

/// Restart the children from the first one that has steps.
fn first_child(
    children: &mut [Box<dyn SequenceBuilder>],
    state: &mut IterationState,
) -> Result<()> {
    state.next_index = 0;
    next_child(children, state)
}

/// Move to the next child that has steps, resetting each one visited.
fn next_child(
    children: &mut [Box<dyn SequenceBuilder>],
    state: &mut IterationState,
) -> Result<()> {
    while state.next_index < children.len() {
        let index = state.next_index;
        state.next_index += 1;
        let child = &mut children[index];
        child.reset(&state.options)?;
        if child.has_next()? {
            debug!("Advancing to child {} ({})", index, child.node_key());
            state.current = Some(index);
            return Ok(());
        }
    }
    state.current = None;
    Ok(())
}

/// True if the active child, or a later one, has another step.
fn advance_children(
    children: &mut [Box<dyn SequenceBuilder>],
    state: &mut IterationState,
) -> Result<bool> {
    let Some(index) = state.current else {
        return Ok(false);
    };
    if children[index].has_next()? {
        return Ok(true);
    }
    next_child(children, state)?;
    Ok(state.current.is_some())
}

impl SequenceBuilder for CompositeBuilder {
    fn node_key(&self) -> &NodeKey {
        self.node.key()
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn reset(&mut self, options: &SequenceOptions) -> Result<()> {
        for child in &mut self.children {
            child.reset(options)?;
        }

        let own = self
            .node
            .data()
            .map(|source| SourceCursor::reset(source, options));
        let apply_own = own.as_ref().is_some_and(SourceCursor::has_next);
        let mut state = IterationState {
            options: options.clone(),
            own,
            current: None,
            next_index: 0,
            first_time: true,
            apply_own,
        };
        first_child(&mut self.children, &mut state)?;

        self.state = Some(state);
        self.phase = Phase::Ready;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        self.phase.require_reset(self.node.key())?;
        let children = &mut self.children;
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        let own_has_next = state.own.as_ref().is_some_and(SourceCursor::has_next);

        let more = if state.own.is_none() {
            // A node without data does not iterate
            false
        } else if state.first_time {
            own_has_next
        } else if advance_children(children, state)? {
            true
        } else if own_has_next {
            first_child(children, state)?;
            state.apply_own = true;
            true
        } else {
            false
        };

        self.phase = self.phase.after_poll(more);
        Ok(more)
    }

    fn apply_next(&mut self, step: &mut Config, prior_full: &Config) -> Result<()> {
        self.phase.require_applicable(self.node.key())?;
        let node = Arc::clone(&self.node);
        let state = self.state_mut()?;

        if !state.first_time && !state.apply_own && state.current.is_none() {
            return Err(ProtocolError::Exhausted {
                node: node.key().clone(),
            }
            .into());
        }
        state.first_time = false;

        MetaData::add_node_key(step, node.key());

        if state.apply_own {
            if let (Some(own), Some(source)) = (state.own.as_mut(), node.data()) {
                own.apply_next(source, step);
            }
            state.apply_own = false;
        }

        let current = state.current;
        if let Some(index) = current {
            self.children[index].apply_next(step, prior_full)?;
        }

        self.phase = Phase::InProgress { child: current };
        Ok(())
    }
}
