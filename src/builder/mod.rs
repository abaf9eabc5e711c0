//! The reset / has-next / apply-next builder protocol.
//!
//! # Design
//!
//! Every builder tracks where it is in the protocol with an explicit
//! [`Phase`] instead of scattered flags:
//!
//! ```text
//! Unreset --reset--> Ready --has_next=true--> InProgress --has_next=false--> Exhausted
//!                      ^                         |                              |
//!                      +---------reset-----------+------------reset-------------+
//! ```
//!
//! - `has_next` / `apply_next` before `reset` fail with `ProtocolError::NotReset`
//! - `has_next` right after `reset` never fails for protocol reasons
//! - `apply_next` after `has_next` returned false fails with
//!   `ProtocolError::Exhausted`

pub mod component;
pub mod composite;
pub mod observation;

use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::options::SequenceOptions;
use crate::tree::NodeKey;

/// Where a builder is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// `reset` has not been called yet
    #[default]
    Unreset,
    /// Reset, nothing applied yet this pass
    Ready,
    /// At least one step applied; `child` is the active child, if any
    InProgress { child: Option<usize> },
    /// `has_next` reported no further steps
    Exhausted,
}

impl Phase {
    /// Error unless `reset` has been called.
    pub fn require_reset(&self, node: &NodeKey) -> Result<()> {
        match self {
            Self::Unreset => Err(ProtocolError::NotReset { node: node.clone() }.into()),
            _ => Ok(()),
        }
    }

    /// Error unless a step may be applied now.
    pub fn require_applicable(&self, node: &NodeKey) -> Result<()> {
        match self {
            Self::Unreset => Err(ProtocolError::NotReset { node: node.clone() }.into()),
            Self::Exhausted => Err(ProtocolError::Exhausted { node: node.clone() }.into()),
            _ => Ok(()),
        }
    }

    /// Phase after `has_next` answered `more`.
    pub fn after_poll(self, more: bool) -> Self {
        match (self, more) {
            (_, false) => Self::Exhausted,
            (Self::Exhausted, true) | (Self::Unreset, true) => Self::Ready,
            (phase, true) => phase,
        }
    }
}

/// Uniform stateful interface of every sequencing node.
pub trait SequenceBuilder {
    /// Identity stamped into step metadata
    fn node_key(&self) -> &NodeKey;

    /// Current protocol phase
    fn phase(&self) -> Phase;

    /// (Re)start iteration from the beginning with `options`.
    fn reset(&mut self, options: &SequenceOptions) -> Result<()>;

    /// True while at least one more step remains.
    fn has_next(&mut self) -> Result<bool>;

    /// Write the next step into `step`. `prior_full` is the cumulative state
    /// through the previous step.
    fn apply_next(&mut self, step: &mut Config, prior_full: &Config) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert_eq!(Phase::Ready.after_poll(true), Phase::Ready);
        assert_eq!(Phase::Ready.after_poll(false), Phase::Exhausted);
        assert_eq!(
            Phase::InProgress { child: Some(1) }.after_poll(true),
            Phase::InProgress { child: Some(1) }
        );
        assert_eq!(Phase::Exhausted.after_poll(true), Phase::Ready);
    }

    #[test]
    fn test_phase_guards() {
        let node = NodeKey::new("n");
        assert!(Phase::Unreset.require_reset(&node).is_err());
        assert!(Phase::Ready.require_reset(&node).is_ok());
        assert!(Phase::Exhausted.require_applicable(&node).is_err());
        assert!(Phase::InProgress { child: None }.require_applicable(&node).is_ok());
    }
}
