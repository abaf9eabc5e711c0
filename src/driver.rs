//! Runs a full sequencing pass over a builder tree.
//!
//! A pass is:
//!
//! 1. normalise the options, injecting the default provider once
//! 2. reset the root
//! 3. loop: fresh step, apply with the cumulative state, merge, append
//! 4. run post-processors over the finished sequence
//!
//! Any error aborts the pass; no partial sequence is returned.

use crate::builder::SequenceBuilder;
use crate::config::Config;
use crate::error::Result;
use crate::options::{default_provider, ProviderHandle, SequenceOptions};
use crate::postprocess::{run_hooks, HookHandle};
use crate::sequence::ConfigSequence;
use crate::tree::ObservationNode;
use std::sync::Arc;
use tracing::{debug, info};

/// Pass runner with a default provider and extra post-processors.
#[derive(Default)]
pub struct SequenceDriver {
    default_provider: Option<ProviderHandle>,
    post_processors: Vec<HookHandle>,
}

impl SequenceDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider used when the options of a pass carry none.
    pub fn with_default_provider(mut self, provider: ProviderHandle) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Append a hook run after every pass.
    pub fn with_post_processor(mut self, hook: HookHandle) -> Self {
        self.post_processors.push(hook);
        self
    }

    fn normalize(&self, options: &SequenceOptions) -> SequenceOptions {
        options.normalized(|| match &self.default_provider {
            Some(provider) => Arc::clone(provider),
            None => default_provider(),
        })
    }

    /// Steps of one pass, before any post-processing.
    fn collect(
        &self,
        root: &mut dyn SequenceBuilder,
        options: &SequenceOptions,
    ) -> Result<ConfigSequence> {
        let options = self.normalize(options);
        info!("Starting sequence pass for {}", root.node_key());
        root.reset(&options)?;

        let mut sequence = ConfigSequence::new();
        let mut full = Config::new();
        while root.has_next()? {
            let mut step = Config::new();
            root.apply_next(&mut step, &full)?;
            full.merge_from(&step);
            debug!("Step {}: {} item(s) written", sequence.len(), step.len());
            sequence.push(step);
        }
        info!("Pass for {} produced {} step(s)", root.node_key(), sequence.len());
        Ok(sequence)
    }

    /// Run a pass over `root`, then the driver's post-processors.
    pub fn run(
        &self,
        root: &mut dyn SequenceBuilder,
        options: &SequenceOptions,
    ) -> Result<ConfigSequence> {
        let sequence = self.collect(root, options)?;
        run_hooks(sequence, &self.post_processors)
    }

    /// Run a pass over an observation.
    ///
    /// Hooks run in order: the observation's static component hooks and
    /// status rewriting, the driver's post-processors, then the guiding
    /// correction last.
    pub fn expand(
        &self,
        observation: &Arc<ObservationNode>,
        options: &SequenceOptions,
    ) -> Result<ConfigSequence> {
        let mut composer = observation.composer();
        let sequence = self.collect(&mut composer, options)?;

        let mut hooks = observation.post_processors();
        let at = hooks.len() - usize::from(observation.guiding().is_some());
        hooks.splice(at..at, self.post_processors.iter().cloned());
        run_hooks(sequence, &hooks)
    }
}
