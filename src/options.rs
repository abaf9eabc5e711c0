//! Options consumed throughout the builder tree during one pass.

use crate::calibration::{
    CalibrationKeyExtractor, CalibrationProvider, InMemoryCalibrationProvider,
};
use crate::tree::ProgramInfo;
use std::fmt;
use std::sync::Arc;

/// Shared calibration provider handle, fixed for a whole pass
pub type ProviderHandle = Arc<dyn CalibrationProvider>;

/// Shared instrument-specific calibration key extractor
pub type KeyExtractorHandle = Arc<dyn CalibrationKeyExtractor>;

/// Options bag handed to every `reset`.
///
/// Cloning is cheap: handles are reference counted, so every builder of a
/// pass sees the same provider instance.
#[derive(Clone, Default)]
pub struct SequenceOptions {
    /// Take one repetition instead of the configured count
    pub collapse_repeats: bool,
    /// Stamp the repeat count into the observe system
    pub add_observation_count: bool,
    pub calibration_provider: Option<ProviderHandle>,
    pub key_extractor: Option<KeyExtractorHandle>,
    /// Owning program, supplied by the observation composer
    pub program: ProgramInfo,
}

impl SequenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collapse_repeats(mut self, collapse: bool) -> Self {
        self.collapse_repeats = collapse;
        self
    }

    pub fn add_observation_count(mut self, add: bool) -> Self {
        self.add_observation_count = add;
        self
    }

    pub fn with_provider(mut self, provider: ProviderHandle) -> Self {
        self.calibration_provider = Some(provider);
        self
    }

    pub fn with_key_extractor(mut self, extractor: KeyExtractorHandle) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    pub fn with_program(mut self, program: ProgramInfo) -> Self {
        self.program = program;
        self
    }

    /// Copy of these options with a provider guaranteed to be set.
    ///
    /// `default` is only consulted when no provider was supplied; the
    /// returned options then carry that one instance for the whole pass.
    pub fn normalized(&self, default: impl FnOnce() -> ProviderHandle) -> Self {
        let mut options = self.clone();
        if options.calibration_provider.is_none() {
            options.calibration_provider = Some(default());
        }
        options
    }

    /// The pass provider, or an empty provider if options were never
    /// normalized.
    pub fn provider(&self) -> ProviderHandle {
        match &self.calibration_provider {
            Some(provider) => Arc::clone(provider),
            None => default_provider(),
        }
    }
}

/// Provider used when the caller supplies none: knows no calibrations.
pub fn default_provider() -> ProviderHandle {
    Arc::new(InMemoryCalibrationProvider::default())
}

impl fmt::Debug for SequenceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceOptions")
            .field("collapse_repeats", &self.collapse_repeats)
            .field("add_observation_count", &self.add_observation_count)
            .field("calibration_provider", &self.calibration_provider.is_some())
            .field("key_extractor", &self.key_extractor.is_some())
            .field("program", &self.program)
            .finish()
    }
}
