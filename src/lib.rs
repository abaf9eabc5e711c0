//! obsseq Library
//!
//! Expands declarative observation trees into ordered sequences of
//! instrument configuration steps.

pub mod builder;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod execution;
pub mod item_key;
pub mod metadata;
pub mod options;
pub mod plan_file;
pub mod postprocess;
pub mod sequence;
pub mod source;
pub mod tree;
pub mod types;

// Re-export main types for convenience
pub use builder::{Phase, SequenceBuilder};
pub use calibration::{
    Calibration, CalibrationKey, CalibrationKeyExtractor, CalibrationProvider,
    InMemoryCalibrationProvider, ParameterKeyExtractor,
};
pub use config::{Config, SysConfig, Value};
pub use driver::SequenceDriver;
pub use error::{ProtocolError, Result, SequenceError};
pub use execution::{DatasetRecord, ExecutionRecord, ObservationContext};
pub use item_key::ItemKey;
pub use options::SequenceOptions;
pub use plan_file::PlanFile;
pub use postprocess::{ConfigPostProcessor, HookHandle};
pub use sequence::ConfigSequence;
pub use source::StepSource;
pub use tree::{NodeKey, ObservationNode, ProgramInfo, SequenceNode, StaticComponent};
pub use types::{CalibrationCategory, ObsClass, ObserveType};
