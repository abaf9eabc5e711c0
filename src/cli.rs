use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// obsseq - Observation sequence expansion
#[derive(Parser)]
#[command(name = "obsseq")]
#[command(about = "Expands observation plans into step-by-step instrument sequences")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Expand a plan into its sequence of steps
    Expand {
        /// Path to the plan file
        plan: PathBuf,

        /// Calibration table to use instead of the one named in the plan
        #[arg(short, long)]
        calibrations: Option<PathBuf>,

        /// Take one repetition of every repeat instead of the configured count
        #[arg(long)]
        collapse: bool,

        /// Print each step reduced to the items that changed
        #[arg(long)]
        compact: bool,

        /// Write the sequence to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a plan file
    Validate {
        /// Path to the plan file to validate
        plan: PathBuf,
    },
    /// List which items change across the expanded sequence
    Keys {
        /// Path to the plan file
        plan: PathBuf,

        /// Calibration table to use instead of the one named in the plan
        #[arg(short, long)]
        calibrations: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
