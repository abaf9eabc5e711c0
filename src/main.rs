//! obsseq - Main entry point
//!
//! Loads an observation plan, expands it and prints the resulting sequence.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use obsseq::cli::{Cli, Commands};
use obsseq::{ConfigSequence, PlanFile, SequenceDriver};

/// Initialize tracing; `RUST_LOG` overrides the default `info` level
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_plan(path: &Path) -> Result<PlanFile> {
    let plan = PlanFile::load_from_file(path)?;
    plan.validate()
        .with_context(|| format!("Plan {:?} is invalid", path))?;
    Ok(plan)
}

fn expand_plan(
    path: &Path,
    calibrations: Option<&Path>,
    collapse: bool,
) -> Result<ConfigSequence> {
    let mut plan = load_plan(path)?;
    if collapse {
        plan.options.collapse_repeats = true;
    }
    let options = plan.sequence_options(calibrations)?;
    let observation = Arc::new(plan.to_observation());
    let sequence = SequenceDriver::new()
        .expand(&observation, &options)
        .with_context(|| format!("Failed to expand plan {:?}", path))?;
    Ok(sequence)
}

fn run_expand(
    plan: &Path,
    calibrations: Option<&Path>,
    collapse: bool,
    compact: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let sequence = expand_plan(plan, calibrations, collapse)?;
    let json = if compact {
        serde_json::to_string_pretty(&sequence.compact_view())
    } else {
        serde_json::to_string_pretty(&sequence)
    }
    .context("Failed to serialize sequence")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write sequence to {:?}", path))?;
            info!("Wrote {} step(s) to {:?}", sequence.len(), path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_keys(plan: &Path, calibrations: Option<&Path>) -> Result<()> {
    let sequence = expand_plan(plan, calibrations, false)?;
    println!("Iterated:");
    for key in sequence.iterated_keys() {
        let values: Vec<String> = sequence
            .distinct_item_values(&key)
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  {} = [{}]", key, values.join(", "));
    }
    println!("Static:");
    for key in sequence.static_keys() {
        println!("  {}", key);
    }
    Ok(())
}

/// Main application entry point
fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Validate { plan } => {
            info!("Validating plan file: {:?}", plan);
            match load_plan(&plan) {
                Ok(_) => println!("✓ Plan file is valid: {:?}", plan),
                Err(e) => {
                    error!("Plan validation failed: {:#}", e);
                    eprintln!("✗ Plan validation failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Expand {
            plan,
            calibrations,
            collapse,
            compact,
            output,
        } => {
            run_expand(
                &plan,
                calibrations.as_deref(),
                collapse,
                compact,
                output.as_ref(),
            )?;
        }
        Commands::Keys { plan, calibrations } => {
            run_keys(&plan, calibrations.as_deref())?;
        }
    }

    Ok(())
}
