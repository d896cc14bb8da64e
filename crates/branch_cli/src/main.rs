mod config;
mod logger;
mod models;
mod runner;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use branch_core::SteadyProblem;
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "branch")]
#[command(version)]
#[command(about = "Pseudo-arclength continuation, bifurcation detection and time integration")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML run file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON output path; overrides [output].path, stdout when neither is set
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// Log step-level diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the [[stage]] continuation stages
    Continuation,
    /// Run the [sweep] of time integrations
    TimeIntegration,
    /// Validate a run file
    Validate,
}

fn load(path: Option<&Path>) -> Result<config::Root> {
    let path = path.context("--config required")?;
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let root = config::Root::parse(&text)
        .with_context(|| format!("failed to parse config: {}", path.display()))?;
    root.validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(root)
}

fn write_report<T: Serialize>(report: &T, root: &config::Root, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    let destination = out
        .map(Path::to_path_buf)
        .or_else(|| root.output.as_ref()?.path.as_ref().map(PathBuf::from));
    match destination {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn validate(root: &config::Root, path: &Path) {
    let model = root.model();
    eprintln!("[branch] config valid: {}", path.display());
    eprintln!(
        "  problem: {:?}, size {}, {} unknowns",
        root.problem.model,
        root.problem.size,
        model.dimension()
    );
    for (k, stage) in root.stage.iter().enumerate() {
        eprintln!(
            "  stage {}: {} -> {} (ds = {}{})",
            k + 1,
            stage.parameter,
            stage.target,
            stage.ds,
            if stage.trace { "" } else { ", untraced" }
        );
    }
    if let Some(sweep) = &root.sweep {
        eprintln!(
            "  sweep: {} in [{}, {}] step {}, {} x dt = {}",
            sweep.parameter, sweep.start, sweep.stop, sweep.step, sweep.steps, sweep.dt
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.verbose);
    let root = load(args.config.as_deref())?;

    match args.command {
        Commands::Continuation => {
            let report = runner::run_continuation(&root)?;
            write_report(&report, &root, args.out.as_deref())
        }
        Commands::TimeIntegration => {
            let report = runner::run_time_integration(&root)?;
            write_report(&report, &root, args.out.as_deref())
        }
        Commands::Validate => {
            if let Some(path) = args.config.as_deref() {
                validate(&root, path);
            }
            Ok(())
        }
    }
}
