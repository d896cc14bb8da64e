//! Drivers for the `continuation` and `time-integration` subcommands.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use branch_core::{
    BifurcationRecord, Continuation, Interface, Parameters, Postprocess, Sample, TimeIntegration,
    Trace,
};
use log::{info, warn};
use nalgebra::DVector;
use num_complex::Complex;
use serde::Serialize;

use crate::config::Root;
use crate::models::{energy, Model, ModelKind};

#[derive(Debug, Serialize)]
pub struct ContinuationReport {
    pub model: ModelKind,
    pub dimension: usize,
    pub stages: Vec<StageSummary>,
    pub bifurcations: Vec<Bifurcation>,
    /// Trace with back-and-forth visits removed, for plotting.
    pub diagram: Vec<Sample>,
    pub trace: Vec<Sample>,
    pub final_state: StateSummary,
    pub eigenvector: Option<CriticalMode>,
}

#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub parameter: String,
    pub start: f64,
    pub target: f64,
    pub reached: f64,
    pub accepted_points: usize,
    pub bisection_points: usize,
    pub final_step_size: f64,
    pub stopped_at_bifurcation: bool,
}

#[derive(Debug, Serialize)]
pub struct Bifurcation {
    pub name: String,
    pub stage: usize,
    pub hopf: bool,
    pub energy: f64,
    #[serde(flatten)]
    pub record: BifurcationRecord,
}

#[derive(Debug, Serialize)]
pub struct StateSummary {
    pub parameters: BTreeMap<String, f64>,
    pub energy: f64,
    pub norm: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct CriticalMode {
    pub parameter: f64,
    pub eigenvalue: Complex<f64>,
    /// Real part of the unit eigenvector.
    pub real: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub model: ModelKind,
    pub parameter: String,
    pub points: Vec<SweepPoint>,
    /// Per-step energies of the last sweep entry.
    pub trace: Vec<Sample>,
    pub final_state: StateSummary,
}

#[derive(Debug, Serialize)]
pub struct SweepPoint {
    pub parameter: f64,
    pub energy: f64,
    pub time: f64,
    pub substeps: usize,
}

fn interface(root: &Root) -> Result<Interface<Model>> {
    let mut interface = Interface::new(root.model());
    for (name, value) in &root.problem.parameters {
        interface.set_parameter(name, *value)?;
    }
    Ok(interface)
}

fn summarize(interface: &Interface<Model>, state: &DVector<f64>) -> StateSummary {
    StateSummary {
        parameters: interface
            .parameters()
            .iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
        energy: energy(state),
        norm: state.norm(),
        min: state.min(),
        max: state.max(),
    }
}

/// Runs every `[[stage]]` in order, chaining final states and parameter
/// values from one stage into the next.
pub fn run_continuation(root: &Root) -> Result<ContinuationReport> {
    let all_settings = root.stage_settings()?;
    let mut interface = interface(root)?;
    let dim = interface.dimension();
    let mut state = if root.problem.zero_initial_state {
        DVector::zeros(dim)
    } else {
        interface
            .problem()
            .initial_state(interface.parameters())?
    };

    let mut trace = Trace::new(energy);
    let mut untraced = ();
    let mut stages = Vec::with_capacity(root.stage.len());
    let mut bifurcations: Vec<(Bifurcation, Parameters)> = Vec::new();

    for (k, (stage, settings)) in root.stage.iter().zip(all_settings).enumerate() {
        let start = match stage.start {
            Some(start) => start,
            None => interface.get_parameter(&stage.parameter)?,
        };
        info!(
            "Stage {}: {} from {} to {} (ds = {})",
            k + 1,
            stage.parameter,
            start,
            stage.target,
            stage.ds
        );

        let mut continuation = Continuation::new(&mut interface, settings.clone())?;
        let observer: &mut dyn Postprocess = if stage.trace {
            &mut trace
        } else {
            &mut untraced
        };
        let result = match continuation.continuation_with(
            state,
            &stage.parameter,
            start,
            stage.target,
            stage.ds,
            observer,
        ) {
            Ok(result) => result,
            Err(err) => {
                if let Some(last) = err.last_valid() {
                    warn!(
                        "Stage {} stopped; last valid point at {} = {}",
                        k + 1,
                        stage.parameter,
                        last.value
                    );
                }
                return Err(err).with_context(|| format!("stage {} failed", k + 1));
            }
        };

        for record in &result.bifurcations {
            info!(
                "Stage {}: bifurcation at {} = {} (critical eigenvalue {})",
                k + 1,
                stage.parameter,
                record.parameter,
                record.critical
            );
            bifurcations.push((
                Bifurcation {
                    name: stage.parameter.clone(),
                    stage: k + 1,
                    hopf: record.is_hopf(),
                    energy: energy(&record.state_vector()),
                    record: record.clone(),
                },
                settings.clone(),
            ));
        }
        stages.push(StageSummary {
            parameter: stage.parameter.clone(),
            start,
            target: stage.target,
            reached: result.parameter,
            accepted_points: result.accepted_points,
            bisection_points: result.bisection_points,
            final_step_size: result.step_size,
            stopped_at_bifurcation: result.stopped_at_bifurcation,
        });
        state = result.state;
    }

    let final_state = summarize(&interface, &state);

    let wants_mode = root
        .output
        .as_ref()
        .is_some_and(|output| output.bifurcation_eigenvector);
    let eigenvector = match bifurcations.last() {
        Some((bifurcation, settings)) if wants_mode => {
            Some(critical_mode(&mut interface, bifurcation, settings)?)
        }
        _ => None,
    };

    Ok(ContinuationReport {
        model: interface.problem().kind(),
        dimension: dim,
        stages,
        diagram: trace.filter_monotone(),
        trace: trace.into_samples(),
        bifurcations: bifurcations.into_iter().map(|(b, _)| b).collect(),
        final_state,
        eigenvector,
    })
}

/// The rightmost eigenpair at a detected bifurcation, with its vector.
fn critical_mode(
    interface: &mut Interface<Model>,
    bifurcation: &Bifurcation,
    settings: &Parameters,
) -> Result<CriticalMode> {
    let record = &bifurcation.record;
    let previous = interface.get_parameter(&bifurcation.name)?;
    interface.set_parameter(&bifurcation.name, record.parameter)?;
    let eigen = interface.eigenvalues(&record.state_vector(), &settings.eigenvalue_solver, true);
    interface.set_parameter(&bifurcation.name, previous)?;

    let eigen = eigen.context("eigenvector at the bifurcation")?;
    let pair = eigen
        .rightmost()
        .context("eigenvalue solver returned no eigenvalues")?;
    let real = pair
        .real_vector()
        .context("eigenvalue solver returned no vectors")?;
    Ok(CriticalMode {
        parameter: record.parameter,
        eigenvalue: pair.value,
        real: real.iter().copied().collect(),
    })
}

/// Deterministic pseudo-random vector with entries in [0, 1).
pub fn random_state(dim: usize, seed: u64) -> DVector<f64> {
    let mut rng = seed;
    DVector::from_fn(dim, |_, _| {
        rng = rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (rng >> 11) as f64 / (1u64 << 53) as f64
    })
}

/// Integrates in time at each value of the `[sweep]` and records the last
/// energy sample of each entry.
pub fn run_time_integration(root: &Root) -> Result<SweepReport> {
    let sweep = root.sweep.as_ref().context("no [sweep] table")?;
    let settings = root.sweep_settings()?.unwrap_or_default();
    let mut interface = interface(root)?;
    let mut state = random_state(interface.dimension(), sweep.seed);

    let mut points = Vec::new();
    let mut last_trace = Vec::new();
    for value in sweep.values() {
        interface.set_parameter(&sweep.parameter, value)?;
        let mut trace = Trace::new(energy);
        let mut integration = TimeIntegration::new(&mut interface, settings.clone())?;
        let result = integration
            .integration_with(state, sweep.dt, sweep.steps, &mut trace)
            .with_context(|| format!("time integration at {} = {}", sweep.parameter, value))?;

        let level = trace
            .last()
            .map(|sample| sample.quantity)
            .unwrap_or_else(|| energy(&result.state));
        info!(
            "{} = {}: energy {:.6e} at t = {}",
            sweep.parameter, value, level, result.time
        );
        points.push(SweepPoint {
            parameter: value,
            energy: level,
            time: result.time,
            substeps: result.substeps,
        });
        state = result.state;
        last_trace = trace.into_samples();
    }

    Ok(SweepReport {
        model: interface.problem().kind(),
        parameter: sweep.parameter.clone(),
        points,
        trace: last_trace,
        final_state: summarize(&interface, &state),
    })
}
