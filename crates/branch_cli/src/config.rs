use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use branch_core::{Parameters, SteadyProblem};
use serde::{Deserialize, Serialize};

use crate::models::{Model, ModelKind};

/// A run file: one problem plus continuation stages and/or a
/// time-integration sweep.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Root {
    pub problem: Problem,
    #[serde(default)]
    pub stage: Vec<Stage>,
    pub sweep: Option<Sweep>,
    pub output: Option<Output>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Problem {
    pub model: ModelKind,
    /// Grid nodes, or state copies for `cubic`.
    #[serde(default = "default_size")]
    pub size: usize,
    /// Overrides of the model's declared parameter defaults.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Start the first stage from zeros instead of the model's steady state.
    #[serde(default)]
    pub zero_initial_state: bool,
}

fn default_size() -> usize {
    1
}

/// One continuation call. Settings are layered on top of the previous
/// stage's settings, so a stage only lists what it changes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub parameter: String,
    /// Defaults to the parameter's current value.
    pub start: Option<f64>,
    pub target: f64,
    pub ds: f64,
    /// Record this stage's points in the bifurcation diagram.
    #[serde(default = "default_true")]
    pub trace: bool,
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_true() -> bool {
    true
}

/// A "poor man's continuation": integrate in time at each parameter value,
/// starting from the previous final state.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Sweep {
    pub parameter: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub dt: f64,
    pub steps: usize,
    /// Seed of the pseudo-random initial state.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    /// JSON destination; stdout when absent.
    pub path: Option<String>,
    /// Attach the real part of the critical eigenvector at the last
    /// detected bifurcation.
    #[serde(default)]
    pub bifurcation_eigenvector: bool,
}

impl Root {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn model(&self) -> Model {
        Model::new(self.problem.model, self.problem.size)
    }

    /// Engine settings of every stage, each layered over its predecessor.
    pub fn stage_settings(&self) -> Result<Vec<Parameters>> {
        let mut merged = toml::Table::new();
        let mut out = Vec::with_capacity(self.stage.len());
        for (k, stage) in self.stage.iter().enumerate() {
            for (key, value) in &stage.settings {
                merged.insert(key.clone(), value.clone());
            }
            let settings = parse_settings(&merged)
                .with_context(|| format!("stage {} settings", k + 1))?;
            out.push(settings);
        }
        Ok(out)
    }

    pub fn sweep_settings(&self) -> Result<Option<Parameters>> {
        self.sweep
            .as_ref()
            .map(|sweep| parse_settings(&sweep.settings).context("sweep settings"))
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.problem.size == 0 {
            bail!("problem.size must be >= 1");
        }
        let declared = self.model().parameters();
        for name in self.problem.parameters.keys() {
            if !declared.contains(name) {
                bail!("problem.parameters: unknown parameter {}", name);
            }
        }
        if self.stage.is_empty() && self.sweep.is_none() {
            bail!("nothing to run: add a [[stage]] or a [sweep] table");
        }

        for (k, stage) in self.stage.iter().enumerate() {
            if !declared.contains(&stage.parameter) {
                bail!("stage {}: unknown parameter {}", k + 1, stage.parameter);
            }
            if !(stage.ds.is_finite() && stage.ds != 0.0) {
                bail!("stage {}: ds must be finite and nonzero", k + 1);
            }
            if !stage.target.is_finite() || stage.start.is_some_and(|s| !s.is_finite()) {
                bail!("stage {}: start and target must be finite", k + 1);
            }
        }
        for settings in self.stage_settings()? {
            settings.validate()?;
        }

        if let Some(sweep) = &self.sweep {
            if !declared.contains(&sweep.parameter) {
                bail!("sweep: unknown parameter {}", sweep.parameter);
            }
            if !(sweep.step.is_finite() && sweep.step != 0.0) {
                bail!("sweep.step must be finite and nonzero");
            }
            if (sweep.stop - sweep.start) * sweep.step < 0.0 {
                bail!("sweep.step points away from sweep.stop");
            }
            if !(sweep.dt > 0.0 && sweep.dt.is_finite()) {
                bail!("sweep.dt must be positive");
            }
            if sweep.steps == 0 {
                bail!("sweep.steps must be >= 1");
            }
        }
        if let Some(settings) = self.sweep_settings()? {
            settings.validate()?;
        }
        Ok(())
    }
}

impl Sweep {
    /// Parameter values from `start` towards `stop` in increments of
    /// `step`, including `stop` when it lies on the grid.
    pub fn values(&self) -> Vec<f64> {
        let count = ((self.stop - self.start) / self.step + 1e-9).floor();
        if !(count >= 0.0) {
            return Vec::new();
        }
        (0..=count as usize)
            .map(|k| self.start + k as f64 * self.step)
            .collect()
    }
}

fn parse_settings(table: &toml::Table) -> Result<Parameters> {
    let settings: Parameters = toml::Value::Table(table.clone()).try_into()?;
    Ok(settings)
}
