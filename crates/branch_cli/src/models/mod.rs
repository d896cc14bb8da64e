//! Discretized model problems driven by the CLI.

mod bratu;
mod brusselator;
mod cubic;

use bratu::Bratu;
use brusselator::Brusselator;
use cubic::Cubic;

use anyhow::{bail, Result};
use branch_core::{ParameterSet, SteadyProblem};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Model selector used by run files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Cubic,
    Bratu,
    Brusselator,
}

/// A model instance behind a single concrete type, so engines can be
/// monomorphized once for every model the CLI knows about.
#[derive(Debug, Clone)]
pub enum Model {
    Cubic(Cubic),
    Bratu(Bratu),
    Brusselator(Brusselator),
}

impl Model {
    /// Builds a model with `size` grid nodes (state copies for `cubic`).
    pub fn new(kind: ModelKind, size: usize) -> Self {
        match kind {
            ModelKind::Cubic => Model::Cubic(Cubic::new(size)),
            ModelKind::Bratu => Model::Bratu(Bratu::new(size)),
            ModelKind::Brusselator => Model::Brusselator(Brusselator::new(size)),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Cubic(_) => ModelKind::Cubic,
            Model::Bratu(_) => ModelKind::Bratu,
            Model::Brusselator(_) => ModelKind::Brusselator,
        }
    }

    /// A steady state at the given parameters, used when a run does not
    /// start from zeros.
    pub fn initial_state(&self, params: &ParameterSet) -> Result<DVector<f64>> {
        match self {
            Model::Brusselator(model) => model.homogeneous_state(params),
            _ => Ok(DVector::zeros(self.dimension())),
        }
    }

    fn inner(&mut self) -> &mut dyn SteadyProblem {
        match self {
            Model::Cubic(model) => model,
            Model::Bratu(model) => model,
            Model::Brusselator(model) => model,
        }
    }
}

impl SteadyProblem for Model {
    fn dimension(&self) -> usize {
        match self {
            Model::Cubic(model) => model.dimension(),
            Model::Bratu(model) => model.dimension(),
            Model::Brusselator(model) => model.dimension(),
        }
    }

    fn parameters(&self) -> ParameterSet {
        match self {
            Model::Cubic(model) => model.parameters(),
            Model::Bratu(model) => model.parameters(),
            Model::Brusselator(model) => model.parameters(),
        }
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        self.inner().residual(state, params, out)
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        self.inner().jacobian(state, params)
    }

    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        self.inner().parameter_derivative(state, params, name)
    }

    fn mass_matrix(&mut self, params: &ParameterSet) -> Result<DMatrix<f64>> {
        self.inner().mass_matrix(params)
    }
}

/// Volume-averaged energy ½·mean(x²), the scalar plotted in bifurcation
/// diagrams.
pub fn energy(state: &DVector<f64>) -> f64 {
    if state.is_empty() {
        return 0.0;
    }
    0.5 * state.norm_squared() / state.len() as f64
}

fn parameter(params: &ParameterSet, name: &str) -> Result<f64> {
    match params.get(name) {
        Some(value) => Ok(value),
        None => bail!("Unknown parameter: {}", name),
    }
}
