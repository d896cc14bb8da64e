use anyhow::Result;
use branch_core::{ParameterSet, SteadyProblem};
use nalgebra::{DMatrix, DVector};

use super::parameter;

/// `size` uncoupled copies of F(x, μ) = x³ − x − μ.
///
/// Folds sit at μ = ±2/(3√3); the branch through the origin is unstable
/// between them.
#[derive(Debug, Clone)]
pub struct Cubic {
    size: usize,
}

impl Cubic {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl SteadyProblem for Cubic {
    fn dimension(&self) -> usize {
        self.size
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new().declare("mu", 0.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let mu = parameter(params, "mu")?;
        for (f, &x) in out.iter_mut().zip(state.iter()) {
            *f = x * x * x - x - mu;
        }
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_diagonal(&state.map(|x| 3.0 * x * x - 1.0)))
    }

    fn parameter_derivative(
        &mut self,
        _state: &DVector<f64>,
        _params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        match name {
            "mu" => Ok(DVector::from_element(self.size, -1.0)),
            _ => anyhow::bail!("Unknown parameter: {}", name),
        }
    }
}
