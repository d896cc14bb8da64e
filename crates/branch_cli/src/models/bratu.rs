use anyhow::{bail, Result};
use branch_core::{ParameterSet, SteadyProblem};
use nalgebra::{DMatrix, DVector};

use super::parameter;

/// Liouville–Bratu–Gelfand problem u'' + λ·eᵘ = 0 on (0, 1) with
/// u(0) = u(1) = 0, discretized by second-order central differences on
/// `size` interior nodes.
///
/// The lower branch starts at u = 0 for λ = 0 and folds near λ ≈ 3.51.
#[derive(Debug, Clone)]
pub struct Bratu {
    size: usize,
}

impl Bratu {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    fn inverse_h2(&self) -> f64 {
        let n1 = (self.size + 1) as f64;
        n1 * n1
    }
}

impl SteadyProblem for Bratu {
    fn dimension(&self) -> usize {
        self.size
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new().declare("Lambda", 0.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let lambda = parameter(params, "Lambda")?;
        let scale = self.inverse_h2();
        let n = self.size;
        for i in 0..n {
            let left = if i > 0 { state[i - 1] } else { 0.0 };
            let right = if i + 1 < n { state[i + 1] } else { 0.0 };
            out[i] = (left - 2.0 * state[i] + right) * scale + lambda * state[i].exp();
        }
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        let lambda = parameter(params, "Lambda")?;
        let scale = self.inverse_h2();
        let n = self.size;
        let mut jac = DMatrix::zeros(n, n);
        for i in 0..n {
            jac[(i, i)] = -2.0 * scale + lambda * state[i].exp();
            if i > 0 {
                jac[(i, i - 1)] = scale;
            }
            if i + 1 < n {
                jac[(i, i + 1)] = scale;
            }
        }
        Ok(jac)
    }

    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        _params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        match name {
            "Lambda" => Ok(state.map(f64::exp)),
            _ => bail!("Unknown parameter: {}", name),
        }
    }
}
