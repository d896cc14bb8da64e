use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::interface::ParameterSet;

/// A discretized steady-state system F(x, μ) = 0.
///
/// Parameter values are passed explicitly with every call; implementations
/// should not cache them between calls.
pub trait SteadyProblem {
    /// Number of degrees of freedom in the state vector.
    fn dimension(&self) -> usize;

    /// Declared parameters and their default values.
    fn parameters(&self) -> ParameterSet;

    /// Evaluates F(x, μ) into `out`.
    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()>;

    /// Evaluates ∂F/∂x.
    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>>;

    /// Evaluates ∂F/∂μ for the named parameter.
    ///
    /// The default uses a central difference with step `1e-7·(1 + |μ|)`.
    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        let value = match params.get(name) {
            Some(value) => value,
            None => bail!("Unknown parameter: {}", name),
        };
        let step = 1e-7 * (1.0 + value.abs());
        let dim = self.dimension();

        let mut plus = DVector::zeros(dim);
        let mut minus = DVector::zeros(dim);
        self.residual(state, &params.with(name, value + step), &mut plus)?;
        self.residual(state, &params.with(name, value - step), &mut minus)?;

        Ok((plus - minus) / (2.0 * step))
    }

    /// Mass matrix M of the dynamics M·dx/dt = F(x, μ). Rows of zeros mark
    /// algebraic constraints such as pressure equations.
    fn mass_matrix(&mut self, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        let dim = self.dimension();
        Ok(DMatrix::identity(dim, dim))
    }
}
