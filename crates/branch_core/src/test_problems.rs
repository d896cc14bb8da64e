//! Small synthetic problems shared by the unit tests.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::interface::ParameterSet;
use crate::traits::SteadyProblem;

fn mu(params: &ParameterSet) -> Result<f64> {
    match params.get("mu") {
        Some(value) => Ok(value),
        None => bail!("Unknown parameter: mu"),
    }
}

/// F(x, μ) = x³ − x − μ, with folds at μ = ±2/(3√3).
pub struct Cubic;

impl SteadyProblem for Cubic {
    fn dimension(&self) -> usize {
        1
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
        let x = state[0];
        out[0] = x * x * x - x - mu(params)?;
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        let x = state[0];
        Ok(DMatrix::from_element(1, 1, 3.0 * x * x - 1.0))
    }

    fn parameter_derivative(
        &mut self,
        _state: &DVector<f64>,
        _params: &ParameterSet,
        _name: &str,
    ) -> Result<DVector<f64>> {
        Ok(DVector::from_element(1, -1.0))
    }
}

/// Hopf normal form with eigenvalues (μ − μ*) ± iω at the origin.
pub struct HopfNormalForm {
    pub critical: f64,
    pub omega: f64,
}

impl SteadyProblem for HopfNormalForm {
    fn dimension(&self) -> usize {
        2
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
        let a = mu(params)? - self.critical;
        let (x, y) = (state[0], state[1]);
        let r2 = x * x + y * y;
        out[0] = a * x - self.omega * y - x * r2;
        out[1] = self.omega * x + a * y - y * r2;
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        let a = mu(params)? - self.critical;
        let (x, y) = (state[0], state[1]);
        Ok(DMatrix::from_row_slice(
            2,
            2,
            &[
                a - 3.0 * x * x - y * y,
                -self.omega - 2.0 * x * y,
                self.omega - 2.0 * x * y,
                a - x * x - 3.0 * y * y,
            ],
        ))
    }
}

/// F(x) = −rate·x, independent of μ.
pub struct LinearDecay {
    pub dim: usize,
    pub rate: f64,
}

impl SteadyProblem for LinearDecay {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new().declare("mu", 0.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        _params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        out.copy_from(&(state * -self.rate));
        Ok(())
    }

    fn jacobian(&mut self, _state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::identity(self.dim, self.dim) * -self.rate)
    }
}

/// F(x, μ) = arctan(x − μ²). Undamped Newton diverges once the predictor
/// misses the branch x = μ² by more than about 1.39.
pub struct ArctanParabola;

impl SteadyProblem for ArctanParabola {
    fn dimension(&self) -> usize {
        1
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
        let m = mu(params)?;
        out[0] = (state[0] - m * m).atan();
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        let m = mu(params)?;
        let z = state[0] - m * m;
        Ok(DMatrix::from_element(1, 1, 1.0 / (1.0 + z * z)))
    }

    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        _name: &str,
    ) -> Result<DVector<f64>> {
        let m = mu(params)?;
        let z = state[0] - m * m;
        Ok(DVector::from_element(1, -2.0 * m / (1.0 + z * z)))
    }
}

/// dx/dt = x², which blows up at t = 1/x₀.
pub struct Quadratic;

impl SteadyProblem for Quadratic {
    fn dimension(&self) -> usize {
        1
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new().declare("mu", 0.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        _params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        out[0] = state[0] * state[0];
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_element(1, 1, 2.0 * state[0]))
    }
}

/// F(x, μ) = x − μ that refuses to evaluate beyond `wall`.
pub struct Wall {
    pub wall: f64,
}

impl SteadyProblem for Wall {
    fn dimension(&self) -> usize {
        1
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
        let m = mu(params)?;
        out[0] = if m > self.wall { f64::NAN } else { state[0] - m };
        Ok(())
    }

    fn jacobian(&mut self, _state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_element(1, 1, 1.0))
    }

    fn parameter_derivative(
        &mut self,
        _state: &DVector<f64>,
        _params: &ParameterSet,
        _name: &str,
    ) -> Result<DVector<f64>> {
        Ok(DVector::from_element(1, -1.0))
    }
}

/// F(x, μ) = x − μ whose mass matrix cannot be factored, so every
/// eigenvalue query fails.
pub struct Opaque;

impl SteadyProblem for Opaque {
    fn dimension(&self) -> usize {
        1
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
        out[0] = state[0] - mu(params)?;
        Ok(())
    }

    fn jacobian(&mut self, _state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_element(1, 1, 1.0))
    }

    fn mass_matrix(&mut self, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_element(1, 1, f64::NAN))
    }
}

/// dx₀/dt = −x₀ with the algebraic constraint 0 = x₀ − x₁.
pub struct AlgebraicDecay;

impl SteadyProblem for AlgebraicDecay {
    fn dimension(&self) -> usize {
        2
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new().declare("mu", 0.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        _params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        out[0] = -state[0];
        out[1] = state[0] - state[1];
        Ok(())
    }

    fn jacobian(&mut self, _state: &DVector<f64>, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 1.0, -1.0]))
    }

    fn mass_matrix(&mut self, _params: &ParameterSet) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.0])))
    }
}

/// Wraps a problem so that its residual is NaN for μ inside `pit`.
pub struct Pitted<P> {
    pub inner: P,
    pub pit: (f64, f64),
}

impl<P: SteadyProblem> SteadyProblem for Pitted<P> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn parameters(&self) -> ParameterSet {
        self.inner.parameters()
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let m = mu(params)?;
        if m >= self.pit.0 && m <= self.pit.1 {
            out.fill(f64::NAN);
            return Ok(());
        }
        self.inner.residual(state, params, out)
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        self.inner.jacobian(state, params)
    }

    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        self.inner.parameter_derivative(state, params, name)
    }
}
