use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use super::util::extended_jacobian;
use crate::interface::ParameterSet;
use crate::traits::SteadyProblem;

/// A system continued in one parameter, evaluated at augmented points
/// `[μ, x...]`.
pub trait ContinuationProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate the residual F(aug_state) and write into `out`.
    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()>;

    /// Compute the extended Jacobian (derivative of F w.r.t. [μ, x]).
    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>>;
}

/// A [`SteadyProblem`] with one named parameter freed and the rest fixed.
pub struct ParameterBranch<'a, P: ?Sized> {
    problem: &'a mut P,
    base: &'a ParameterSet,
    name: &'a str,
}

impl<'a, P: SteadyProblem + ?Sized> ParameterBranch<'a, P> {
    pub fn new(problem: &'a mut P, base: &'a ParameterSet, name: &'a str) -> Self {
        Self {
            problem,
            base,
            name,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Parameter set with the free parameter bound to `value`.
    pub fn params_at(&self, value: f64) -> ParameterSet {
        self.base.with(self.name, value)
    }

    pub fn problem_mut(&mut self) -> &mut P {
        &mut *self.problem
    }
}

impl<'a, P: SteadyProblem + ?Sized> ContinuationProblem for ParameterBranch<'a, P> {
    fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        let dim = self.problem.dimension();
        let params = self.params_at(aug_state[0]);
        let state = aug_state.rows(1, dim).into_owned();
        self.problem.residual(&state, &params, out)
    }

    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>> {
        let dim = self.problem.dimension();
        let params = self.params_at(aug_state[0]);
        let state = aug_state.rows(1, dim).into_owned();
        let jacobian = self.problem.jacobian(&state, &params)?;
        let param_derivative = self
            .problem
            .parameter_derivative(&state, &params, self.name)?;
        Ok(extended_jacobian(&param_derivative, &jacobian))
    }
}
