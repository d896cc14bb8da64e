//! Named parameters and the mutable set/get adapter around a
//! [`SteadyProblem`].
//!
//! The engines pass a [`ParameterSet`] explicitly into every problem call.
//! [`Interface`] keeps a current set for callers that prefer the
//! `set_parameter`/`get_parameter` style.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::EigenSolverSettings;
use crate::eigen::{EigenSet, EigenvalueTracker};
use crate::error::{Checkpoint, Error, Result};
use crate::newton::{self, NewtonResult, NewtonSettings, NewtonSystem};
use crate::traits::SteadyProblem;

/// Ordered map from parameter name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` with an initial value.
    pub fn declare(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn value(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Updates a declared parameter.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::UnknownParameter(name.to_string())),
        }
    }

    /// Copy of this set with `name` bound to `value`.
    pub fn with(&self, name: &str, value: f64) -> Self {
        let mut next = self.clone();
        next.values.insert(name.to_string(), value);
        next
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A steady problem together with its current parameter values.
pub struct Interface<P> {
    problem: P,
    params: ParameterSet,
}

impl<P: SteadyProblem> Interface<P> {
    pub fn new(problem: P) -> Self {
        let params = problem.parameters();
        Self { problem, params }
    }

    pub fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.params.set(name, value)
    }

    pub fn get_parameter(&self, name: &str) -> Result<f64> {
        self.params.value(name)
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn problem_mut(&mut self) -> &mut P {
        &mut self.problem
    }

    pub fn into_problem(self) -> P {
        self.problem
    }

    /// Splits into the problem and the current parameters so an engine can
    /// drive the problem with explicit parameter sets.
    pub(crate) fn parts(&mut self) -> (&mut P, &mut ParameterSet) {
        (&mut self.problem, &mut self.params)
    }

    pub fn rhs(&mut self, state: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_dimension(state)?;
        let mut out = DVector::zeros(self.problem.dimension());
        self.problem
            .residual(state, &self.params, &mut out)
            .map_err(Error::problem)?;
        Ok(out)
    }

    pub fn jacobian(&mut self, state: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_dimension(state)?;
        self.problem
            .jacobian(state, &self.params)
            .map_err(Error::problem)
    }

    pub fn evaluate_residual_and_jacobian(
        &mut self,
        state: &DVector<f64>,
    ) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let rhs = self.rhs(state)?;
        let jac = self.jacobian(state)?;
        Ok((rhs, jac))
    }

    pub fn parameter_derivative(&mut self, state: &DVector<f64>, name: &str) -> Result<DVector<f64>> {
        self.check_dimension(state)?;
        self.params.value(name)?;
        self.problem
            .parameter_derivative(state, &self.params, name)
            .map_err(Error::problem)
    }

    pub fn mass_matrix(&mut self) -> Result<DMatrix<f64>> {
        self.problem.mass_matrix(&self.params).map_err(Error::problem)
    }

    /// Newton solve of F(x, μ) = 0 with `name` bound to `value`.
    pub fn solve_at(
        &mut self,
        initial: DVector<f64>,
        name: &str,
        value: f64,
        settings: &NewtonSettings,
    ) -> Result<NewtonResult> {
        self.check_dimension(&initial)?;
        let params = self.params.clone();
        params.value(name)?;
        solve_steady(&mut self.problem, &params.with(name, value), initial, value, settings)
    }

    /// Eigenvalues of the linearization at `state` nearest `settings.target`.
    pub fn eigenvalues(
        &mut self,
        state: &DVector<f64>,
        settings: &EigenSolverSettings,
        with_vectors: bool,
    ) -> Result<EigenSet> {
        self.check_dimension(state)?;
        EigenvalueTracker::new(settings.clone()).compute(
            &mut self.problem,
            state,
            &self.params,
            with_vectors,
        )
    }

    /// Shorthand for [`Interface::eigenvalues`] with an explicit target,
    /// tolerance and count.
    pub fn eigs(
        &mut self,
        state: &DVector<f64>,
        target: Complex<f64>,
        tolerance: f64,
        count: usize,
        with_vectors: bool,
    ) -> Result<EigenSet> {
        let settings = EigenSolverSettings {
            target,
            tolerance,
            number_of_eigenvalues: count,
            ..EigenSolverSettings::default()
        };
        settings.validate()?;
        self.eigenvalues(state, &settings, with_vectors)
    }

    fn check_dimension(&self, state: &DVector<f64>) -> Result<()> {
        let dim = self.problem.dimension();
        if state.len() != dim {
            return Err(Error::InvalidConfig(format!(
                "state dimension mismatch. Expected {}, got {}.",
                dim,
                state.len()
            )));
        }
        Ok(())
    }
}

/// F(·, μ) at a fixed parameter set, as a Newton system.
pub(crate) struct AtParameters<'a, P: ?Sized> {
    pub problem: &'a mut P,
    pub params: &'a ParameterSet,
}

impl<'a, P: SteadyProblem + ?Sized> NewtonSystem for AtParameters<'a, P> {
    fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    fn residual(&mut self, y: &DVector<f64>, out: &mut DVector<f64>) -> anyhow::Result<()> {
        self.problem.residual(y, self.params, out)
    }

    fn jacobian(&mut self, y: &DVector<f64>) -> anyhow::Result<DMatrix<f64>> {
        self.problem.jacobian(y, self.params)
    }
}

/// Newton solve at fixed parameters. Failures carry the unverified
/// `(initial, value)` as their checkpoint.
pub(crate) fn solve_steady<P: SteadyProblem + ?Sized>(
    problem: &mut P,
    params: &ParameterSet,
    initial: DVector<f64>,
    value: f64,
    settings: &NewtonSettings,
) -> Result<NewtonResult> {
    let checkpoint = Checkpoint::new(&initial, value);
    let mut system = AtParameters { problem, params };
    newton::solve(&mut system, initial, settings).map_err(|f| f.into_error(checkpoint))
}
