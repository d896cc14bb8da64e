//! Damped Newton iteration for square nonlinear systems.
//!
//! The solver is shared by the steady solves, the pseudo-arclength
//! corrector (bordered system) and the theta-method time steps.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Checkpoint, Error};

/// Residual and Jacobian of a square system G(y) = 0.
pub trait NewtonSystem {
    fn dimension(&self) -> usize;

    fn residual(&mut self, y: &DVector<f64>, out: &mut DVector<f64>) -> anyhow::Result<()>;

    fn jacobian(&mut self, y: &DVector<f64>) -> anyhow::Result<DMatrix<f64>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NewtonSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub damping: f64,
    pub line_search: bool,
    pub verbose: bool,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-10,
            damping: 1.0,
            line_search: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub state: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
}

/// Why a Newton solve stopped without converging.
#[derive(Debug)]
pub struct NewtonFailure {
    pub iterations: usize,
    pub residual_norm: f64,
    pub source: Option<anyhow::Error>,
}

impl NewtonFailure {
    fn stalled(iterations: usize, residual_norm: f64) -> Self {
        Self {
            iterations,
            residual_norm,
            source: None,
        }
    }

    fn evaluation(iterations: usize, residual_norm: f64, source: anyhow::Error) -> Self {
        Self {
            iterations,
            residual_norm,
            source: Some(source),
        }
    }

    /// Converts into the public taxonomy, tagging the caller's last valid
    /// point.
    pub fn into_error(self, last: Checkpoint) -> Error {
        match self.source {
            Some(source) => Error::Problem {
                source,
                last: Some(last),
            },
            None => Error::ConvergenceFailure {
                iterations: self.iterations,
                residual_norm: self.residual_norm,
                last,
            },
        }
    }
}

const MAX_LINE_SEARCH_HALVINGS: usize = 8;

/// Solves G(y) = 0 from `initial`, stopping once ‖G(y)‖ < `tolerance`.
///
/// A singular Jacobian or a non-finite residual ends the iteration as a
/// convergence failure.
pub fn solve<S: NewtonSystem + ?Sized>(
    system: &mut S,
    initial: DVector<f64>,
    settings: &NewtonSettings,
) -> Result<NewtonResult, NewtonFailure> {
    let dim = system.dimension();
    if initial.len() != dim {
        return Err(NewtonFailure::evaluation(
            0,
            f64::NAN,
            anyhow::anyhow!(
                "Initial guess dimension mismatch. Expected {}, got {}.",
                dim,
                initial.len()
            ),
        ));
    }

    let mut state = initial;
    let mut residual = DVector::zeros(dim);
    system
        .residual(&state, &mut residual)
        .map_err(|e| NewtonFailure::evaluation(0, f64::NAN, e))?;
    let mut residual_norm = residual.norm();
    let mut iterations = 0usize;

    if settings.verbose {
        info!("Newton iteration 0: ‖F‖ = {:e}", residual_norm);
    }

    loop {
        if !residual_norm.is_finite() {
            debug!("Newton diverged after {} iterations", iterations);
            return Err(NewtonFailure::stalled(iterations, residual_norm));
        }
        if residual_norm < settings.tolerance {
            break;
        }
        if iterations >= settings.max_iterations {
            debug!(
                "Newton failed to converge in {} iterations (‖F‖ = {:e})",
                iterations, residual_norm
            );
            return Err(NewtonFailure::stalled(iterations, residual_norm));
        }

        let jacobian = system
            .jacobian(&state)
            .map_err(|e| NewtonFailure::evaluation(iterations, residual_norm, e))?;
        let rhs = -&residual;
        let delta = match jacobian.lu().solve(&rhs) {
            Some(delta) if delta.iter().all(|v| v.is_finite()) => delta,
            _ => {
                debug!("Jacobian is singular at Newton iteration {}", iterations);
                return Err(NewtonFailure::stalled(iterations, residual_norm));
            }
        };

        let mut factor = settings.damping;
        let mut candidate = &state + &delta * factor;
        let mut candidate_residual = DVector::zeros(dim);
        system
            .residual(&candidate, &mut candidate_residual)
            .map_err(|e| NewtonFailure::evaluation(iterations, residual_norm, e))?;
        let mut candidate_norm = candidate_residual.norm();

        if settings.line_search {
            let mut halvings = 0;
            while !(candidate_norm.is_finite() && candidate_norm < residual_norm)
                && halvings < MAX_LINE_SEARCH_HALVINGS
            {
                factor *= 0.5;
                candidate = &state + &delta * factor;
                system
                    .residual(&candidate, &mut candidate_residual)
                    .map_err(|e| NewtonFailure::evaluation(iterations, residual_norm, e))?;
                candidate_norm = candidate_residual.norm();
                halvings += 1;
            }
        }

        state = candidate;
        residual = candidate_residual;
        residual_norm = candidate_norm;
        iterations += 1;

        if settings.verbose {
            info!(
                "Newton iteration {}: ‖F‖ = {:e} (step factor {})",
                iterations, residual_norm, factor
            );
        }
    }

    Ok(NewtonResult {
        state,
        residual_norm,
        iterations,
    })
}
