//! Result types of a continuation run.

use nalgebra::DVector;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// A crossing of the bifurcation indicator.
///
/// `parameter` and `state` are the bracket endpoint on the far side of the
/// crossing, where the march resumes. When `localized` is false the
/// bisection ended before the bracket reached Destination Tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BifurcationRecord {
    pub parameter: f64,
    pub state: Vec<f64>,
    /// Final bisection bracket, ordered as (near side, far side).
    pub bracket: (f64, f64),
    /// Eigenvalue with the largest real part at `parameter`.
    pub critical: Complex<f64>,
    /// All tracked eigenvalues at `parameter`, by descending real part.
    pub eigenvalues: Vec<Complex<f64>>,
    pub bisection_steps: usize,
    pub localized: bool,
}

impl BifurcationRecord {
    /// Crossing of a complex pair, as opposed to a real eigenvalue.
    pub fn is_hopf(&self) -> bool {
        self.critical.im.abs() > 1e-8
    }

    pub fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.state)
    }
}

/// One predictor-corrector attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step_size: f64,
    pub converged: bool,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct ContinuationResult {
    pub state: DVector<f64>,
    pub parameter: f64,
    pub bifurcations: Vec<BifurcationRecord>,
    /// Accepted march points, including the final destination solve.
    pub accepted_points: usize,
    /// Corrector solves made while localizing bifurcations.
    pub bisection_points: usize,
    /// |ds| at the end of the run.
    pub step_size: f64,
    pub attempts: Vec<StepAttempt>,
    /// The run returned at a bifurcation instead of the target.
    pub stopped_at_bifurcation: bool,
}

impl ContinuationResult {
    /// The `(state, parameter)` pair.
    pub fn into_parts(self) -> (DVector<f64>, f64) {
        (self.state, self.parameter)
    }
}
