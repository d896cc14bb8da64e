//! Error taxonomy shared by the Newton solver, the continuation engine,
//! the eigenvalue tracker and the time integrator.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// The last valid `(state, value)` pair of a run.
///
/// `value` is the continuation parameter for continuation runs and the
/// physical time for time integration. When the very first Newton solve of
/// a run fails, no point has been verified yet and the checkpoint is the
/// caller's input, not a solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: Vec<f64>,
    pub value: f64,
}

impl Checkpoint {
    pub fn new(state: &DVector<f64>, value: f64) -> Self {
        Self {
            state: state.iter().cloned().collect(),
            value,
        }
    }

    pub fn state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.state)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Newton iteration did not reduce the residual below tolerance.
    #[error("Newton solver failed to converge in {iterations} steps (‖F‖ = {residual_norm:e})")]
    ConvergenceFailure {
        iterations: usize,
        residual_norm: f64,
        last: Checkpoint,
    },

    /// Adaptive step size fell below the configured floor.
    #[error("step size collapsed to {step_size:e} (floor {floor:e}) at parameter value {}", .last.value)]
    StepSizeCollapse {
        step_size: f64,
        floor: f64,
        last: Checkpoint,
    },

    /// The continuation could not reach its target.
    #[error("continuation failed at parameter value {}: {reason}", .last.value)]
    ContinuationFailure { reason: String, last: Checkpoint },

    /// Shift-invert Arnoldi did not converge within its restart budget.
    #[error("eigensolver converged {converged} of {requested} eigenvalues after {restarts} restarts")]
    EigensolverFailure {
        converged: usize,
        requested: usize,
        restarts: usize,
        last: Option<Checkpoint>,
    },

    /// The problem failed to evaluate its residual, Jacobian or mass matrix.
    #[error("problem evaluation failed: {source}")]
    Problem {
        #[source]
        source: anyhow::Error,
        last: Option<Checkpoint>,
    },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Last valid state of the failed run, when the failure happened mid-run.
    pub fn last_valid(&self) -> Option<&Checkpoint> {
        match self {
            Error::ConvergenceFailure { last, .. }
            | Error::StepSizeCollapse { last, .. }
            | Error::ContinuationFailure { last, .. } => Some(last),
            Error::EigensolverFailure { last, .. } | Error::Problem { last, .. } => last.as_ref(),
            Error::UnknownParameter(_) | Error::InvalidConfig(_) => None,
        }
    }

    pub(crate) fn problem(source: anyhow::Error) -> Self {
        Error::Problem { source, last: None }
    }

    /// Attaches `checkpoint` to variants that carry an optional one and do
    /// not have it yet.
    pub(crate) fn at(self, checkpoint: Checkpoint) -> Self {
        match self {
            Error::Problem { source, last: None } => Error::Problem {
                source,
                last: Some(checkpoint),
            },
            Error::EigensolverFailure {
                converged,
                requested,
                restarts,
                last: None,
            } => Error::EigensolverFailure {
                converged,
                requested,
                restarts,
                last: Some(checkpoint),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
