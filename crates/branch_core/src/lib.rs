//! The `branch_core` crate is the numerical engine behind the `branch` CLI.
//! It traces steady-state branches of discretized nonlinear systems
//! F(x, μ) = 0 and integrates them in time at fixed parameters.
//!
//! Key components:
//! - **Traits**: `SteadyProblem` (residual, Jacobian, parameter derivative, mass matrix).
//! - **Interface**: named parameters and the set/get adapter around a problem.
//! - **Newton**: damped Newton iteration shared by every engine.
//! - **Continuation**: pseudo-arclength continuation with step control and
//!   bifurcation detection.
//! - **Eigen**: shift-invert Arnoldi for eigenvalues nearest a target.
//! - **Time Integration**: implicit theta-method stepping.
//! - **Postprocess**: observers for accepted states.
pub mod config;
pub mod continuation;
pub mod eigen;
pub mod error;
pub mod interface;
pub mod newton;
pub mod postprocess;
pub mod time_integration;
pub mod traits;

#[cfg(test)]
mod test_problems;

pub use config::{EigenSolverSettings, Parameters};
pub use continuation::{BifurcationRecord, Continuation, ContinuationResult};
pub use eigen::{EigenPair, EigenSet, EigenvalueTracker};
pub use error::{Checkpoint, Error, Result};
pub use interface::{Interface, ParameterSet};
pub use newton::{NewtonResult, NewtonSettings};
pub use postprocess::{Event, PointKind, Postprocess, Sample, Trace};
pub use time_integration::{IntegrationResult, TimeIntegration};
pub use traits::SteadyProblem;
