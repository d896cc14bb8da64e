//! Structured engine configuration.
//!
//! The option names are the human-readable keys used by run files, e.g.
//! `"Maximum Step Size"` or `"Eigenvalue Solver"`. Every field has a
//! default and unknown keys are rejected at deserialization time.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::newton::NewtonSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Parameters {
    /// Upper bound on |ds|.
    #[serde(rename = "Maximum Step Size")]
    pub maximum_step_size: f64,
    /// Floor below which |ds| counts as collapsed.
    #[serde(rename = "Minimum Step Size")]
    pub minimum_step_size: f64,
    #[serde(rename = "Newton Tolerance")]
    pub newton_tolerance: f64,
    #[serde(rename = "Maximum Newton Iterations")]
    pub maximum_newton_iterations: usize,
    #[serde(rename = "Newton Damping")]
    pub newton_damping: f64,
    #[serde(rename = "Line Search")]
    pub line_search: bool,
    /// Corrector iteration count at which ds stops growing.
    #[serde(rename = "Optimal Newton Iterations")]
    pub optimal_newton_iterations: usize,
    /// Tolerance on hitting the target parameter and on localizing
    /// bifurcations.
    #[serde(rename = "Destination Tolerance")]
    pub destination_tolerance: f64,
    #[serde(rename = "Maximum Continuation Steps")]
    pub maximum_continuation_steps: usize,
    #[serde(rename = "Maximum Collapse Recoveries")]
    pub maximum_collapse_recoveries: usize,
    #[serde(rename = "Maximum Bisection Steps")]
    pub maximum_bisection_steps: usize,
    /// Weight ζ of the state in the arclength norm. `None` means 1/n.
    #[serde(rename = "Arclength State Weight")]
    pub arclength_state_weight: Option<f64>,
    #[serde(rename = "Detect Bifurcation Points")]
    pub detect_bifurcation_points: bool,
    /// Turns eigensolver failures during detection into run failures.
    #[serde(rename = "Require Bifurcation Detection")]
    pub require_bifurcation_detection: bool,
    #[serde(rename = "Stop At Bifurcation")]
    pub stop_at_bifurcation: bool,
    #[serde(rename = "Eigenvalue Solver")]
    pub eigenvalue_solver: EigenSolverSettings,
    /// Implicitness of the time integrator, 1 is backward Euler.
    #[serde(rename = "Theta")]
    pub theta: f64,
    #[serde(rename = "Reduce Time Step On Failure")]
    pub reduce_time_step_on_failure: bool,
    #[serde(rename = "Minimum Time Step")]
    pub minimum_time_step: f64,
    #[serde(rename = "Verbose")]
    pub verbose: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            maximum_step_size: 2000.0,
            minimum_step_size: 1e-8,
            newton_tolerance: 1e-10,
            maximum_newton_iterations: 20,
            newton_damping: 1.0,
            line_search: false,
            optimal_newton_iterations: 3,
            destination_tolerance: 1e-8,
            maximum_continuation_steps: 1000,
            maximum_collapse_recoveries: 0,
            maximum_bisection_steps: 60,
            arclength_state_weight: None,
            detect_bifurcation_points: false,
            require_bifurcation_detection: false,
            stop_at_bifurcation: false,
            eigenvalue_solver: EigenSolverSettings::default(),
            theta: 1.0,
            reduce_time_step_on_failure: false,
            minimum_time_step: 1e-10,
            verbose: false,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Result<()> {
        positive("Maximum Step Size", self.maximum_step_size)?;
        positive("Minimum Step Size", self.minimum_step_size)?;
        positive("Newton Tolerance", self.newton_tolerance)?;
        positive("Destination Tolerance", self.destination_tolerance)?;
        positive("Minimum Time Step", self.minimum_time_step)?;
        if self.minimum_step_size > self.maximum_step_size {
            return Err(invalid(format!(
                "Minimum Step Size ({}) exceeds Maximum Step Size ({})",
                self.minimum_step_size, self.maximum_step_size
            )));
        }
        if self.maximum_newton_iterations == 0 {
            return Err(invalid("Maximum Newton Iterations must be at least 1"));
        }
        if self.optimal_newton_iterations == 0 {
            return Err(invalid("Optimal Newton Iterations must be at least 1"));
        }
        if !(self.newton_damping > 0.0 && self.newton_damping <= 1.0) {
            return Err(invalid("Newton Damping must lie in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.theta) {
            return Err(invalid("Theta must lie in [0, 1]"));
        }
        if let Some(weight) = self.arclength_state_weight {
            positive("Arclength State Weight", weight)?;
        }
        self.eigenvalue_solver.validate()
    }

    pub fn newton_settings(&self) -> NewtonSettings {
        NewtonSettings {
            max_iterations: self.maximum_newton_iterations,
            tolerance: self.newton_tolerance,
            damping: self.newton_damping,
            line_search: self.line_search,
            verbose: self.verbose,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct EigenSolverSettings {
    /// Shift σ, written as `[re, im]`.
    #[serde(rename = "Target")]
    pub target: Complex<f64>,
    #[serde(rename = "Tolerance")]
    pub tolerance: f64,
    #[serde(rename = "Number of Eigenvalues")]
    pub number_of_eigenvalues: usize,
    #[serde(rename = "Subspace Dimension")]
    pub subspace_dimension: Option<usize>,
    #[serde(rename = "Maximum Restarts")]
    pub maximum_restarts: usize,
}

impl Default for EigenSolverSettings {
    fn default() -> Self {
        Self {
            target: Complex::new(0.0, 0.0),
            tolerance: 1e-7,
            number_of_eigenvalues: 5,
            subspace_dimension: None,
            maximum_restarts: 30,
        }
    }
}

impl EigenSolverSettings {
    pub fn validate(&self) -> Result<()> {
        positive("Eigenvalue Solver.Tolerance", self.tolerance)?;
        if self.number_of_eigenvalues == 0 {
            return Err(invalid(
                "Eigenvalue Solver.Number of Eigenvalues must be at least 1",
            ));
        }
        if !(self.target.re.is_finite() && self.target.im.is_finite()) {
            return Err(invalid("Eigenvalue Solver.Target must be finite"));
        }
        if let Some(dim) = self.subspace_dimension {
            if dim <= self.number_of_eigenvalues {
                return Err(invalid(format!(
                    "Eigenvalue Solver.Subspace Dimension ({dim}) must exceed Number of Eigenvalues ({})",
                    self.number_of_eigenvalues
                )));
            }
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be positive, got {value}")))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig(message.into())
}
