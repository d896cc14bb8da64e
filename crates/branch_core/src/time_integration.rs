//! Implicit theta-method time integration at fixed parameters.
//!
//! The dynamics are `M·dx/dt = F(x, μ)`. Each step solves
//!
//! ```text
//! M·(y − xₙ)/dt − θ·F(y) − (1 − θ)·F(xₙ) = 0
//! ```
//!
//! for `y = xₙ₊₁` with Newton's method. θ = 1 is backward Euler and θ = ½
//! is Crank–Nicolson.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::config::Parameters;
use crate::error::{Checkpoint, Error, Result};
use crate::interface::{Interface, ParameterSet};
use crate::newton::{self, NewtonSettings, NewtonSystem};
use crate::postprocess::{Event, PointKind, Postprocess};
use crate::traits::SteadyProblem;

#[derive(Debug, Clone)]
pub struct IntegrationResult {
    pub state: DVector<f64>,
    pub time: f64,
    /// Completed full steps.
    pub steps: usize,
    /// Reduced sub-steps taken after failed full steps.
    pub substeps: usize,
}

impl IntegrationResult {
    /// The `(state, time)` pair.
    pub fn into_parts(self) -> (DVector<f64>, f64) {
        (self.state, self.time)
    }
}

/// Time integrator bound to an [`Interface`] for its lifetime.
pub struct TimeIntegration<'a, P> {
    interface: &'a mut Interface<P>,
    parameters: Parameters,
}

impl<'a, P: SteadyProblem> TimeIntegration<'a, P> {
    pub fn new(interface: &'a mut Interface<P>, parameters: Parameters) -> Result<Self> {
        parameters.validate()?;
        Ok(Self {
            interface,
            parameters,
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn interface(&mut self) -> &mut Interface<P> {
        &mut *self.interface
    }

    /// Integrates `steps` steps of size `dt` from `x0` at t = 0.
    pub fn integration(
        &mut self,
        x0: DVector<f64>,
        dt: f64,
        steps: usize,
    ) -> Result<IntegrationResult> {
        self.integration_from(x0, 0.0, dt, steps, &mut ())
    }

    /// Like [`TimeIntegration::integration`], reporting every step to
    /// `observer`.
    pub fn integration_with<O: Postprocess + ?Sized>(
        &mut self,
        x0: DVector<f64>,
        dt: f64,
        steps: usize,
        observer: &mut O,
    ) -> Result<IntegrationResult> {
        self.integration_from(x0, 0.0, dt, steps, observer)
    }

    /// Integrates from `(x0, t0)`, calling `observer` once per full step
    /// with the new state and time.
    pub fn integration_from<O: Postprocess + ?Sized>(
        &mut self,
        x0: DVector<f64>,
        t0: f64,
        dt: f64,
        steps: usize,
        observer: &mut O,
    ) -> Result<IntegrationResult> {
        self.parameters.validate()?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "time step must be positive, got {dt}"
            )));
        }
        if !t0.is_finite() {
            return Err(Error::InvalidConfig(format!("start time must be finite, got {t0}")));
        }
        let dim = self.interface.dimension();
        if x0.len() != dim {
            return Err(Error::InvalidConfig(format!(
                "state dimension mismatch. Expected {}, got {}.",
                dim,
                x0.len()
            )));
        }

        let (problem, params) = self.interface.parts();
        let mass = problem.mass_matrix(params).map_err(|e| {
            Error::problem(e).at(Checkpoint::new(&x0, t0))
        })?;
        let mut stepper = Stepper {
            problem,
            params,
            mass: &mass,
            settings: &self.parameters,
            newton: self.parameters.newton_settings(),
            substeps: 0,
        };

        let mut x = x0;
        let mut t = t0;
        for step in 0..steps {
            x = stepper.advance(x, t, dt, 0)?;
            t = t0 + (step + 1) as f64 * dt;
            observer.receive_event(&Event {
                state: &x,
                value: t,
                kind: PointKind::TimeStep,
            });
            if self.parameters.verbose {
                info!("Time step {}: t = {}, |x| = {:e}", step + 1, t, x.norm());
            }
        }

        Ok(IntegrationResult {
            state: x,
            time: t,
            steps,
            substeps: stepper.substeps,
        })
    }
}

struct Stepper<'s, P: ?Sized> {
    problem: &'s mut P,
    params: &'s ParameterSet,
    mass: &'s DMatrix<f64>,
    settings: &'s Parameters,
    newton: NewtonSettings,
    substeps: usize,
}

impl<'s, P: SteadyProblem + ?Sized> Stepper<'s, P> {
    /// Advances `(x, t)` by `dt`, splitting failed steps in halves when
    /// enabled.
    fn advance(&mut self, x: DVector<f64>, t: f64, dt: f64, depth: usize) -> Result<DVector<f64>> {
        let failure = match self.step(&x, t, dt)? {
            Ok(next) => {
                if depth > 0 {
                    self.substeps += 1;
                }
                return Ok(next);
            }
            Err(failure) => failure,
        };

        let half = 0.5 * dt;
        if !self.settings.reduce_time_step_on_failure || half < self.settings.minimum_time_step {
            return Err(failure);
        }

        debug!("Time step {:e} failed at t = {}, retrying as two steps of {:e}", dt, t, half);
        let mid = self.advance(x, t, half, depth + 1)?;
        self.advance(mid, t + half, half, depth + 1)
    }

    /// One theta step. The outer error is fatal, the inner one is a Newton
    /// failure that may be retried with a smaller step.
    fn step(
        &mut self,
        x: &DVector<f64>,
        t: f64,
        dt: f64,
    ) -> Result<std::result::Result<DVector<f64>, Error>> {
        let theta = self.settings.theta;
        let checkpoint = Checkpoint::new(x, t);

        let explicit = if theta < 1.0 {
            let mut f_prev = DVector::zeros(x.len());
            self.problem
                .residual(x, self.params, &mut f_prev)
                .map_err(|e| Error::problem(e).at(checkpoint.clone()))?;
            f_prev * (1.0 - theta)
        } else {
            DVector::zeros(x.len())
        };

        let mut system = ThetaStep {
            problem: &mut *self.problem,
            params: self.params,
            mass: self.mass,
            previous: x,
            explicit,
            theta,
            dt,
        };
        match newton::solve(&mut system, x.clone(), &self.newton) {
            Ok(result) => Ok(Ok(result.state)),
            Err(failure) if failure.source.is_none() => Ok(Err(failure.into_error(checkpoint))),
            Err(failure) => Err(failure.into_error(checkpoint)),
        }
    }
}

/// Residual `M(y − xₙ)/dt − θF(y) − (1 − θ)F(xₙ)` of one theta step.
struct ThetaStep<'s, P: ?Sized> {
    problem: &'s mut P,
    params: &'s ParameterSet,
    mass: &'s DMatrix<f64>,
    previous: &'s DVector<f64>,
    /// (1 − θ)·F(xₙ).
    explicit: DVector<f64>,
    theta: f64,
    dt: f64,
}

impl<'s, P: SteadyProblem + ?Sized> NewtonSystem for ThetaStep<'s, P> {
    fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    fn residual(&mut self, y: &DVector<f64>, out: &mut DVector<f64>) -> anyhow::Result<()> {
        let mut f_val = DVector::zeros(y.len());
        self.problem.residual(y, self.params, &mut f_val)?;
        let rate = self.mass * (y - self.previous) / self.dt;
        out.copy_from(&(rate - f_val * self.theta - &self.explicit));
        Ok(())
    }

    fn jacobian(&mut self, y: &DVector<f64>) -> anyhow::Result<DMatrix<f64>> {
        let jacobian = self.problem.jacobian(y, self.params)?;
        Ok(self.mass / self.dt - jacobian * self.theta)
    }
}
