//! Pseudo-arclength continuation of steady states in one named parameter.
//!
//! A run marches `(x, μ)` from `start` to `target` with a tangent
//! predictor and a bordered Newton corrector, adapts the step size, lands
//! exactly on the target with a fixed-parameter solve, and optionally
//! localizes sign changes of the largest eigenvalue real part by bisection.

pub mod problem;
pub mod types;
pub mod util;

mod corrector;
mod detect;

pub use problem::{ContinuationProblem, ParameterBranch};
pub use types::{BifurcationRecord, ContinuationResult, StepAttempt};

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::Parameters;
use crate::eigen::EigenvalueTracker;
use crate::error::{Checkpoint, Error, Result};
use crate::interface::{solve_steady, AtParameters, Interface, ParameterSet};
use crate::newton::{self, NewtonSettings};
use crate::postprocess::{Event, PointKind, Postprocess};
use crate::traits::SteadyProblem;

use corrector::PalcSystem;
use detect::{localize, Known};
use util::{bordered_tangent, initial_tangent, oriented_nullspace_tangent, split_aug, to_aug};

/// Continuation driver bound to an [`Interface`] for its lifetime.
pub struct Continuation<'a, P> {
    interface: &'a mut Interface<P>,
    parameters: Parameters,
}

impl<'a, P: SteadyProblem> Continuation<'a, P> {
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

    /// Options may change between runs; they are validated again at the
    /// start of every run.
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn interface(&mut self) -> &mut Interface<P> {
        &mut *self.interface
    }

    /// Continues `x0` in `name` from `start` to `target` with initial
    /// arclength step `ds`.
    pub fn continuation(
        &mut self,
        x0: DVector<f64>,
        name: &str,
        start: f64,
        target: f64,
        ds: f64,
    ) -> Result<ContinuationResult> {
        self.continuation_with(x0, name, start, target, ds, &mut ())
    }

    /// Like [`Continuation::continuation`], reporting every accepted point
    /// and every bisection point to `observer`.
    pub fn continuation_with<O: Postprocess + ?Sized>(
        &mut self,
        x0: DVector<f64>,
        name: &str,
        start: f64,
        target: f64,
        ds: f64,
        observer: &mut O,
    ) -> Result<ContinuationResult> {
        self.parameters.validate()?;
        if !(start.is_finite() && target.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "start ({start}) and target ({target}) must be finite"
            )));
        }
        if !(ds.is_finite() && ds != 0.0) {
            return Err(Error::InvalidConfig(format!(
                "initial step size must be finite and nonzero, got {ds}"
            )));
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
        params.value(name)?;
        let base = params.clone();

        let result = March::new(problem, &base, name, &self.parameters, observer, ds.abs())
            .run(x0, start, target)?;

        params.set(name, result.parameter)?;
        Ok(result)
    }
}

/// The arc from an accepted point along its tangent, bisected when the
/// indicator changes sign between its ends.
struct Arc<'a> {
    from: &'a DVector<f64>,
    tangent: &'a DVector<f64>,
    length: f64,
}

enum Correction {
    Converged { aug: DVector<f64>, iterations: usize },
    Failed { iterations: usize },
}

/// State of a single continuation run.
struct March<'r, P: ?Sized, O: ?Sized> {
    branch: ParameterBranch<'r, P>,
    settings: &'r Parameters,
    newton: NewtonSettings,
    tracker: Option<EigenvalueTracker>,
    observer: &'r mut O,
    zeta: f64,
    initial_step: f64,
    recoveries: usize,
    last: Checkpoint,
    accepted: usize,
    bisections: usize,
    attempts: Vec<StepAttempt>,
    bifurcations: Vec<BifurcationRecord>,
}

impl<'r, P, O> March<'r, P, O>
where
    P: SteadyProblem + ?Sized,
    O: Postprocess + ?Sized,
{
    fn new(
        problem: &'r mut P,
        base: &'r ParameterSet,
        name: &'r str,
        settings: &'r Parameters,
        observer: &'r mut O,
        ds: f64,
    ) -> Self {
        let dim = problem.dimension().max(1);
        let zeta = settings
            .arclength_state_weight
            .unwrap_or(1.0 / dim as f64);
        let tracker = settings
            .detect_bifurcation_points
            .then(|| EigenvalueTracker::new(settings.eigenvalue_solver.clone()));
        Self {
            branch: ParameterBranch::new(problem, base, name),
            settings,
            newton: settings.newton_settings(),
            tracker,
            observer,
            zeta,
            initial_step: ds.min(settings.maximum_step_size),
            recoveries: 0,
            last: Checkpoint {
                state: Vec::new(),
                value: f64::NAN,
            },
            accepted: 0,
            bisections: 0,
            attempts: Vec::new(),
            bifurcations: Vec::new(),
        }
    }

    fn run(mut self, x0: DVector<f64>, start: f64, target: f64) -> Result<ContinuationResult> {
        let name = self.branch.name().to_string();
        let params = self.branch.params_at(start);
        let initial = solve_steady(self.branch.problem_mut(), &params, x0, start, &self.newton)?;
        let x = initial.state;
        self.last = Checkpoint::new(&x, start);

        if self.settings.verbose {
            info!(
                "Continuation in {} from {} to {} (initial Newton: {} iterations)",
                name, start, target, initial.iterations
            );
        }

        let mut known = self.indicator(&x, start)?;
        if (target - start).abs() <= self.settings.destination_tolerance {
            let ds = self.initial_step;
            return Ok(self.finish(x, start, ds, false));
        }

        let direction = (target - start).signum();
        let mut y = to_aug(&x, start);
        let j_ext = self.extended_jacobian(&y)?;
        let mut tangent = initial_tangent(&j_ext, direction, self.zeta)
            .map_err(|e| self.failure(format!("initial tangent: {e}")))?;
        let mut ds = self.initial_step;

        for step in 0..self.settings.maximum_continuation_steps {
            let predicted = &y + &tangent * ds;

            if (predicted[0] - target) * direction >= 0.0 {
                let span = predicted[0] - y[0];
                let frac = if span.abs() > f64::EPSILON * (1.0 + target.abs()) {
                    (target - y[0]) / span
                } else {
                    0.0
                };
                let (x_prev, _) = split_aug(&y);
                let (x_pred, _) = split_aug(&predicted);
                let guess = &x_prev + (x_pred - &x_prev) * frac;

                match self.solve_fixed(guess, target)? {
                    Correction::Converged { aug, iterations } => {
                        self.record_attempt(ds, true, iterations);
                        let (point, _) = split_aug(&aug);
                        self.accept(&point, target, PointKind::Destination);
                        let arc = Arc {
                            from: &y,
                            tangent: &tangent,
                            length: ds * frac,
                        };
                        if let Some(far) = self.detect(&mut known, &point, target, arc)? {
                            if self.settings.stop_at_bifurcation {
                                return Ok(self.finish(far.state, far.param, ds, true));
                            }
                        }
                        return Ok(self.finish(point, target, ds, false));
                    }
                    Correction::Failed { iterations } => {
                        self.record_attempt(ds, false, iterations);
                        debug!("Destination solve at {} = {} failed", name, target);
                        self.shrink(&mut ds, &mut tangent, &y)?;
                        continue;
                    }
                }
            }

            match self.correct(&predicted, &tangent)? {
                Correction::Converged { aug, iterations } => {
                    self.record_attempt(ds, true, iterations);
                    let (point, mu) = split_aug(&aug);
                    self.accept(&point, mu, PointKind::Step);

                    debug!(
                        "Continuation step {}: {} = {:.8e}, ds = {:e}, {} Newton iterations",
                        step, name, mu, ds, iterations
                    );
                    if self.settings.verbose {
                        info!("{} = {} (ds = {:e})", name, mu, ds);
                    }

                    let arc = Arc {
                        from: &y,
                        tangent: &tangent,
                        length: ds,
                    };
                    let resume = match self.detect(&mut known, &point, mu, arc)? {
                        Some(far) if self.settings.stop_at_bifurcation => {
                            return Ok(self.finish(far.state, far.param, ds, true));
                        }
                        Some(far) => {
                            self.last = Checkpoint::new(&far.state, far.param);
                            to_aug(&far.state, far.param)
                        }
                        None => aug,
                    };

                    let j_ext = self.extended_jacobian(&resume)?;
                    tangent = bordered_tangent(&j_ext, &tangent, self.zeta)
                        .map_err(|e| self.failure(format!("tangent update: {e}")))?;
                    y = resume;
                    let growth = (self.settings.optimal_newton_iterations as f64
                        / iterations.max(1) as f64)
                        .clamp(1.0, 2.0);
                    ds = (ds * growth).min(self.settings.maximum_step_size);

                    if (y[0] - target).abs() <= self.settings.destination_tolerance {
                        let (state, mu) = split_aug(&y);
                        return Ok(self.finish(state, mu, ds, false));
                    }
                }
                Correction::Failed { iterations } => {
                    self.record_attempt(ds, false, iterations);
                    debug!(
                        "Corrector failed after {} iterations with ds = {:e}, halving",
                        iterations, ds
                    );
                    self.shrink(&mut ds, &mut tangent, &y)?;
                }
            }
        }

        Err(self.failure(format!(
            "target {} = {} not reached in {} steps",
            name, target, self.settings.maximum_continuation_steps
        )))
    }

    /// Bordered Newton correction of a predicted augmented point.
    fn correct(&mut self, predicted: &DVector<f64>, tangent: &DVector<f64>) -> Result<Correction> {
        let mut system = PalcSystem {
            problem: &mut self.branch,
            predicted,
            tangent,
            zeta: self.zeta,
        };
        match newton::solve(&mut system, predicted.clone(), &self.newton) {
            Ok(result) if result.state.iter().all(|v| v.is_finite()) => Ok(Correction::Converged {
                aug: result.state,
                iterations: result.iterations,
            }),
            Ok(result) => Ok(Correction::Failed {
                iterations: result.iterations,
            }),
            Err(failure) if failure.source.is_none() => Ok(Correction::Failed {
                iterations: failure.iterations,
            }),
            Err(failure) => Err(failure.into_error(self.last.clone())),
        }
    }

    /// Newton solve of F(x, value) = 0 with the parameter held fixed.
    fn solve_fixed(&mut self, guess: DVector<f64>, value: f64) -> Result<Correction> {
        let params = self.branch.params_at(value);
        let mut system = AtParameters {
            problem: self.branch.problem_mut(),
            params: &params,
        };
        match newton::solve(&mut system, guess, &self.newton) {
            Ok(result) => Ok(Correction::Converged {
                aug: to_aug(&result.state, value),
                iterations: result.iterations,
            }),
            Err(failure) if failure.source.is_none() => Ok(Correction::Failed {
                iterations: failure.iterations,
            }),
            Err(failure) => Err(failure.into_error(self.last.clone())),
        }
    }

    fn extended_jacobian(&mut self, aug: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.branch
            .extended_jacobian(aug)
            .map_err(|e| Error::problem(e).at(self.last.clone()))
    }

    /// Halves `ds`, recovering from a collapse while the budget allows.
    ///
    /// A recovery replaces the tangent with the null vector of the extended
    /// Jacobian at the last accepted point and keeps the halved step, so
    /// the step size still decreases after every failure.
    fn shrink(&mut self, ds: &mut f64, tangent: &mut DVector<f64>, y: &DVector<f64>) -> Result<()> {
        *ds *= 0.5;
        if *ds >= self.settings.minimum_step_size {
            return Ok(());
        }

        if self.recoveries < self.settings.maximum_collapse_recoveries {
            self.recoveries += 1;
            warn!(
                "Step size collapsed to {:e} at {} = {}, switching to the null-space tangent (recovery {} of {})",
                ds,
                self.branch.name(),
                y[0],
                self.recoveries,
                self.settings.maximum_collapse_recoveries
            );
            let j_ext = self.extended_jacobian(y)?;
            *tangent = oriented_nullspace_tangent(&j_ext, tangent, self.zeta)
                .map_err(|e| self.failure(format!("tangent recovery: {e}")))?;
            return Ok(());
        }

        if self.recoveries == 0 {
            Err(Error::StepSizeCollapse {
                step_size: *ds,
                floor: self.settings.minimum_step_size,
                last: self.last.clone(),
            })
        } else {
            Err(self.failure(format!(
                "step size collapsed to {:e} again after {} recoveries",
                ds, self.recoveries
            )))
        }
    }

    /// Indicator at `(x, μ)`. `None` when detection is off or was skipped.
    fn indicator(&mut self, x: &DVector<f64>, mu: f64) -> Result<Option<Known>> {
        let tracker = match &self.tracker {
            Some(tracker) => tracker,
            None => return Ok(None),
        };
        let params = self.branch.params_at(mu);
        let computed = tracker.compute(self.branch.problem_mut(), x, &params, false);
        match computed {
            Ok(set) => match set.max_real_part() {
                Some(indicator) if indicator.is_finite() => Ok(Some(Known {
                    state: x.clone(),
                    param: mu,
                    indicator,
                    eigenvalues: set,
                })),
                _ => {
                    let requested = self.settings.eigenvalue_solver.number_of_eigenvalues;
                    self.skip_detection(
                        Error::EigensolverFailure {
                            converged: 0,
                            requested,
                            restarts: 0,
                            last: None,
                        },
                        x,
                        mu,
                    )
                }
            },
            Err(err @ Error::EigensolverFailure { .. }) => self.skip_detection(err, x, mu),
            Err(err) => Err(err.at(Checkpoint::new(x, mu))),
        }
    }

    fn skip_detection(&self, err: Error, x: &DVector<f64>, mu: f64) -> Result<Option<Known>> {
        if self.settings.require_bifurcation_detection {
            return Err(err.at(Checkpoint::new(x, mu)));
        }
        warn!(
            "Skipping bifurcation detection at {} = {}: {}",
            self.branch.name(),
            mu,
            err
        );
        Ok(None)
    }

    /// Compares the indicator at a new point with the last known one and
    /// localizes a sign change on `arc`, the step that produced the point.
    ///
    /// Returns the bracket endpoint past the crossing.
    fn detect(
        &mut self,
        known: &mut Option<Known>,
        x: &DVector<f64>,
        mu: f64,
        arc: Arc<'_>,
    ) -> Result<Option<Known>> {
        let current = match self.indicator(x, mu)? {
            Some(current) => current,
            None => return Ok(None),
        };
        let previous = match known.replace(current.clone()) {
            Some(previous) => previous,
            None => return Ok(None),
        };
        if !previous.crosses(&current) {
            return Ok(None);
        }

        debug!(
            "Indicator changed sign between {} = {} ({:e}) and {} ({:e})",
            self.branch.name(),
            previous.param,
            previous.indicator,
            current.param,
            current.indicator
        );

        // A skipped detection leaves the bracket spanning several steps, in
        // which case the chord between its ends is bisected instead.
        let start = to_aug(&previous.state, previous.param);
        let from_previous = (&start - arc.from).amax() == 0.0;
        let (from, tangent, length) = if from_previous {
            (start, arc.tangent.clone(), arc.length)
        } else {
            let end = to_aug(&current.state, current.param);
            let chord = &end - &start;
            let length = util::scaled_norm(&chord, self.zeta);
            let tangent = util::normalize_scaled(chord, self.zeta)
                .map_err(|e| self.failure(format!("bisection chord: {e}")))?;
            (start, tangent, length)
        };

        let tolerance = self.settings.destination_tolerance;
        let max_steps = self.settings.maximum_bisection_steps;
        let zeta = self.zeta;
        let localized = localize(previous, current, tolerance, zeta, max_steps, |fraction| {
            self.bisection_point(&from, &tangent, fraction * length)
        })?;

        let far = localized.far;
        let critical = far
            .eigenvalues
            .rightmost()
            .map(|p| p.value)
            .unwrap_or_default();
        if localized.converged {
            info!(
                "Bifurcation detected at {} = {} (critical eigenvalue {}, {} bisection steps)",
                self.branch.name(),
                far.param,
                critical,
                localized.steps
            );
        } else {
            warn!(
                "Bifurcation between {} = {} and {} not localized after {} bisection steps",
                self.branch.name(),
                localized.near.param,
                far.param,
                localized.steps
            );
            if self.settings.require_bifurcation_detection {
                return Err(Error::ContinuationFailure {
                    reason: format!(
                        "bifurcation between {} and {} not localized to {:e}",
                        localized.near.param, far.param, tolerance
                    ),
                    last: Checkpoint::new(&far.state, far.param),
                });
            }
        }
        self.bifurcations.push(BifurcationRecord {
            parameter: far.param,
            state: far.state.iter().cloned().collect(),
            bracket: (localized.near.param, far.param),
            critical,
            eigenvalues: far.eigenvalues.values(),
            bisection_steps: localized.steps,
            localized: localized.converged,
        });

        *known = Some(far.clone());
        Ok(Some(far))
    }

    /// Pseudo-arclength point at distance `length` from `from` along
    /// `tangent`, with its indicator.
    fn bisection_point(
        &mut self,
        from: &DVector<f64>,
        tangent: &DVector<f64>,
        length: f64,
    ) -> Result<Option<Known>> {
        let predicted = from + tangent * length;
        match self.correct(&predicted, tangent)? {
            Correction::Converged { aug, .. } => {
                let (point, mu) = split_aug(&aug);
                self.bisections += 1;
                self.observer.receive_event(&Event {
                    state: &point,
                    value: mu,
                    kind: PointKind::Bisection,
                });
                self.indicator(&point, mu)
            }
            Correction::Failed { .. } => {
                debug!(
                    "Bisection corrector failed at arclength {:e} from {} = {}",
                    length,
                    self.branch.name(),
                    from[0]
                );
                Ok(None)
            }
        }
    }

    fn accept(&mut self, point: &DVector<f64>, mu: f64, kind: PointKind) {
        self.accepted += 1;
        self.last = Checkpoint::new(point, mu);
        self.observer.receive_event(&Event {
            state: point,
            value: mu,
            kind,
        });
    }

    fn record_attempt(&mut self, ds: f64, converged: bool, iterations: usize) {
        self.attempts.push(StepAttempt {
            step_size: ds,
            converged,
            iterations,
        });
    }

    fn failure(&self, reason: String) -> Error {
        Error::ContinuationFailure {
            reason,
            last: self.last.clone(),
        }
    }

    fn finish(
        self,
        state: DVector<f64>,
        parameter: f64,
        ds: f64,
        stopped: bool,
    ) -> ContinuationResult {
        ContinuationResult {
            state,
            parameter,
            bifurcations: self.bifurcations,
            accepted_points: self.accepted,
            bisection_points: self.bisections,
            step_size: ds,
            attempts: self.attempts,
            stopped_at_bifurcation: stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EigenSolverSettings;
    use crate::test_problems::{ArctanParabola, Cubic, HopfNormalForm, Opaque, Pitted, Wall};
    use approx::assert_abs_diff_eq;
    use num_complex::Complex;

    fn cubic_root(mu: f64, guess: f64) -> f64 {
        let mut x = guess;
        for _ in 0..100 {
            x -= (x * x * x - x - mu) / (3.0 * x * x - 1.0);
        }
        x
    }

    fn hopf_settings() -> Parameters {
        Parameters {
            detect_bifurcation_points: true,
            eigenvalue_solver: EigenSolverSettings {
                target: Complex::new(0.0, 1.0),
                tolerance: 1e-9,
                ..EigenSolverSettings::default()
            },
            ..Parameters::default()
        }
    }

    #[test]
    fn traverses_fold_of_cubic() {
        let mut interface = Interface::new(Cubic);
        let settings = Parameters {
            maximum_step_size: 0.2,
            ..Parameters::default()
        };
        let mut visited = Vec::new();
        let result = {
            let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
            let mut hook = |x: &DVector<f64>, mu: f64| visited.push((x[0], mu));
            continuation
                .continuation_with(DVector::from_vec(vec![-1.5]), "mu", -2.0, 2.0, 0.1, &mut hook)
                .expect("pseudo-arclength passes both folds")
        };

        assert_abs_diff_eq!(result.parameter, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.state[0], cubic_root(2.0, 1.5), epsilon = 1e-9);

        // The middle branch is only reachable by turning around at a fold.
        assert!(visited.iter().any(|&(x, _)| x.abs() < 0.3));
        let turned = visited.windows(2).any(|w| w[1].1 < w[0].1);
        assert!(turned, "μ must decrease along the middle branch");

        assert_eq!(interface.get_parameter("mu").expect("declared"), 2.0);
    }

    #[test]
    fn accepted_points_satisfy_residual_tolerance() {
        let mut interface = Interface::new(Cubic);
        let settings = Parameters {
            maximum_step_size: 0.3,
            ..Parameters::default()
        };
        let tolerance = settings.newton_tolerance;
        let mut points = Vec::new();
        let result = {
            let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
            let mut hook = |x: &DVector<f64>, mu: f64| points.push((x.clone(), mu));
            continuation
                .continuation_with(DVector::from_vec(vec![-1.5]), "mu", -2.0, 2.0, 0.1, &mut hook)
                .expect("run succeeds")
        };

        assert_eq!(points.len(), result.accepted_points);
        for (x, mu) in &points {
            interface.set_parameter("mu", *mu).expect("declared");
            let residual = interface.rhs(x).expect("evaluation");
            assert!(residual.norm() < tolerance, "‖F‖ = {:e} at μ = {}", residual.norm(), mu);
        }
    }

    #[test]
    fn continuation_is_reversible_on_smooth_branch() {
        let mut interface = Interface::new(Cubic);
        let settings = Parameters::default();
        let tolerance = settings.destination_tolerance;
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");

        let x_a = DVector::from_vec(vec![cubic_root(1.0, 1.3)]);
        let (x_b, mu_b) = continuation
            .continuation(x_a.clone(), "mu", 1.0, 2.0, 0.1)
            .expect("forward")
            .into_parts();
        assert_abs_diff_eq!(mu_b, 2.0, epsilon = tolerance);

        let (x_back, mu_back) = continuation
            .continuation(x_b, "mu", mu_b, 1.0, 0.1)
            .expect("backward")
            .into_parts();
        assert_abs_diff_eq!(mu_back, 1.0, epsilon = tolerance);
        assert!((x_back - x_a).norm() < tolerance);
    }

    #[test]
    fn step_size_shrinks_on_failure_and_respects_maximum() {
        let mut interface = Interface::new(ArctanParabola);
        let settings = Parameters {
            maximum_step_size: 4.0,
            maximum_newton_iterations: 8,
            ..Parameters::default()
        };
        let max_step = settings.maximum_step_size;
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let result = continuation
            .continuation(DVector::from_vec(vec![0.0]), "mu", 0.0, 3.0, 4.0)
            .expect("halving recovers");

        assert_abs_diff_eq!(result.state[0], 9.0, epsilon = 1e-8);
        let attempts = &result.attempts;
        assert!(!attempts[0].converged, "a full step misses the parabola");
        assert!(attempts.iter().any(|a| a.converged));
        for pair in attempts.windows(2) {
            if !pair[0].converged {
                assert!(pair[1].step_size < pair[0].step_size);
            }
        }
        assert!(attempts.iter().all(|a| a.step_size <= max_step));
        assert!(result.step_size <= max_step);

        // Defaults never enlarge the step after a failure, so an
        // uncrossable wall ends in a collapse below the floor.
        let mut interface = Interface::new(Wall { wall: 1.0 });
        let settings = Parameters::default();
        let floor = settings.minimum_step_size;
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let err = continuation
            .continuation(DVector::from_vec(vec![0.0]), "mu", 0.0, 2.0, 0.1)
            .expect_err("the wall cannot be crossed");
        match err {
            Error::StepSizeCollapse { step_size, .. } => {
                assert!(step_size > 0.0 && step_size < floor)
            }
            other => panic!("expected a collapse, got {other}"),
        }
    }

    #[test]
    fn collapse_without_recovery_is_step_size_collapse() {
        let mut interface = Interface::new(Wall { wall: 1.0 });
        let settings = Parameters {
            maximum_collapse_recoveries: 0,
            ..Parameters::default()
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let err = continuation
            .continuation(DVector::from_vec(vec![0.0]), "mu", 0.0, 2.0, 0.1)
            .expect_err("the wall cannot be crossed");

        assert!(matches!(err, Error::StepSizeCollapse { .. }), "{err}");
        let last = err.last_valid().expect("checkpoint");
        assert!(last.value > 0.99 && last.value <= 1.0);
        assert_abs_diff_eq!(last.state[0], last.value, epsilon = 1e-10);
    }

    #[test]
    fn repeated_collapse_is_continuation_failure() {
        let mut interface = Interface::new(Wall { wall: 1.0 });
        let settings = Parameters {
            maximum_collapse_recoveries: 1,
            ..Parameters::default()
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let err = continuation
            .continuation(DVector::from_vec(vec![0.0]), "mu", 0.0, 2.0, 0.1)
            .expect_err("the wall cannot be crossed");

        assert!(matches!(err, Error::ContinuationFailure { .. }), "{err}");
        assert!(err.last_valid().map(|c| c.value <= 1.0).unwrap_or(false));
    }

    #[test]
    fn exhausting_step_budget_is_continuation_failure() {
        let mut interface = Interface::new(Cubic);
        let settings = Parameters {
            maximum_step_size: 0.1,
            maximum_continuation_steps: 3,
            ..Parameters::default()
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let err = continuation
            .continuation(DVector::from_vec(vec![1.3]), "mu", 1.0, 5.0, 0.1)
            .expect_err("three short steps cannot reach the target");
        assert!(matches!(err, Error::ContinuationFailure { .. }));
        assert!(format!("{err}").contains("not reached"));
    }

    #[test]
    fn locates_hopf_crossing() {
        let mut interface = Interface::new(HopfNormalForm {
            critical: 1.0,
            omega: 1.0,
        });
        let settings = hopf_settings();
        let tolerance = settings.destination_tolerance;
        let mut count = 0;
        let result = {
            let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
            let mut hook = |_: &DVector<f64>, _: f64| count += 1;
            continuation
                .continuation_with(DVector::zeros(2), "mu", 0.0, 2.0, 0.3, &mut hook)
                .expect("run succeeds")
        };

        assert_eq!(result.bifurcations.len(), 1);
        let record = &result.bifurcations[0];
        assert!((record.parameter - 1.0).abs() <= tolerance);
        assert!(record.parameter >= 1.0, "record sits on the unstable side");
        assert!(record.is_hopf());
        assert_abs_diff_eq!(record.critical.im.abs(), 1.0, epsilon = 1e-6);

        assert!(result.bisection_points > 0);
        assert_eq!(count, result.accepted_points + result.bisection_points);
        assert_abs_diff_eq!(result.parameter, 2.0, epsilon = 1e-12);
        assert!(!result.stopped_at_bifurcation);
    }

    #[test]
    fn localizes_folds_along_the_arc() {
        let mut interface = Interface::new(Cubic);
        let settings = Parameters {
            maximum_step_size: 0.2,
            detect_bifurcation_points: true,
            destination_tolerance: 1e-6,
            eigenvalue_solver: EigenSolverSettings {
                number_of_eigenvalues: 1,
                tolerance: 1e-10,
                ..EigenSolverSettings::default()
            },
            ..Parameters::default()
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let result = continuation
            .continuation(DVector::from_vec(vec![-1.5]), "mu", -2.0, 2.0, 0.1)
            .expect("run succeeds");

        let fold = 2.0 / (3.0 * 3.0_f64.sqrt());
        assert_eq!(result.bifurcations.len(), 2);
        let (upper, lower) = (&result.bifurcations[0], &result.bifurcations[1]);
        assert!(upper.localized && lower.localized);
        assert!((upper.parameter - fold).abs() <= 1e-6, "μ = {}", upper.parameter);
        assert!((lower.parameter + fold).abs() <= 1e-6, "μ = {}", lower.parameter);
        assert!(!upper.is_hopf());
        assert!((upper.state[0] + 1.0 / 3.0_f64.sqrt()).abs() < 1e-3);
        assert!((lower.state[0] - 1.0 / 3.0_f64.sqrt()).abs() < 1e-3);
        assert_abs_diff_eq!(result.parameter, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn unusable_bisection_points_leave_the_record_unlocalized() {
        // Steps land on 0.3, 0.6, 0.9 and 1.2; the first bisection point
        // at 1.05 falls into the pit.
        let problem = || Pitted {
            inner: HopfNormalForm {
                critical: 1.0,
                omega: 1.0,
            },
            pit: (1.0, 1.1),
        };
        let settings = Parameters {
            maximum_step_size: 0.3,
            ..hopf_settings()
        };
        let tolerance = settings.destination_tolerance;

        let mut interface = Interface::new(problem());
        let mut continuation = Continuation::new(&mut interface, settings.clone()).expect("valid");
        let result = continuation
            .continuation(DVector::zeros(2), "mu", 0.0, 2.0, 0.3)
            .expect("an unlocalized crossing is not fatal");
        assert_eq!(result.bifurcations.len(), 1);
        let record = &result.bifurcations[0];
        assert!(!record.localized);
        assert!(record.bracket.1 - record.bracket.0 > tolerance);
        assert!(record.bracket.0 < 1.0 && record.bracket.1 > 1.0);
        assert_abs_diff_eq!(result.parameter, 2.0, epsilon = 1e-12);

        let mut interface = Interface::new(problem());
        let settings = Parameters {
            require_bifurcation_detection: true,
            ..settings
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let err = continuation
            .continuation(DVector::zeros(2), "mu", 0.0, 2.0, 0.3)
            .expect_err("localization is mandatory");
        assert!(matches!(err, Error::ContinuationFailure { .. }), "{err}");
        assert!(format!("{err}").contains("not localized"));
        assert!(err.last_valid().map(|c| c.value > 1.0).unwrap_or(false));
    }

    #[test]
    fn stops_at_first_bifurcation_when_asked() {
        let mut interface = Interface::new(HopfNormalForm {
            critical: 0.5,
            omega: 2.0,
        });
        let settings = Parameters {
            stop_at_bifurcation: true,
            destination_tolerance: 1e-6,
            ..hopf_settings()
        };
        let mut continuation = Continuation::new(&mut interface, settings).expect("valid");
        let result = continuation
            .continuation(DVector::zeros(2), "mu", 0.0, 3.0, 0.1)
            .expect("run succeeds");

        assert!(result.stopped_at_bifurcation);
        assert!((result.parameter - 0.5).abs() <= 1e-6);
        assert_eq!(result.bifurcations.len(), 1);
        assert_eq!(
            interface.get_parameter("mu").expect("declared"),
            result.parameter
        );
    }

    #[test]
    fn eigensolver_failure_skips_detection_unless_required() {
        let mut interface = Interface::new(Opaque);
        let mut continuation = Continuation::new(&mut interface, hopf_settings()).expect("valid");
        let result = continuation
            .continuation(DVector::zeros(1), "mu", 0.0, 1.0, 0.5)
            .expect("detection failures are not fatal");
        assert!(result.bifurcations.is_empty());
        assert_abs_diff_eq!(result.parameter, 1.0, epsilon = 1e-12);

        continuation.parameters_mut().require_bifurcation_detection = true;
        let err = continuation
            .continuation(DVector::zeros(1), "mu", 0.0, 1.0, 0.5)
            .expect_err("detection is mandatory");
        assert!(matches!(err, Error::EigensolverFailure { .. }));
        assert!(err.last_valid().is_some());
    }

    #[test]
    fn failed_initial_correction_reports_the_input_as_checkpoint() {
        let mut interface = Interface::new(Wall { wall: 1.0 });
        let mut continuation =
            Continuation::new(&mut interface, Parameters::default()).expect("valid");
        let err = continuation
            .continuation(DVector::from_vec(vec![5.0]), "mu", 3.0, 4.0, 0.1)
            .expect_err("no steady state beyond the wall");

        assert!(matches!(err, Error::ConvergenceFailure { .. }), "{err}");
        let last = err.last_valid().expect("checkpoint");
        assert_eq!(last.state, vec![5.0]);
        assert_eq!(last.value, 3.0);
    }

    #[test]
    fn corrects_initial_guess_and_handles_zero_length_runs() {
        let mut interface = Interface::new(Cubic);
        let mut continuation =
            Continuation::new(&mut interface, Parameters::default()).expect("valid");
        let result = continuation
            .continuation(DVector::from_vec(vec![2.1]), "mu", 6.0, 6.0, 0.1)
            .expect("start equals target");
        assert_abs_diff_eq!(result.state[0], 2.0, epsilon = 1e-10);
        assert_eq!(result.accepted_points, 0);
    }

    #[test]
    fn rejects_unknown_parameter_and_bad_input() {
        let mut interface = Interface::new(Cubic);
        let mut continuation =
            Continuation::new(&mut interface, Parameters::default()).expect("valid");
        let err = continuation
            .continuation(DVector::zeros(1), "Reynolds Number", 0.0, 1.0, 0.1)
            .expect_err("undeclared");
        assert!(matches!(err, Error::UnknownParameter(_)));

        assert!(continuation
            .continuation(DVector::zeros(2), "mu", 0.0, 1.0, 0.1)
            .is_err());
        assert!(continuation
            .continuation(DVector::zeros(1), "mu", 0.0, 1.0, 0.0)
            .is_err());
    }
}
