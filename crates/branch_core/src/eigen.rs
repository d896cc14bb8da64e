//! Eigenvalues of the linearized operator nearest a target.
//!
//! Solves the generalized problem J·v = λ·M·v with shift-invert Arnoldi:
//! the Krylov space is built for (J − σM)⁻¹M in complex arithmetic, whose
//! dominant Ritz values θ map back as λ = σ + 1/θ. Only the `k` eigenvalues
//! closest to σ are resolved; the full spectrum is never formed.

use log::debug;
use nalgebra::linalg::{Schur, LU, SVD};
use nalgebra::{DMatrix, DVector, Dyn};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::EigenSolverSettings;
use crate::error::{Error, Result};
use crate::interface::ParameterSet;
use crate::traits::SteadyProblem;

type C64 = Complex<f64>;

const DEFAULT_SUBSPACE: usize = 20;
const BREAKDOWN_TOLERANCE: f64 = 1e-13;
const SCHUR_MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenPair {
    pub value: Complex<f64>,
    /// Whether this is the eigenvalue closest to the solver target.
    pub nearest: bool,
    /// Unit eigenvector, phase-normalized so its largest entry is real.
    #[serde(default)]
    pub vector: Option<Vec<Complex<f64>>>,
}

impl EigenPair {
    /// Real-part projection of the eigenvector.
    pub fn real_vector(&self) -> Option<DVector<f64>> {
        self.vector
            .as_ref()
            .map(|v| DVector::from_iterator(v.len(), v.iter().map(|c| c.re)))
    }

    pub fn imag_vector(&self) -> Option<DVector<f64>> {
        self.vector
            .as_ref()
            .map(|v| DVector::from_iterator(v.len(), v.iter().map(|c| c.im)))
    }
}

/// Eigenpairs sorted by descending real part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EigenSet {
    pub pairs: Vec<EigenPair>,
}

impl EigenSet {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn values(&self) -> Vec<Complex<f64>> {
        self.pairs.iter().map(|p| p.value).collect()
    }

    pub fn nearest(&self) -> Option<&EigenPair> {
        self.pairs.iter().find(|p| p.nearest)
    }

    /// The eigenpair with the largest real part.
    pub fn rightmost(&self) -> Option<&EigenPair> {
        self.pairs.first()
    }

    /// Bifurcation indicator: the largest real part in the set.
    pub fn max_real_part(&self) -> Option<f64> {
        self.rightmost().map(|p| p.value.re)
    }
}

#[derive(Debug, Clone)]
pub struct EigenvalueTracker {
    settings: EigenSolverSettings,
}

impl EigenvalueTracker {
    pub fn new(settings: EigenSolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EigenSolverSettings {
        &self.settings
    }

    /// Eigenvalues of the problem's linearization at `(state, params)`.
    pub fn compute<P: SteadyProblem + ?Sized>(
        &self,
        problem: &mut P,
        state: &DVector<f64>,
        params: &ParameterSet,
        with_vectors: bool,
    ) -> Result<EigenSet> {
        let jacobian = problem.jacobian(state, params).map_err(Error::problem)?;
        let mass = problem.mass_matrix(params).map_err(Error::problem)?;
        self.solve(&jacobian, &mass, with_vectors)
    }

    /// Eigenvalues of the pencil (J, M) nearest the configured target.
    pub fn solve(
        &self,
        jacobian: &DMatrix<f64>,
        mass: &DMatrix<f64>,
        with_vectors: bool,
    ) -> Result<EigenSet> {
        self.settings.validate()?;
        let n = jacobian.nrows();
        if n == 0 || jacobian.ncols() != n || mass.shape() != (n, n) {
            return Err(Error::InvalidConfig(format!(
                "eigenvalue problem needs square matrices of equal size, got {:?} and {:?}",
                jacobian.shape(),
                mass.shape()
            )));
        }

        let target = self.settings.target;
        let wanted = self.settings.number_of_eigenvalues.min(n);
        let subspace = self
            .settings
            .subspace_dimension
            .unwrap_or_else(|| (2 * wanted + 1).max(DEFAULT_SUBSPACE))
            .min(n);

        let mass_c = mass.map(|v| C64::new(v, 0.0));
        let (shift, lu) = self.factorize(jacobian, &mass_c)?;

        let mut start = initial_vector(n);
        let mut best_converged = 0;

        for restart in 0..=self.settings.maximum_restarts {
            let krylov = match arnoldi(&lu, &mass_c, &start, subspace) {
                Some(krylov) => krylov,
                None => break,
            };

            let mut ritz = match ritz_pairs(&krylov) {
                Some(ritz) => ritz,
                None => {
                    debug!("Ritz extraction failed on restart {}", restart);
                    start = combine(&krylov.basis, None);
                    continue;
                }
            };

            let largest = ritz.iter().map(|r| r.theta.norm()).fold(0.0, f64::max);
            ritz.retain(|r| r.theta.norm() > 1e-12 * largest.max(f64::MIN_POSITIVE));
            ritz.sort_by(|a, b| b.theta.norm().total_cmp(&a.theta.norm()));
            ritz.truncate(wanted);

            let converged = ritz
                .iter()
                .filter(|r| krylov.breakdown || r.residual <= self.settings.tolerance * r.theta.norm())
                .count();
            best_converged = best_converged.max(converged);

            debug!(
                "Arnoldi pass {}: {} of {} Ritz pairs converged (subspace {})",
                restart,
                converged,
                ritz.len(),
                krylov.basis.len()
            );

            if converged == ritz.len() && !ritz.is_empty() {
                return Ok(assemble(&krylov, &ritz, shift, target, with_vectors));
            }

            let vectors: Vec<DVector<C64>> = ritz.iter().map(|r| r.y.clone()).collect();
            start = combine(&krylov.basis, Some(&vectors));
        }

        Err(Error::EigensolverFailure {
            converged: best_converged,
            requested: wanted,
            restarts: self.settings.maximum_restarts,
            last: None,
        })
    }

    /// LU of J − σM. An exactly singular shift is nudged once.
    fn factorize(
        &self,
        jacobian: &DMatrix<f64>,
        mass: &DMatrix<C64>,
    ) -> Result<(C64, LU<C64, Dyn, Dyn>)> {
        let target = self.settings.target;
        let nudge = self.settings.tolerance.max(1e-10) * (1.0 + target.norm());
        for shift in [target, target + C64::new(nudge, nudge)] {
            let shifted = jacobian.map(|v| C64::new(v, 0.0)) - mass * shift;
            let lu = shifted.lu();
            if lu.is_invertible() {
                return Ok((shift, lu));
            }
            debug!("shift {} is an eigenvalue, nudging", shift);
        }
        Err(Error::EigensolverFailure {
            converged: 0,
            requested: self.settings.number_of_eigenvalues,
            restarts: 0,
            last: None,
        })
    }
}

struct Krylov {
    basis: Vec<DVector<C64>>,
    /// Square Hessenberg block H_m.
    hessenberg: DMatrix<C64>,
    /// |h_{m+1,m}|, the residual scale of every Ritz pair.
    next: f64,
    breakdown: bool,
}

struct RitzPair {
    theta: C64,
    y: DVector<C64>,
    residual: f64,
}

fn initial_vector(n: usize) -> DVector<C64> {
    // Irregular positive entries keep the start vector away from any
    // eigenspace of structured operators.
    let v = DVector::from_fn(n, |i, _| {
        C64::new(1.0 + ((i as f64 + 1.0) * 0.754_877_666_246_692_7).fract(), 0.0)
    });
    let norm = v.norm();
    v.map(|c| c / norm)
}

fn arnoldi(
    lu: &LU<C64, Dyn, Dyn>,
    mass: &DMatrix<C64>,
    start: &DVector<C64>,
    m: usize,
) -> Option<Krylov> {
    let norm = start.norm();
    if !(norm > 0.0 && norm.is_finite()) {
        return None;
    }

    let mut basis = Vec::with_capacity(m + 1);
    basis.push(start.map(|c| c / norm));
    let mut h = DMatrix::<C64>::zeros(m + 1, m);
    let mut size = m;
    let mut breakdown = false;

    for j in 0..m {
        let mut w = lu.solve(&(mass * &basis[j]))?;
        let scale = w.norm();

        // Classical Gram-Schmidt, applied twice.
        for _ in 0..2 {
            for (i, v) in basis.iter().enumerate() {
                let coeff = v.dotc(&w);
                h[(i, j)] += coeff;
                w -= v * coeff;
            }
        }

        let w_norm = w.norm();
        h[(j + 1, j)] = C64::new(w_norm, 0.0);
        if !w_norm.is_finite() {
            return None;
        }
        if w_norm <= BREAKDOWN_TOLERANCE * scale.max(f64::MIN_POSITIVE) {
            size = j + 1;
            breakdown = true;
            break;
        }
        if j + 1 < m {
            basis.push(w.map(|c| c / w_norm));
        }
    }

    let next = if breakdown { 0.0 } else { h[(size, size - 1)].norm() };
    basis.truncate(size);
    Some(Krylov {
        basis,
        hessenberg: h.view((0, 0), (size, size)).into_owned(),
        next,
        breakdown,
    })
}

fn ritz_pairs(krylov: &Krylov) -> Option<Vec<RitzPair>> {
    let h = &krylov.hessenberg;
    let size = h.nrows();
    let schur = Schur::try_new(h.clone(), f64::EPSILON, SCHUR_MAX_ITERATIONS)?;
    let thetas = schur.eigenvalues()?;

    let mut pairs = Vec::with_capacity(size);
    for &theta in thetas.iter() {
        let mut shifted = h.clone();
        for i in 0..size {
            shifted[(i, i)] -= theta;
        }
        let svd = SVD::new(shifted, false, true);
        let v_t = svd.v_t?;
        let (min_idx, _) = svd.singular_values.iter().enumerate().fold(
            (0usize, f64::INFINITY),
            |(idx_min, val_min), (idx, &val)| {
                if val < val_min {
                    (idx, val)
                } else {
                    (idx_min, val_min)
                }
            },
        );
        let mut y: DVector<C64> = v_t.row(min_idx).adjoint();
        let y_norm = y.norm();
        if y_norm == 0.0 || !y_norm.is_finite() {
            return None;
        }
        y /= C64::new(y_norm, 0.0);

        let residual = krylov.next * y[size - 1].norm();
        pairs.push(RitzPair { theta, y, residual });
    }
    Some(pairs)
}

/// Restart vector: the basis combination of the given coefficient vectors,
/// or the plain sum of the basis.
fn combine(basis: &[DVector<C64>], coefficients: Option<&[DVector<C64>]>) -> DVector<C64> {
    let n = basis[0].len();
    let mut out = DVector::<C64>::zeros(n);
    match coefficients {
        Some(coefficients) => {
            for y in coefficients {
                out += lift(basis, y);
            }
        }
        None => {
            for v in basis {
                out += v;
            }
        }
    }
    out
}

fn lift(basis: &[DVector<C64>], y: &DVector<C64>) -> DVector<C64> {
    let mut x = DVector::<C64>::zeros(basis[0].len());
    for (v, &c) in basis.iter().zip(y.iter()) {
        x += v * c;
    }
    x
}

fn normalize_phase(mut x: DVector<C64>) -> DVector<C64> {
    let norm = x.norm();
    if norm > 0.0 {
        x /= C64::new(norm, 0.0);
    }
    let pivot = x
        .iter()
        .copied()
        .max_by(|a, b| a.norm().total_cmp(&b.norm()))
        .unwrap_or(C64::new(1.0, 0.0));
    if pivot.norm() > 0.0 {
        let phase = pivot.conj() / pivot.norm();
        x *= phase;
    }
    x
}

fn assemble(
    krylov: &Krylov,
    ritz: &[RitzPair],
    shift: C64,
    target: C64,
    with_vectors: bool,
) -> EigenSet {
    let mut pairs: Vec<EigenPair> = ritz
        .iter()
        .map(|r| EigenPair {
            value: shift + C64::new(1.0, 0.0) / r.theta,
            nearest: false,
            vector: with_vectors
                .then(|| normalize_phase(lift(&krylov.basis, &r.y)).iter().copied().collect()),
        })
        .collect();

    pairs.sort_by(|a, b| b.value.re.total_cmp(&a.value.re));
    if let Some(idx) = pairs
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.value - target).norm().total_cmp(&(b.value - target).norm()))
        .map(|(idx, _)| idx)
    {
        pairs[idx].nearest = true;
    }

    EigenSet { pairs }
}
