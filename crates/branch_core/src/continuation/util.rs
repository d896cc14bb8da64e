//! Tangent computation and augmented-vector helpers.
//!
//! Augmented vectors are laid out as `[μ, x₀, …, xₙ₋₁]`.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Packs `(x, μ)` into an augmented vector `[μ, x...]`.
pub fn to_aug(state: &DVector<f64>, param: f64) -> DVector<f64> {
    let mut aug = DVector::zeros(state.len() + 1);
    aug[0] = param;
    aug.rows_mut(1, state.len()).copy_from(state);
    aug
}

/// Splits an augmented vector into `(x, μ)`.
pub fn split_aug(aug: &DVector<f64>) -> (DVector<f64>, f64) {
    (aug.rows(1, aug.len() - 1).into_owned(), aug[0])
}

/// ⟨a, b⟩ = a_μ·b_μ + ζ·a_x·b_x.
pub fn scaled_dot(a: &DVector<f64>, b: &DVector<f64>, zeta: f64) -> f64 {
    let n = a.len() - 1;
    a[0] * b[0] + zeta * a.rows(1, n).dot(&b.rows(1, n))
}

pub fn scaled_norm(a: &DVector<f64>, zeta: f64) -> f64 {
    scaled_dot(a, a, zeta).sqrt()
}

/// Rescales `v` to unit length in the scaled norm.
pub fn normalize_scaled(v: DVector<f64>, zeta: f64) -> Result<DVector<f64>> {
    let norm = scaled_norm(&v, zeta);
    if !(norm > 0.0 && norm.is_finite()) {
        bail!("Failed to normalize tangent: norm {}", norm);
    }
    Ok(v / norm)
}

/// Extended Jacobian `[∂F/∂μ | ∂F/∂x]`, an n × (n + 1) matrix.
pub fn extended_jacobian(param_derivative: &DVector<f64>, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
    let dim = jacobian.nrows();
    let mut j_ext = DMatrix::zeros(dim, dim + 1);
    j_ext.column_mut(0).copy_from(param_derivative);
    j_ext.view_mut((0, 1), (dim, dim)).copy_from(jacobian);
    j_ext
}

/// Square bordered matrix `[[∂F/∂μ, J], [t_μ, ζ·t_xᵀ]]`.
pub fn bordered_matrix(j_ext: &DMatrix<f64>, tangent: &DVector<f64>, zeta: f64) -> DMatrix<f64> {
    let dim = j_ext.nrows();
    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    a[(dim, 0)] = tangent[0];
    for i in 1..=dim {
        a[(dim, i)] = zeta * tangent[i];
    }
    a
}

/// Tangent at a regular point from `J·dx = −∂F/∂μ·dμ` with `dμ = direction`.
///
/// Falls back to the null vector of the extended Jacobian when J is
/// singular, oriented so that its μ component has the sign of `direction`.
pub fn initial_tangent(j_ext: &DMatrix<f64>, direction: f64, zeta: f64) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    let jacobian = j_ext.view((0, 1), (dim, dim)).into_owned();
    let rhs = j_ext.column(0) * (-direction);

    if let Some(dx) = jacobian.lu().solve(&rhs) {
        if dx.iter().all(|v| v.is_finite()) {
            let mut tangent = DVector::zeros(dim + 1);
            tangent[0] = direction;
            tangent.rows_mut(1, dim).copy_from(&dx);
            return normalize_scaled(tangent, zeta);
        }
    }

    let mut tangent = compute_nullspace_tangent(j_ext)?;
    if tangent[0] * direction < 0.0 {
        tangent = -tangent;
    }
    normalize_scaled(tangent, zeta)
}

/// Next tangent from the bordered system `[[F_μ, J], [t_μ, ζ·t_xᵀ]]·t = e`,
/// which keeps the orientation of `prev`.
pub fn bordered_tangent(
    j_ext: &DMatrix<f64>,
    prev: &DVector<f64>,
    zeta: f64,
) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    let a = bordered_matrix(j_ext, prev, zeta);
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    if let Some(tangent) = a.lu().solve(&rhs) {
        if tangent.iter().all(|v| v.is_finite()) {
            return normalize_scaled(tangent, zeta);
        }
    }
    oriented_nullspace_tangent(j_ext, prev, zeta)
}

/// Null vector of the extended Jacobian, oriented along `prev`.
pub fn oriented_nullspace_tangent(
    j_ext: &DMatrix<f64>,
    prev: &DVector<f64>,
    zeta: f64,
) -> Result<DVector<f64>> {
    let mut tangent = compute_nullspace_tangent(j_ext)?;
    if scaled_dot(&tangent, prev, zeta) < 0.0 {
        tangent = -tangent;
    }
    normalize_scaled(tangent, zeta)
}

/// Computes the null space tangent from an extended Jacobian matrix.
///
/// Uses the Gram matrix eigendecomposition first, falling back to a
/// bordered linear solve if that fails.
pub fn compute_nullspace_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    if dim == 0 {
        bail!("Failed to compute tangent: zero-dimensional system");
    }
    if j_ext.ncols() != dim + 1 {
        bail!(
            "Failed to compute tangent: expected {} columns, got {}",
            dim + 1,
            j_ext.ncols()
        );
    }
    if let Some(vec) = try_gram_eigen(j_ext) {
        return Ok(vec);
    }
    compute_tangent_linear_solve(j_ext)
}

fn try_gram_eigen(j_ext: &DMatrix<f64>) -> Option<DVector<f64>> {
    let gram = j_ext.transpose() * j_ext;
    if gram.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let identity = DMatrix::identity(gram.nrows(), gram.ncols());
    let mut epsilon = 0.0;

    for _ in 0..5 {
        let adjusted = if epsilon == 0.0 {
            gram.clone()
        } else {
            &gram + identity.scale(epsilon)
        };

        let eig = SymmetricEigen::new(adjusted);
        if eig.eigenvalues.is_empty() {
            return None;
        }

        let mut min_idx = 0;
        let mut min_val = eig.eigenvalues[0];
        for (i, &val) in eig.eigenvalues.iter().enumerate().skip(1) {
            if val.is_finite() && val < min_val {
                min_val = val;
                min_idx = i;
            }
        }

        if !min_val.is_finite() {
            epsilon = if epsilon == 0.0 { 1e-12 } else { epsilon * 10.0 };
            continue;
        }

        let vec = eig.eigenvectors.column(min_idx).into_owned();
        if vec.norm_squared() == 0.0 || vec.iter().any(|v| !v.is_finite()) {
            return None;
        }
        return Some(vec);
    }

    None
}

fn compute_tangent_linear_solve(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    for col in 0..=dim {
        a.row_mut(dim).fill(0.0);
        a[(dim, col)] = 1.0;

        if let Some(solution) = a.clone().lu().solve(&rhs) {
            if solution.iter().all(|v| v.is_finite()) && solution.norm_squared() != 0.0 {
                return Ok(solution);
            }
        }
    }

    bail!("Failed to compute tangent: all bordered solves singular")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aug_places_param_first() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let aug = to_aug(&x, 3.0);
        assert_eq!(aug.as_slice(), &[3.0, 1.0, 2.0]);
        let (state, param) = split_aug(&aug);
        assert_eq!(state, x);
        assert_eq!(param, 3.0);
    }

    #[test]
    fn scaled_norm_weights_state_part() {
        let v = DVector::from_vec(vec![3.0, 4.0, 4.0]);
        assert!((scaled_norm(&v, 0.5) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn nullspace_tangent_is_a_null_vector() {
        let mat = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let tangent = compute_nullspace_tangent(&mat).expect("tangent should compute");
        assert!(tangent.norm() > 0.0);
        assert!((&mat * &tangent).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn nullspace_tangent_rejects_invalid_shape() {
        let j_ext = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let message = format!("{}", compute_nullspace_tangent(&j_ext).expect_err("shape"));
        assert!(message.contains("expected 3 columns"));
    }

    #[test]
    fn linear_solve_fallback_reports_singular_systems() {
        let j_ext = DMatrix::<f64>::zeros(1, 2);
        let message = format!("{}", compute_tangent_linear_solve(&j_ext).expect_err("singular"));
        assert!(message.contains("all bordered solves"));
    }

    #[test]
    fn initial_tangent_follows_requested_direction() {
        // F = x − 2μ, so dx/dμ = 2.
        let j_ext = DMatrix::from_row_slice(1, 2, &[-2.0, 1.0]);
        let forward = initial_tangent(&j_ext, 1.0, 1.0).expect("regular point");
        assert!(forward[0] > 0.0);
        assert!((forward[1] / forward[0] - 2.0).abs() < 1e-12);
        assert!((scaled_norm(&forward, 1.0) - 1.0).abs() < 1e-12);

        let backward = initial_tangent(&j_ext, -1.0, 1.0).expect("regular point");
        assert!(backward[0] < 0.0);
    }

    #[test]
    fn initial_tangent_at_fold_uses_null_vector() {
        // At a fold J = 0 and the branch is vertical in μ.
        let j_ext = DMatrix::from_row_slice(1, 2, &[-1.0, 0.0]);
        let tangent = initial_tangent(&j_ext, 1.0, 1.0).expect("null vector");
        assert!(tangent[0].abs() < 1e-12);
        assert!((tangent[1].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bordered_tangent_keeps_orientation() {
        let j_ext = DMatrix::from_row_slice(1, 2, &[-1.0, 1.0]);
        let prev = normalize_scaled(DVector::from_vec(vec![-1.0, -0.9]), 1.0).expect("nonzero");
        let tangent = bordered_tangent(&j_ext, &prev, 1.0).expect("regular");
        assert!(scaled_dot(&tangent, &prev, 1.0) > 0.0);
        assert!((&j_ext * &tangent)[0].abs() < 1e-12);
    }
}
