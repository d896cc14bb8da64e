use nalgebra::{DMatrix, DVector};

use super::problem::ContinuationProblem;
use super::util::{bordered_matrix, scaled_dot};
use crate::newton::NewtonSystem;

/// Pseudo-arclength corrector: F(μ, x) = 0 bordered by the arclength
/// equation ⟨t, y − y_pred⟩ = 0 in the scaled inner product.
pub struct PalcSystem<'c, C: ?Sized> {
    pub problem: &'c mut C,
    pub predicted: &'c DVector<f64>,
    pub tangent: &'c DVector<f64>,
    pub zeta: f64,
}

impl<'c, C: ContinuationProblem + ?Sized> NewtonSystem for PalcSystem<'c, C> {
    fn dimension(&self) -> usize {
        self.problem.dimension() + 1
    }

    fn residual(&mut self, y: &DVector<f64>, out: &mut DVector<f64>) -> anyhow::Result<()> {
        let dim = self.problem.dimension();
        let mut f_val = DVector::zeros(dim);
        self.problem.residual(y, &mut f_val)?;
        out.rows_mut(0, dim).copy_from(&f_val);
        out[dim] = scaled_dot(self.tangent, &(y - self.predicted), self.zeta);
        Ok(())
    }

    fn jacobian(&mut self, y: &DVector<f64>) -> anyhow::Result<DMatrix<f64>> {
        let j_ext = self.problem.extended_jacobian(y)?;
        Ok(bordered_matrix(&j_ext, self.tangent, self.zeta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::problem::ParameterBranch;
    use crate::newton::{solve, NewtonSettings};
    use crate::test_problems::Cubic;
    use crate::traits::SteadyProblem;

    #[test]
    fn corrects_onto_branch_through_fold() {
        // Predicted point beside the fold of x³ − x − μ at x = 1/√3.
        let mut cubic = Cubic;
        let base = cubic.parameters();
        let mut branch = ParameterBranch::new(&mut cubic, &base, "mu");
        let fold_x = 1.0 / 3.0_f64.sqrt();
        let fold_mu = fold_x.powi(3) - fold_x;
        let predicted = DVector::from_vec(vec![fold_mu - 0.01, fold_x]);
        let tangent = DVector::from_vec(vec![0.0, 1.0]);

        let mut system = PalcSystem {
            problem: &mut branch,
            predicted: &predicted,
            tangent: &tangent,
            zeta: 1.0,
        };
        let result = solve(&mut system, predicted.clone(), &NewtonSettings::default())
            .expect("bordered system is regular at the fold");

        let (mu, x) = (result.state[0], result.state[1]);
        assert!((x - fold_x).abs() < 1e-12);
        assert!((x.powi(3) - x - mu).abs() < 1e-10);
    }
}
