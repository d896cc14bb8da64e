use anyhow::{bail, Result};
use branch_core::{ParameterSet, SteadyProblem};
use nalgebra::{DMatrix, DVector};

use super::parameter;

/// One-dimensional Brusselator reaction–diffusion system
///
/// ```text
/// u_t = Du·u_xx + A − (B + 1)·u + u²·v
/// v_t = Dv·v_xx + B·u − u²·v
/// ```
///
/// on (0, Length) with Dirichlet values fixed at the homogeneous steady
/// state u = A, v = B/A. Nodes are interleaved as `[u₀, v₀, u₁, v₁, …]`.
///
/// The homogeneous state loses stability to the first Fourier mode in a
/// Hopf bifurcation at B = 1 + A² + (Du + Dv)·κ₁, where
/// κⱼ = (4/h²)·sin²(jπ/(2(N + 1))) and h = Length/(N + 1).
#[derive(Debug, Clone)]
pub struct Brusselator {
    nodes: usize,
}

struct Coefficients {
    a: f64,
    b: f64,
    du: f64,
    dv: f64,
    length: f64,
}

impl Coefficients {
    fn read(params: &ParameterSet) -> Result<Self> {
        Ok(Self {
            a: parameter(params, "A")?,
            b: parameter(params, "B")?,
            du: parameter(params, "Du")?,
            dv: parameter(params, "Dv")?,
            length: parameter(params, "Length")?,
        })
    }
}

impl Brusselator {
    pub fn new(nodes: usize) -> Self {
        Self { nodes }
    }

    /// Uniform state u = A, v = B/A.
    pub fn homogeneous_state(&self, params: &ParameterSet) -> Result<DVector<f64>> {
        let c = Coefficients::read(params)?;
        Ok(DVector::from_fn(2 * self.nodes, |k, _| {
            if k % 2 == 0 {
                c.a
            } else {
                c.b / c.a
            }
        }))
    }

    /// Critical B of the first Hopf bifurcation of the homogeneous state.
    pub fn hopf_threshold(&self, params: &ParameterSet) -> Result<f64> {
        let c = Coefficients::read(params)?;
        let n1 = (self.nodes + 1) as f64;
        let h = c.length / n1;
        let kappa = 4.0 / (h * h) * (std::f64::consts::PI / (2.0 * n1)).sin().powi(2);
        Ok(1.0 + c.a * c.a + (c.du + c.dv) * kappa)
    }

    fn inverse_h2(&self, length: f64) -> f64 {
        let n1 = (self.nodes + 1) as f64;
        n1 * n1 / (length * length)
    }

    /// Number of Dirichlet neighbours of node `i`.
    fn boundary_neighbours(&self, i: usize) -> f64 {
        let mut count = 0.0;
        if i == 0 {
            count += 1.0;
        }
        if i + 1 == self.nodes {
            count += 1.0;
        }
        count
    }

    /// Discrete Laplacians of u and v at node `i`, boundary values included.
    fn laplacians(&self, state: &DVector<f64>, c: &Coefficients, i: usize) -> (f64, f64) {
        let n = self.nodes;
        let scale = self.inverse_h2(c.length);
        let (u, v) = (state[2 * i], state[2 * i + 1]);
        let (ul, vl) = if i > 0 {
            (state[2 * i - 2], state[2 * i - 1])
        } else {
            (c.a, c.b / c.a)
        };
        let (ur, vr) = if i + 1 < n {
            (state[2 * i + 2], state[2 * i + 3])
        } else {
            (c.a, c.b / c.a)
        };
        (
            (ul - 2.0 * u + ur) * scale,
            (vl - 2.0 * v + vr) * scale,
        )
    }
}

impl SteadyProblem for Brusselator {
    fn dimension(&self) -> usize {
        2 * self.nodes
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new()
            .declare("A", 2.0)
            .declare("B", 4.0)
            .declare("Du", 0.01)
            .declare("Dv", 0.01)
            .declare("Length", 1.0)
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let c = Coefficients::read(params)?;
        for i in 0..self.nodes {
            let (u, v) = (state[2 * i], state[2 * i + 1]);
            let (lap_u, lap_v) = self.laplacians(state, &c, i);
            let uuv = u * u * v;
            out[2 * i] = c.du * lap_u + c.a - (c.b + 1.0) * u + uuv;
            out[2 * i + 1] = c.dv * lap_v + c.b * u - uuv;
        }
        Ok(())
    }

    fn jacobian(&mut self, state: &DVector<f64>, params: &ParameterSet) -> Result<DMatrix<f64>> {
        let c = Coefficients::read(params)?;
        let scale = self.inverse_h2(c.length);
        let dim = self.dimension();
        let mut jac = DMatrix::zeros(dim, dim);
        for i in 0..self.nodes {
            let (iu, iv) = (2 * i, 2 * i + 1);
            let (u, v) = (state[iu], state[iv]);

            jac[(iu, iu)] = -2.0 * c.du * scale - (c.b + 1.0) + 2.0 * u * v;
            jac[(iu, iv)] = u * u;
            jac[(iv, iu)] = c.b - 2.0 * u * v;
            jac[(iv, iv)] = -2.0 * c.dv * scale - u * u;

            if i > 0 {
                jac[(iu, iu - 2)] = c.du * scale;
                jac[(iv, iv - 2)] = c.dv * scale;
            }
            if i + 1 < self.nodes {
                jac[(iu, iu + 2)] = c.du * scale;
                jac[(iv, iv + 2)] = c.dv * scale;
            }
        }
        Ok(jac)
    }

    fn parameter_derivative(
        &mut self,
        state: &DVector<f64>,
        params: &ParameterSet,
        name: &str,
    ) -> Result<DVector<f64>> {
        let c = Coefficients::read(params)?;
        let scale = self.inverse_h2(c.length);
        let mut out = DVector::zeros(self.dimension());
        for i in 0..self.nodes {
            let (iu, iv) = (2 * i, 2 * i + 1);
            let u = state[iu];
            let edges = self.boundary_neighbours(i);
            match name {
                "A" => {
                    out[iu] = c.du * scale * edges + 1.0;
                    out[iv] = -c.dv * scale * edges * c.b / (c.a * c.a);
                }
                "B" => {
                    out[iu] = -u;
                    out[iv] = u + c.dv * scale * edges / c.a;
                }
                "Du" => out[iu] = self.laplacians(state, &c, i).0,
                "Dv" => out[iv] = self.laplacians(state, &c, i).1,
                "Length" => {
                    let (lap_u, lap_v) = self.laplacians(state, &c, i);
                    out[iu] = -2.0 * c.du * lap_u / c.length;
                    out[iv] = -2.0 * c.dv * lap_v / c.length;
                }
                _ => bail!("Unknown parameter: {}", name),
            }
        }
        Ok(out)
    }
}
