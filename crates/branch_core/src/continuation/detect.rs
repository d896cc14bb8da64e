//! Bisection of a sign change of the bifurcation indicator along the arc
//! between two accepted points.

use log::debug;
use nalgebra::DVector;

use crate::eigen::EigenSet;
use crate::error::Result;

/// A solved point with a known indicator value.
#[derive(Debug, Clone)]
pub struct Known {
    pub state: DVector<f64>,
    pub param: f64,
    /// Largest real part among the tracked eigenvalues.
    pub indicator: f64,
    pub eigenvalues: EigenSet,
}

impl Known {
    pub fn crosses(&self, other: &Known) -> bool {
        self.indicator * other.indicator < 0.0
    }

    /// Distance to `other` in the scaled arclength norm.
    pub fn distance(&self, other: &Known, zeta: f64) -> f64 {
        let dx = (&self.state - &other.state).norm_squared();
        let dmu = self.param - other.param;
        (zeta * dx + dmu * dmu).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct Localized {
    pub near: Known,
    pub far: Known,
    pub steps: usize,
    /// The bracket shrank to the tolerance.
    pub converged: bool,
}

/// Halves the arc from `near` (fraction 0) to `far` (fraction 1) until the
/// bracketing points are within `tolerance` of each other in the scaled
/// norm.
///
/// `evaluate(fraction)` solves for the branch point at that fraction of the
/// arc. `None` means the point is unusable, which ends the bisection with
/// an unconverged bracket, as does running out of `max_steps`.
pub fn localize<F>(
    near: Known,
    far: Known,
    tolerance: f64,
    zeta: f64,
    max_steps: usize,
    mut evaluate: F,
) -> Result<Localized>
where
    F: FnMut(f64) -> Result<Option<Known>>,
{
    let mut near = near;
    let mut far = far;
    let (mut lo, mut hi) = (0.0, 1.0);
    let mut steps = 0;

    loop {
        if near.distance(&far, zeta) <= tolerance {
            return Ok(Localized {
                near,
                far,
                steps,
                converged: true,
            });
        }
        if steps >= max_steps {
            break;
        }

        let mid = 0.5 * (lo + hi);
        steps += 1;
        let point = match evaluate(mid)? {
            Some(point) => point,
            None => {
                debug!(
                    "Bisection stopped at arc fraction {} with bracket ({}, {})",
                    mid, near.param, far.param
                );
                break;
            }
        };

        if point.indicator == 0.0 || near.crosses(&point) {
            far = point;
            hi = mid;
        } else {
            near = point;
            lo = mid;
        }
    }

    Ok(Localized {
        near,
        far,
        steps,
        converged: false,
    })
}
