//! Derivative-free downhill simplex in internal space.
//!
//! This implementation of Nelder-Mead follows
//!
//! Gao, F and Han, L. Implementing the Nelder-Mead simplex algorithm with
//! adaptive parameters. 2012. Computational Optimization and Applications.
//! 51:1, pp 259--277
//!
//! for the optional dimension-dependent coefficients. The initial simplex
//! spans one user step along every free parameter, and the run stops when
//! the spread of function values over the vertices falls below the same EDM
//! goal MIGRAD uses. No error matrix is produced; run HESSE afterwards.
//!
//! # Use case
//!
//! The simplex does not need a gradient, so it copes with objectives that
//! are noisy or have kinks, and it serves as a fallback when MIGRAD fails.
//! It typically needs many more function calls than MIGRAD.

use crate::fcn::WrappedFcn;
use crate::gradient::initial_gradient;
use crate::minimum::{edm_goal, FunctionMinimum, Minimizer};
use crate::state::{MinimumError, MinimumParameters, MinimumState};
use ndarray::prelude::*;

type Vertices = Vec<(f64, Array1<f64>)>;

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
/// A minimizer using the Nelder-Mead algorithm.
pub struct Simplex {
    /// Convergence tolerance, used like the MIGRAD tolerance.
    #[builder(default = "0.1")]
    pub tolerance: f64,

    /// Adapt the coefficients to the dimensionality of the problem. Useful for
    /// high-dimensional minimization. Overrides the four coefficients below.
    #[builder(default = "false")]
    pub adaptive: bool,

    /// Reflection coefficient.
    #[builder(default = "1.0")]
    pub reflection: f64,

    /// Expansion coefficient.
    #[builder(default = "2.0")]
    pub expansion: f64,

    /// Contraction coefficient.
    #[builder(default = "0.5")]
    pub contraction: f64,

    /// Shrink coefficient.
    #[builder(default = "0.5")]
    pub shrink: f64,
}

impl SimplexBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.tolerance {
            if !(t.is_finite() && t >= 0.0) {
                return Err(format!("tolerance must be non-negative, got {}", t));
            }
        }
        if let Some(e) = self.expansion {
            if e <= 1.0 {
                return Err(format!("expansion must exceed 1, got {}", e));
            }
        }
        for (name, c) in [("contraction", self.contraction), ("shrink", self.shrink)].iter() {
            if let Some(c) = c {
                if !(*c > 0.0 && *c < 1.0) {
                    return Err(format!("{} must lie in (0, 1), got {}", name, c));
                }
            }
        }
        Ok(())
    }
}

impl Default for Simplex {
    fn default() -> Self {
        Simplex {
            tolerance: 0.1,
            adaptive: false,
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
        }
    }
}

impl Minimizer for Simplex {
    fn minimize(&self, fcn: &WrappedFcn, max_fcn: usize) -> FunctionMinimum {
        let trafo = fcn.trafo();
        let n = trafo.n_internal();
        let edmval = edm_goal(self.tolerance, fcn.errordef(), trafo.precision());
        log::info!("simplex: {} free parameters, call limit {}", n, max_fcn);

        let eval = |x: &Array1<f64>| {
            let f = fcn.call(x.view());
            if f.is_finite() {
                f
            } else {
                f64::INFINITY
            }
        };

        let x0 = trafo.initial_internal();
        let f0 = fcn.call(x0.view());
        let start = MinimumParameters::new(x0.clone(), f0);
        let g0 = initial_gradient(fcn, &start);

        let mut simplex: Vertices = vec![(f0, x0.clone())];
        if f0.is_finite() {
            let steps = g0.gstep() * 10.0;
            for i in 0..n {
                let mut x = x0.clone();
                x[i] += steps[i];
                simplex.push((eval(&x), x));
            }
        }
        self.order_simplex(&mut simplex);
        let seed = MinimumState::new(
            start,
            MinimumError::not_computed(n),
            g0,
            spread(&simplex),
            fcn.num_calls(),
        );
        if !f0.is_finite() || n == 0 {
            let mut fm = FunctionMinimum::new(trafo.clone(), seed, vec![], fcn.errordef(), edmval);
            fm.set_aborted(!f0.is_finite());
            return fm;
        }

        let (alpha, beta, gamma, delta) = self.coefficients(n);
        let mut centroid = self.centroid(&simplex);
        let m = simplex.len();
        let mut iterations = 0;

        while spread(&simplex) >= edmval && fcn.num_calls() < max_fcn && !fcn.is_stopped() {
            let f_worst = simplex[m - 1].0;
            let f_second = simplex[m - 2].0;
            let f_best = simplex[0].0;

            let reflected = &centroid + &(alpha * &(&centroid - &simplex[m - 1].1));
            let f_reflected = eval(&reflected);

            if f_reflected < f_second && f_reflected >= f_best {
                self.lean_update(&mut simplex, &mut centroid, reflected, f_reflected);
            } else if f_reflected < f_best {
                // try expanding beyond the reflected point
                let expanded = &centroid + &(beta * &(&reflected - &centroid));
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    self.lean_update(&mut simplex, &mut centroid, expanded, f_expanded);
                } else {
                    self.lean_update(&mut simplex, &mut centroid, reflected, f_reflected);
                }
            } else if f_reflected < f_worst {
                // contraction outwards
                let contracted = &centroid + &(gamma * &(&centroid - &simplex[m - 1].1));
                let f_contracted = eval(&contracted);
                if f_contracted <= f_reflected {
                    self.lean_update(&mut simplex, &mut centroid, contracted, f_contracted);
                } else {
                    self.shrink(&mut simplex, &eval, delta, &mut centroid);
                }
            } else {
                // contraction inwards
                let contracted = &centroid - &(gamma * &(&centroid - &simplex[m - 1].1));
                let f_contracted = eval(&contracted);
                if f_contracted < f_worst {
                    self.lean_update(&mut simplex, &mut centroid, contracted, f_contracted);
                } else {
                    self.shrink(&mut simplex, &eval, delta, &mut centroid);
                }
            }
            iterations += 1;
            log::trace!(
                "simplex iteration {}: best {}, spread {:e}",
                iterations,
                simplex[0].0,
                spread(&simplex)
            );
        }

        if !fcn.is_stopped() {
            // the centre of gravity is often better than the best vertex
            let pbar = simplex
                .iter()
                .fold(Array1::zeros(n), |acc: Array1<f64>, (_, x)| acc + x)
                / m as f64;
            let fbar = eval(&pbar);
            if fbar < simplex[0].0 {
                simplex[0] = (fbar, pbar);
            }
        }

        let edm = spread(&simplex);
        let (fbest, xbest) = simplex.swap_remove(0);
        let params = MinimumParameters::new(xbest, fbest);
        let gradient = initial_gradient(fcn, &params);
        let state = MinimumState::new(
            params,
            MinimumError::not_computed(n),
            gradient,
            edm,
            fcn.num_calls(),
        );

        let mut fm = FunctionMinimum::new(trafo.clone(), seed, vec![state], fcn.errordef(), edmval);
        fm.set_ngrad(fcn.num_grad_calls());
        if fcn.is_stopped() {
            fm.set_aborted(true);
        } else if edm >= edmval {
            if fcn.num_calls() >= max_fcn {
                log::warn!("simplex: call limit {} reached", max_fcn);
                fm.set_reached_call_limit(true);
            } else {
                fm.set_above_max_edm(true);
            }
        }
        log::info!(
            "simplex: fval = {}, spread = {:e}, {} calls after {} iterations",
            fm.fval(),
            edm,
            fm.nfcn(),
            iterations
        );
        fm
    }
}

impl Simplex {
    /// Reflection, expansion, contraction and shrink coefficients for `n`
    /// free parameters.
    #[inline]
    fn coefficients(&self, n: usize) -> (f64, f64, f64, f64) {
        if self.adaptive && n > 1 {
            let dim = n as f64;
            (1.0, 1.0 + 2.0 / dim, 0.75 - 1.0 / (2.0 * dim), 1.0 - 1.0 / dim)
        } else {
            (self.reflection, self.expansion, self.contraction, self.shrink)
        }
    }

    /// Update the centroid efficiently, knowing only one value changed.
    /// Re-sorting a sorted vec with a single out-of-place value is cheap.
    /// This update is O(n).
    #[inline]
    fn lean_update(&self, simplex: &mut Vertices, centroid: &mut Array1<f64>, xnew: Array1<f64>, fnew: f64) {
        let n = simplex.len();
        *centroid += &(&xnew / (n - 1) as f64);
        simplex[n - 1] = (fnew, xnew);
        self.order_simplex(simplex);
        *centroid -= &(&simplex[n - 1].1 / (n - 1) as f64);
    }

    /// Shrink all points towards the best point.
    /// Assumes the simplex is ordered.
    /// The centroid is shrunk directly, then the new worst point is swapped
    /// for the old one. Shrinkage requires n function evaluations.
    #[inline]
    fn shrink<E>(&self, simplex: &mut Vertices, eval: &E, sigma: f64, centroid: &mut Array1<f64>)
    where
        E: Fn(&Array1<f64>) -> f64,
    {
        let best = simplex[0].1.clone();
        for (fi, xi) in simplex.iter_mut().skip(1) {
            *xi *= sigma;
            *xi += &((1.0 - sigma) * &best);
            *fi = eval(&*xi);
        }
        let n = simplex.len();
        let old_worst = simplex[n - 1].1.to_owned();
        *centroid *= sigma;
        *centroid += &((1.0 - sigma) * &best);
        self.order_simplex(simplex);
        *centroid += &((&old_worst - &simplex[n - 1].1) / (n - 1) as f64);
    }

    /// Centroid of all points but the worst one.
    /// Assumes that the simplex is ordered. This calculation is O(n^2).
    #[inline]
    fn centroid(&self, simplex: &Vertices) -> Array1<f64> {
        let n = simplex.len();
        let mut centroid = Array1::zeros(simplex[0].1.len());
        for (_, xi) in simplex.iter().take(n - 1) {
            centroid += xi;
        }
        centroid / (n - 1) as f64
    }

    #[inline]
    fn order_simplex(&self, simplex: &mut Vertices) {
        simplex.sort_by(|(fa, _), (fb, _)| fa.total_cmp(fb));
    }
}

/// Difference between the worst and the best vertex.
fn spread(simplex: &Vertices) -> f64 {
    let worst = simplex[simplex.len() - 1].0;
    let best = simplex[0].0;
    if worst == best {
        0.0
    } else {
        worst - best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSet;
    use crate::precision::MachinePrecision;
    use crate::transform::Transformation;
    use float_cmp::approx_eq;

    fn setup(values: &[f64], steps: &[f64]) -> Transformation {
        let names: Vec<String> = (0..values.len()).map(|i| format!("x{}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let set = ParameterSet::from_values(&names, values, steps).unwrap();
        Transformation::new(&set, MachinePrecision::computed())
    }

    #[test]
    fn simplex() {
        let t = setup(&[3.0, -8.3], &[0.5, 0.5]);
        let function =
            |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let minimizer = SimplexBuilder::default().tolerance(1e-5).build().unwrap();
        let res = minimizer.minimize(&fcn, 10000);
        assert!(res.is_valid());
        assert!(!res.has_covariance());
        let x = res.user_values();
        assert!(approx_eq!(f64, x[0], 1.0, epsilon = 1e-2));
        assert!(approx_eq!(f64, x[1], 1.0, epsilon = 2e-2));
    }

    #[test]
    fn adaptive_in_higher_dimension() {
        let n = 6;
        let t = setup(&vec![1.0; n], &vec![0.3; n]);
        let function = |x: ArrayView1<f64>| {
            x.iter()
                .enumerate()
                .map(|(i, xi)| (i + 1) as f64 * (xi - 0.5 * i as f64).powi(2))
                .sum::<f64>()
        };
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let minimizer = SimplexBuilder::default().adaptive(true).build().unwrap();
        let res = minimizer.minimize(&fcn, 20000);
        assert!(res.is_valid());
        assert!(res.fval() < 1e-3);
    }

    #[test]
    fn nan_vertices_are_worst() {
        let t = setup(&[2.0], &[3.0]);
        let function = |x: ArrayView1<f64>| if x[0] > 0.0 { x[0] - x[0].ln() } else { f64::NAN };
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let res = Simplex::default().minimize(&fcn, 1000);
        assert!(res.is_valid());
        assert!(approx_eq!(f64, res.user_values()[0], 1.0, epsilon = 0.05));
    }

    #[test]
    fn call_limit() {
        let t = setup(&[3.0, -8.3], &[0.5, 0.5]);
        let function =
            |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let res = Simplex::default().minimize(&fcn, 20);
        assert!(res.has_reached_call_limit());
        assert!(!res.is_valid());
        assert!(res.fval() < function(arr1(&[3.0, -8.3]).view()));
    }

    #[test]
    fn rejects_bad_coefficients() {
        assert!(SimplexBuilder::default().shrink(1.5).build().is_err());
        assert!(SimplexBuilder::default().expansion(0.5).build().is_err());
    }
}
