//! Variable-metric minimizer with an estimated distance to minimum (EDM)
//! stopping rule.
//!
//! Each iteration steps along `-V g`, where `V` approximates the inverse
//! Hessian, searches the step length with the parabolic line search and
//! improves `V` by a rank-two Davidon update built from the realized step
//! and the change of the gradient:
//!
//! ```text
//! V' = V + dx dxᵀ / (dx·dg) - (V dg)(V dg)ᵀ / (dgᵀ V dg)  [+ BFGS term]
//! ```
//!
//! The run stops when `edm = gᵀ V g / 2` (inflated while `V` is still
//! changing) drops below the goal derived from the tolerance and `errordef`,
//! or when the call limit is reached. A line search whose best point misses
//! the sufficient decrease condition also ends the iteration.
//!
//! # Examples
//!
//! ```
//! # extern crate ndarray;
//! # extern crate minuit;
//! # use ndarray::prelude::*;
//! # use minuit::{ParameterSet, Transformation, MachinePrecision, WrappedFcn};
//! # use minuit::vector::MigradBuilder;
//! # use minuit::Minimizer;
//!
//! let function =
//!     |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
//! let params = ParameterSet::from_values(&["x", "y"], &[-1.2, 1.0], &[0.1, 0.1]).unwrap();
//! let trafo = Transformation::new(&params, MachinePrecision::default());
//! let fcn = WrappedFcn::new(&function, &trafo, 1.0);
//! let migrad = MigradBuilder::default().tolerance(1e-4).build().unwrap();
//! let minimum = migrad.minimize(&fcn, 2000);
//! assert!(minimum.is_valid());
//! println!("res: {}", minimum.user_values());
//! ```

use super::line_search::LineSearch;
use super::seed::{diagonal_inverse, seed_state};
use crate::fcn::WrappedFcn;
use crate::gradient::{calculator_for, GradientCalculator};
use crate::hesse::Hesse;
use crate::linalg::{make_pos_def, outer};
use crate::minimum::{edm_acceptable, edm_goal, FunctionMinimum, Minimizer};
use crate::state::{estimate_edm, ErrorStatus, FunctionGradient, MinimumError, MinimumParameters, MinimumState};
use crate::strategy::Strategy;
use ndarray::prelude::*;

/// How often MIGRAD goes back to iterating after a HESSE check found the
/// EDM too large.
const MAX_HESSE_PASSES: usize = 2;

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
/// The MIGRAD variable-metric minimizer.
pub struct Migrad {
    /// Derivative settings, and through `strategy.level` the final HESSE check.
    #[builder(default = "Strategy::default()")]
    pub strategy: Strategy,

    /// Convergence tolerance. Iteration stops at `edm < 0.002 · tolerance · errordef`.
    #[builder(default = "0.1")]
    pub tolerance: f64,

    /// Consecutive iterations that may fail on non-finite values before the
    /// run is aborted.
    #[builder(default = "3")]
    pub max_nonfinite_retries: usize,

    /// Line search settings.
    #[builder(default = "LineSearch::default()")]
    pub line_search: LineSearch,
}

impl MigradBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.tolerance {
            Some(t) if !(t.is_finite() && t >= 0.0) => {
                Err(format!("tolerance must be non-negative, got {}", t))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Migrad {
    fn default() -> Self {
        Migrad {
            strategy: Strategy::default(),
            tolerance: 0.1,
            max_nonfinite_retries: 3,
            line_search: LineSearch::default(),
        }
    }
}

/// Why an iteration sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Converged,
    NoImprovement,
    CallLimit,
    Aborted,
}

impl Minimizer for Migrad {
    fn minimize(&self, fcn: &WrappedFcn, max_fcn: usize) -> FunctionMinimum {
        let trafo = fcn.trafo();
        let n = trafo.n_internal();
        let edmval = edm_goal(self.tolerance, fcn.errordef(), trafo.precision());
        log::info!(
            "migrad: {} free parameters, edm goal {:e}, call limit {}",
            n,
            edmval,
            max_fcn
        );

        let gc = calculator_for(fcn, self.strategy);
        let seed = seed_state(fcn, gc.as_ref(), &self.line_search);
        log::debug!("migrad seed: fval = {}, edm = {}", seed.fval(), seed.edm());

        let mut states = Vec::new();
        let mut term = if !seed.is_valid() || fcn.is_stopped() {
            log::warn!("migrad: objective or gradient not finite at the start point");
            Termination::Aborted
        } else if n == 0 {
            Termination::Converged
        } else if fcn.num_calls() >= max_fcn {
            Termination::CallLimit
        } else {
            self.run(fcn, gc.as_ref(), &seed, edmval, max_fcn, &mut states)
        };
        if fcn.is_stopped() {
            term = Termination::Aborted;
        }

        let mut fm = FunctionMinimum::new(trafo.clone(), seed, states, fcn.errordef(), edmval);
        fm.set_ngrad(fcn.num_grad_calls());
        match term {
            Termination::Aborted => fm.set_aborted(true),
            _ if fcn.num_calls() >= max_fcn => {
                log::warn!("migrad: call limit {} reached", max_fcn);
                fm.set_reached_call_limit(true);
            }
            _ => {
                let st = fm.state();
                if st.edm() > edmval {
                    if edm_acceptable(st.edm(), st.fval(), edmval, trafo.precision()) {
                        log::info!("migrad: edm {:e} above goal but accepted", st.edm());
                    } else {
                        log::warn!("migrad: edm {:e} above maximum", st.edm());
                        fm.set_above_max_edm(true);
                    }
                }
            }
        }
        log::info!(
            "migrad: fval = {}, edm = {:e}, {} calls, valid = {}",
            fm.fval(),
            fm.edm(),
            fm.nfcn(),
            fm.is_valid()
        );
        fm
    }
}

impl Migrad {
    /// Iterates from `seed`, re-checking the error matrix with HESSE as the
    /// strategy demands.
    fn run(
        &self,
        fcn: &WrappedFcn,
        gc: &dyn GradientCalculator,
        seed: &MinimumState,
        edmval: f64,
        max_fcn: usize,
        states: &mut Vec<MinimumState>,
    ) -> Termination {
        let mut start = seed.clone();
        let mut pass = 0;
        loop {
            let term = self.iterate(fcn, gc, start, edmval, max_fcn, states);
            if term == Termination::CallLimit || term == Termination::Aborted {
                return term;
            }
            let last = match states.last() {
                Some(s) => s.clone(),
                None => seed.clone(),
            };
            if pass > 0 && !last.is_valid() {
                return term;
            }
            let mut edm = last.edm();
            let check = match self.strategy.level {
                0 => false,
                1 => last.error().dcovar() > 0.05,
                _ => true,
            };
            if check {
                log::debug!("migrad: checking error matrix with hesse");
                let st = Hesse {
                    strategy: self.strategy,
                }
                .compute(fcn, &last, max_fcn);
                edm = st.edm();
                let status = st.error().status();
                states.push(st);
                if status == ErrorStatus::ReachedCallLimit {
                    return Termination::CallLimit;
                }
                if edm > edmval {
                    log::info!("migrad: edm {:e} after hesse, continuing", edm);
                }
            }
            pass += 1;
            if edm <= edmval || fcn.num_calls() >= max_fcn || pass > MAX_HESSE_PASSES {
                return term;
            }
            start = match states.last() {
                Some(s) => s.clone(),
                None => return term,
            };
        }
    }

    /// The variable-metric iteration proper.
    fn iterate(
        &self,
        fcn: &WrappedFcn,
        gc: &dyn GradientCalculator,
        start: MinimumState,
        edmval: f64,
        max_fcn: usize,
        states: &mut Vec<MinimumState>,
    ) -> Termination {
        let prec = fcn.trafo().precision();
        let mut s0 = start;
        let mut retries = 0;

        loop {
            if fcn.is_stopped() {
                return Termination::Aborted;
            }
            let g = s0.gradient().grad().clone();
            let mut step = -s0.error().inv_hessian().dot(&g);
            let mut gdel = step.dot(&g);

            if gdel > 0.0 {
                log::warn!("migrad: matrix not positive definite, forcing it");
                let pd = make_pos_def(s0.error().inv_hessian().view(), prec);
                step = -pd.matrix.dot(&g);
                gdel = step.dot(&g);
                let mut error =
                    MinimumError::with_status(pd.matrix, s0.error().dcovar(), ErrorStatus::MadePosDef);
                if gdel > 0.0 {
                    log::warn!("migrad: still no descent direction, resetting matrix");
                    error = MinimumError::new(diagonal_inverse(fcn, s0.gradient()), 1.0);
                    step = -error.inv_hessian().dot(&g);
                    gdel = step.dot(&g);
                }
                let e = estimate_edm(s0.gradient(), &error);
                s0 = s0.with_error(error, e, fcn.num_calls());
            }

            let ls = self.line_search.search(fcn, s0.parameters(), step.view(), gdel);
            if fcn.is_stopped() {
                return Termination::Aborted;
            }
            if !ls.found_finite {
                retries += 1;
                if retries > self.max_nonfinite_retries {
                    log::warn!("migrad: no finite point along the search direction, giving up");
                    return Termination::Aborted;
                }
                log::debug!("migrad: non-finite objective along the step, shortening");
                s0 = self.shortened(fcn, &s0);
                continue;
            }
            if (ls.fval - s0.fval()).abs() <= s0.fval().abs() * prec.eps() {
                log::warn!("migrad: no improvement in line search");
                self.record(states, &s0, fcn.num_calls());
                return Termination::NoImprovement;
            }
            if !ls.sufficient_decrease {
                log::warn!(
                    "migrad: insufficient decrease, f = {} at step {} from {}",
                    ls.fval,
                    ls.step,
                    s0.fval()
                );
                self.record(states, &s0, fcn.num_calls());
                return Termination::NoImprovement;
            }

            let dx = &step * ls.step;
            let p = MinimumParameters::new(s0.vec() + &dx, ls.fval);
            let g1 = gc.gradient(fcn, &p, s0.gradient());
            if !g1.is_valid() {
                retries += 1;
                if fcn.is_stopped() || retries > self.max_nonfinite_retries {
                    log::warn!("migrad: gradient not finite, giving up");
                    return Termination::Aborted;
                }
                s0 = self.shortened(fcn, &s0);
                continue;
            }
            retries = 0;

            let mut error = s0.error().clone();
            if estimate_edm(&g1, &error) < 0.0 {
                log::warn!("migrad: negative edm, forcing matrix positive definite");
                let pd = make_pos_def(error.inv_hessian().view(), prec);
                error = MinimumError::with_status(pd.matrix, error.dcovar(), ErrorStatus::MadePosDef);
            }
            let error = davidon_update(fcn, &error, dx.view(), &g1, s0.gradient());
            let edm = estimate_edm(&g1, &error) * (1.0 + 3.0 * error.dcovar());
            log::debug!(
                "migrad: fval = {}, edm = {:e}, dcovar = {:.3}, calls = {}",
                p.fval(),
                edm,
                error.dcovar(),
                fcn.num_calls()
            );
            let s1 = MinimumState::new(p, error, g1, edm, fcn.num_calls());
            states.push(s1.clone());
            s0 = s1;

            if edm <= edmval {
                return Termination::Converged;
            }
            if fcn.num_calls() >= max_fcn {
                return Termination::CallLimit;
            }
        }
    }

    /// State with the error matrix scaled down, so the next line search
    /// starts closer to the current point.
    fn shortened(&self, fcn: &WrappedFcn, s0: &MinimumState) -> MinimumState {
        let v = s0.error().inv_hessian() * self.line_search.shrink_factor;
        let error = MinimumError::new(v, 1.0);
        let edm = estimate_edm(s0.gradient(), &error);
        s0.with_error(error, edm, fcn.num_calls())
    }

    fn record(&self, states: &mut Vec<MinimumState>, s0: &MinimumState, nfcn: usize) {
        let st = s0.clone().with_nfcn(nfcn);
        match states.last_mut() {
            Some(last) => *last = st,
            None => states.push(st),
        }
    }
}

/// Rank-two update of the inverse Hessian.
///
/// When the step reveals negative curvature (`dx·dg <= 0`) or the matrix
/// is not positive along `dg`, the approximation is dropped and restarted
/// from the diagonal `1/g2` of the new gradient.
fn davidon_update(
    fcn: &WrappedFcn,
    error: &MinimumError,
    dx: ArrayView1<f64>,
    g1: &FunctionGradient,
    g0: &FunctionGradient,
) -> MinimumError {
    let v0 = error.inv_hessian();
    let dg = g1.grad() - g0.grad();
    let delgam = dx.dot(&dg);
    let vg = v0.dot(&dg);
    let gvg = dg.dot(&vg);

    if delgam <= 0.0 || gvg <= 0.0 || !(delgam.is_finite() && gvg.is_finite()) {
        log::warn!(
            "migrad: negative curvature along step (dx·dg = {:e}, dgᵀVdg = {:e}), resetting matrix",
            delgam,
            gvg
        );
        return MinimumError::new(diagonal_inverse(fcn, g1), 1.0);
    }

    let mut upd = outer(dx, dx) / delgam - outer(vg.view(), vg.view()) / gvg;
    if delgam > gvg {
        let w = &dx / delgam - &vg / gvg;
        upd = upd + outer(w.view(), w.view()) * gvg;
    }
    let sum_upd = upd.mapv(f64::abs).sum();
    let v1 = upd + v0;
    let sum_v1 = v1.mapv(f64::abs).sum();
    if !sum_v1.is_finite() || sum_v1 == 0.0 {
        return MinimumError::new(diagonal_inverse(fcn, g1), 1.0);
    }
    let dcovar = 0.5 * (error.dcovar() + sum_upd / sum_v1);
    MinimumError::new(v1, dcovar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSet;
    use crate::precision::MachinePrecision;
    use crate::transform::Transformation;
    use crate::vector::LineSearchBuilder;
    use float_cmp::approx_eq;

    fn setup(values: &[f64], steps: &[f64]) -> Transformation {
        let names: Vec<String> = (0..values.len()).map(|i| format!("x{}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let set = ParameterSet::from_values(&names, values, steps).unwrap();
        Transformation::new(&set, MachinePrecision::computed())
    }

    #[test]
    fn migrad() {
        let t = setup(&[3.0, -8.3], &[0.1, 0.1]);
        let function =
            |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let minimizer = MigradBuilder::default().tolerance(1e-4).build().unwrap();
        let res = minimizer.minimize(&fcn, 5000);
        assert!(res.is_valid());
        let x = res.user_values();
        assert!(approx_eq!(f64, x[0], 1.0, epsilon = 5e-3));
        assert!(approx_eq!(f64, x[1], 1.0, epsilon = 1e-2));
        assert!(res.nfcn() <= 5000);
    }

    #[test]
    fn quadratic_converges_with_exact_matrix() {
        let t = setup(&[5.0, -3.0, 1.0], &[1.0, 1.0, 1.0]);
        let f = |x: ArrayView1<f64>| {
            let d = arr1(&[x[0] - 1.0, x[1] - 2.0, x[2] + 1.0]);
            let a = arr2(&[[2.0, 0.5, 0.0], [0.5, 1.0, 0.2], [0.0, 0.2, 3.0]]);
            d.dot(&a.dot(&d))
        };
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let minimizer = MigradBuilder::default().tolerance(1e-4).build().unwrap();
        let res = minimizer.minimize(&fcn, 1000);
        assert!(res.is_valid());
        assert!(res.edm() < 2e-6);
        let x = res.user_values();
        assert!(approx_eq!(f64, x[0], 1.0, epsilon = 1e-3));
        assert!(approx_eq!(f64, x[1], 2.0, epsilon = 1e-3));
        assert!(approx_eq!(f64, x[2], -1.0, epsilon = 1e-3));
        assert_eq!(res.seed().vec(), &arr1(&[5.0, -3.0, 1.0]));
    }

    #[test]
    fn call_limit_keeps_start_point() {
        let t = setup(&[1.0, 1.0], &[0.1, 0.1]);
        let f = |x: ArrayView1<f64>| (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2);
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let res = Migrad::default().minimize(&fcn, 1);
        assert!(res.has_reached_call_limit());
        assert!(!res.is_valid());
        assert_eq!(res.user_values(), arr1(&[1.0, 1.0]));
    }

    #[test]
    fn walks_away_from_saddle() {
        // saddle at the origin, minima at x = ±1
        let t = setup(&[0.0, 0.5], &[0.1, 0.1]);
        let f = |x: ArrayView1<f64>| (x[0] * x[0] - 1.0).powi(2) + x[1] * x[1];
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let res = Migrad::default().minimize(&fcn, 2000);
        assert!(res.is_valid());
        assert!(res.fval() < 1e-6);
        assert!(approx_eq!(f64, res.user_values()[0].abs(), 1.0, epsilon = 1e-3));
    }

    #[test]
    fn nan_region_is_avoided() {
        let t = setup(&[2.0], &[1.0]);
        let f = |x: ArrayView1<f64>| if x[0] > 0.0 { x[0] - x[0].ln() } else { f64::NAN };
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let res = Migrad::default().minimize(&fcn, 1000);
        assert!(res.is_valid());
        assert!(approx_eq!(f64, res.user_values()[0], 1.0, epsilon = 1e-3));
    }

    #[test]
    fn stop_request_aborts() {
        use crate::fcn::{Fcn, StopRequest};
        use std::cell::Cell;

        struct Impatient(Cell<usize>);
        impl Fcn for Impatient {
            fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest> {
                self.0.set(self.0.get() + 1);
                if self.0.get() > 30 {
                    return Err(StopRequest("impatient".into()));
                }
                Ok((x[0] - 10.0).powi(4) + x[1] * x[1])
            }
        }
        let t = setup(&[0.0, 1.0], &[0.1, 0.1]);
        let f = Impatient(Cell::new(0));
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let res = Migrad::default().minimize(&fcn, 1000);
        assert!(res.is_aborted());
        assert!(!res.is_valid());
        assert!(res.fval().is_finite());
        assert_eq!(f.0.get(), 31);
    }

    #[test]
    fn sufficient_decrease_is_enforced() {
        let t = setup(&[-1.2, 1.0], &[0.1, 0.1]);
        let function =
            |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);

        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let loose = Migrad::default().minimize(&fcn, 5000);
        assert!(loose.is_valid());

        // no step along a curved line can keep 99.9% of the initial slope
        let strict = MigradBuilder::default()
            .line_search(LineSearchBuilder::default().armijo(0.999).build().unwrap())
            .build()
            .unwrap();
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let res = strict.minimize(&fcn, 5000);
        assert!(!res.is_valid());
        assert!(res.is_above_max_edm());
        assert!(res.fval() > loose.fval() + 1.0);
    }

    #[test]
    fn non_finite_steps_abort_after_retries() {
        // finite only in a narrow window around the start point
        let t = setup(&[5.0], &[0.1]);
        let f = |x: ArrayView1<f64>| {
            if (x[0] - 5.0).abs() < 2e-3 {
                x[0] * x[0]
            } else {
                f64::NAN
            }
        };
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let res = Migrad::default().minimize(&fcn, 1000);
        assert!(res.seed().is_valid());
        assert!(res.is_aborted());
        assert!(!res.is_valid());
        assert!(!res.has_reached_call_limit());
        assert_eq!(res.user_values(), arr1(&[5.0]));
        assert_eq!(res.fval(), 25.0);
    }

    #[test]
    fn builder_rejects_negative_tolerance() {
        assert!(MigradBuilder::default().tolerance(-1.0).build().is_err());
    }
}
