//! Full numerical second derivative matrix and its inverse.
//!
//! Diagonal elements come from symmetric three-point differences whose step
//! is tuned until the change in function value ("sag") is well above the
//! rounding noise of the objective. Off-diagonal elements reuse the diagonal
//! evaluations and need a single extra call each. The Hessian is forced
//! positive definite if needed and inverted; everything that goes wrong is
//! recorded in the [`ErrorStatus`] of the result.

use crate::fcn::WrappedFcn;
use crate::gradient::{refine_for_hessian, GradientCalculator, Numerical2P};
use crate::linalg::{invert_symmetric, make_pos_def};
use crate::minimum::{default_max_fcn, FunctionMinimum};
use crate::state::{estimate_edm, ErrorStatus, FunctionGradient, MinimumError, MinimumState};
use crate::strategy::Strategy;
use ndarray::prelude::*;

/// Number of tenfold step increases tried when the sag stays in the noise.
const MAX_STEP_GROWTH: usize = 5;

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
/// Settings of the Hessian calculation.
pub struct Hesse {
    /// Cycle counts and tolerances.
    #[builder(default = "Strategy::default()")]
    pub strategy: Strategy,
}

impl Default for Hesse {
    fn default() -> Self {
        Hesse {
            strategy: Strategy::default(),
        }
    }
}

impl Hesse {
    /// Recomputes the error matrix of a minimum.
    ///
    /// The calculation always starts from the last state the minimizer
    /// produced, never from an earlier HESSE result, so repeated calls give
    /// identical matrices. `max_fcn` defaults to `200 + 100n + 5n²`.
    pub fn update(
        &self,
        fcn: &WrappedFcn,
        minimum: &FunctionMinimum,
        max_fcn: Option<usize>,
    ) -> FunctionMinimum {
        let base = minimum.base_state();
        let max_fcn = max_fcn.unwrap_or_else(|| default_max_fcn(base.vec().len()));
        log::info!("hesse: {} free parameters", base.vec().len());
        let st = self.compute(fcn, base, max_fcn);
        let st = st.with_nfcn(base.nfcn() + fcn.num_calls());
        minimum.with_hesse(st, fcn.is_stopped())
    }

    /// Error matrix at the point of `state`, using the objective calls of
    /// `fcn` counted so far against `max_fcn`.
    pub fn compute(&self, fcn: &WrappedFcn, state: &MinimumState, max_fcn: usize) -> MinimumState {
        let trafo = fcn.trafo();
        let prec = trafo.precision();
        let eps2 = prec.eps2();
        let n = state.vec().len();

        let amin = fcn.call(state.vec().view());
        let aimsag = eps2.sqrt() * (amin.abs() + fcn.errordef());

        let (mut g2, mut gst, mut grd) = if state.gradient().is_analytical() {
            let tmp = Numerical2P {
                strategy: self.strategy,
            }
            .gradient(fcn, state.parameters(), state.gradient());
            (tmp.g2().clone(), tmp.gstep().clone(), state.gradient().grad().clone())
        } else {
            (
                state.gradient().g2().clone(),
                state.gradient().gstep().clone(),
                state.gradient().grad().clone(),
            )
        };
        let mut dirin = gst.clone();
        let mut yy = Array1::zeros(n);
        let mut hessian = Array2::zeros((n, n));
        let mut x = state.vec().clone();

        let failed = |status: ErrorStatus, g2: &Array1<f64>| {
            MinimumState::new(
                state.parameters().clone(),
                MinimumError::from_hesse(diagonal_fallback(g2, eps2), status),
                state.gradient().clone(),
                state.edm(),
                fcn.num_calls(),
            )
        };

        if !amin.is_finite() {
            log::warn!("hesse: objective is not finite at the minimum");
            return failed(ErrorStatus::HesseFailed, &g2);
        }

        for i in 0..n {
            let xtf = x[i];
            let dmin = 8.0 * eps2 * (xtf.abs() + eps2);
            let has_limits = trafo.parameter(i).has_limits();
            let mut d = gst[i].abs().max(dmin);

            for _ in 0..self.strategy.hessian_ncycles {
                let mut sag = 0.0;
                let mut fs1 = 0.0;
                let mut fs2 = 0.0;
                let mut found = false;
                for _ in 0..MAX_STEP_GROWTH {
                    x[i] = xtf + d;
                    fs1 = fcn.call(x.view());
                    x[i] = xtf - d;
                    fs2 = fcn.call(x.view());
                    x[i] = xtf;
                    sag = 0.5 * (fs1 + fs2 - 2.0 * amin);
                    if sag > eps2 {
                        found = true;
                        break;
                    }
                    if has_limits {
                        if d > 0.5 {
                            break;
                        }
                        d = (10.0 * d).min(0.51);
                    } else {
                        d *= 10.0;
                    }
                }
                if !found {
                    log::warn!(
                        "hesse: second derivative zero for parameter {}",
                        trafo.parameter(i).name()
                    );
                    return failed(ErrorStatus::HesseFailed, &g2);
                }

                let g2bfor = g2[i];
                g2[i] = 2.0 * sag / (d * d);
                grd[i] = (fs1 - fs2) / (2.0 * d);
                gst[i] = d;
                dirin[i] = d;
                yy[i] = fs1;
                let dlast = d;
                d = (2.0 * aimsag / g2[i].abs()).sqrt();
                if has_limits {
                    d = d.min(0.5);
                }
                d = d.max(dmin);
                if ((d - dlast) / d).abs() < self.strategy.hessian_step_tolerance
                    || ((g2[i] - g2bfor) / g2[i]).abs() < self.strategy.hessian_g2_tolerance
                {
                    break;
                }
                d = d.min(10.0 * dlast).max(0.1 * dlast);
            }
            hessian[[i, i]] = g2[i];
            log::trace!("hesse: g2[{}] = {}", i, g2[i]);

            if fcn.num_calls() > max_fcn {
                log::warn!("hesse: call limit reached");
                return failed(ErrorStatus::ReachedCallLimit, &g2);
            }
        }

        if self.strategy.level > 0 {
            let refined = refine_for_hessian(
                fcn,
                state.parameters(),
                &FunctionGradient::numerical(grd.clone(), g2.clone(), gst.clone(), true),
                &self.strategy,
            );
            grd = refined.grad().clone();
            gst = refined.gstep().clone();
        }

        for i in 0..n {
            x[i] += dirin[i];
            for j in i + 1..n {
                x[j] += dirin[j];
                let fs1 = fcn.call(x.view());
                let elem = (fs1 + amin - yy[i] - yy[j]) / (dirin[i] * dirin[j]);
                hessian[[i, j]] = elem;
                hessian[[j, i]] = elem;
                x[j] -= dirin[j];
            }
            x[i] -= dirin[i];
        }
        if hessian.iter().any(|v| !v.is_finite()) {
            log::warn!("hesse: non-finite second derivatives");
            return failed(ErrorStatus::HesseFailed, &g2);
        }

        let pd = make_pos_def(hessian.view(), prec);
        let inv = match invert_symmetric(pd.matrix.view()) {
            Some(inv) => inv,
            None => {
                log::warn!("hesse: matrix inversion failed, using diagonal");
                return failed(ErrorStatus::InvertFailed, &g2);
            }
        };

        let gradient = FunctionGradient::numerical(grd, g2, gst, true);
        let status = if pd.made_pos_def {
            log::warn!("hesse: matrix forced positive definite");
            ErrorStatus::MadePosDef
        } else {
            ErrorStatus::Valid
        };
        let error = MinimumError::from_hesse(inv, status);
        let edm = estimate_edm(&gradient, &error);
        log::debug!("hesse: edm = {}, {} calls", edm, fcn.num_calls());
        MinimumState::new(state.parameters().clone(), error, gradient, edm, fcn.num_calls())
    }
}

fn diagonal_fallback(g2: &Array1<f64>, eps2: f64) -> Array2<f64> {
    Array2::from_diag(&g2.mapv(|g| {
        let t = if g < eps2 { 1.0 } else { 1.0 / g };
        if t < eps2 || !t.is_finite() {
            1.0
        } else {
            t
        }
    }))
}
