//! Starting state for the variable-metric iteration.

use super::line_search::LineSearch;
use crate::fcn::WrappedFcn;
use crate::gradient::{initial_gradient, GradientCalculator};
use crate::state::{estimate_edm, FunctionGradient, MinimumError, MinimumParameters, MinimumState};
use ndarray::prelude::*;

/// Evaluates the objective and gradient at the start point and builds the
/// diagonal inverse Hessian `1/g2`.
///
/// Parameters whose second derivative estimate is not positive get a one
/// dimensional line search along the gradient first, so the iteration never
/// starts on a maximum or a saddle.
pub fn seed_state(
    fcn: &WrappedFcn,
    gc: &dyn GradientCalculator,
    line_search: &LineSearch,
) -> MinimumState {
    let x = fcn.trafo().initial_internal();
    let fval = fcn.call(x.view());
    let mut params = MinimumParameters::new(x, fval);
    let mut grad = gc.gradient(fcn, &params, &initial_gradient(fcn, &params));
    log::debug!("seed: fval = {}, grad = {}, g2 = {}", fval, grad.grad(), grad.g2());

    if grad.g2().iter().any(|&g2| g2 <= 0.0) && params.is_valid() {
        let (p, g) = negative_g2_search(fcn, gc, line_search, params, grad);
        params = p;
        grad = g;
    }

    let error = MinimumError::new(diagonal_inverse(fcn, &grad), 1.0);
    let edm = estimate_edm(&grad, &error);
    MinimumState::new(params, error, grad, edm, fcn.num_calls())
}

/// `diag(1/g2)` with unit entries where the curvature is unusable.
pub(crate) fn diagonal_inverse(fcn: &WrappedFcn, grad: &FunctionGradient) -> Array2<f64> {
    let eps2 = fcn.trafo().precision().eps2();
    Array2::from_diag(&grad.g2().mapv(|g2| {
        if g2.is_finite() && g2 > eps2 {
            1.0 / g2
        } else {
            1.0
        }
    }))
}

fn negative_g2_search(
    fcn: &WrappedFcn,
    gc: &dyn GradientCalculator,
    line_search: &LineSearch,
    mut params: MinimumParameters,
    mut grad: FunctionGradient,
) -> (MinimumParameters, FunctionGradient) {
    let n = params.vec().len();
    let eps2 = fcn.trafo().precision().eps2();
    let mut iter = 0;
    loop {
        let mut iterate = false;
        for i in 0..n {
            if grad.g2()[i] > 0.0 {
                continue;
            }
            log::debug!("negative second derivative for parameter {}, searching along it", i);
            let g = grad.grad()[i];
            let mut step = Array1::zeros(n);
            step[i] = if g.abs() > eps2 {
                -grad.gstep()[i] * g.signum()
            } else {
                grad.gstep()[i]
            };
            let gdel = step[i] * g;
            let result = line_search.search(fcn, &params, step.view(), gdel);
            if result.improved() {
                let x = params.vec() + &(&step * result.step);
                params = MinimumParameters::new(x, result.fval);
            }
            grad = gc.gradient(fcn, &params, &grad);
            iterate = true;
            break;
        }
        iter += 1;
        if !iterate || iter >= 2 * n || fcn.is_stopped() {
            break;
        }
    }
    (params, grad)
}
