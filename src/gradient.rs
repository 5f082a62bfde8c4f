//! Gradient estimation in internal space.
//!
//! All numerical gradients are two-point central differences whose step is
//! tuned per component from the current curvature estimate `g2`, so that
//! the truncation error and the rounding error of the objective stay
//! balanced. Each component is refined for a bounded number of cycles; a
//! gradient that did not settle within them, or that needed step shrinking
//! because the objective went non-finite, is marked inaccurate rather than
//! rejected.

use crate::fcn::WrappedFcn;
use crate::state::{FunctionGradient, MinimumParameters};
use crate::strategy::Strategy;
use ndarray::prelude::*;

/// Produces a new gradient at `params`, reusing the step sizes and
/// curvature of `previous`.
pub trait GradientCalculator {
    fn gradient(
        &self,
        fcn: &WrappedFcn,
        params: &MinimumParameters,
        previous: &FunctionGradient,
    ) -> FunctionGradient;
}

/// First guess from the user step sizes alone, without calling the objective.
///
/// Every parameter is assumed to sit one step away from the minimum of a
/// parabola whose curvature makes the step equal to one standard deviation.
pub fn initial_gradient(fcn: &WrappedFcn, params: &MinimumParameters) -> FunctionGradient {
    let trafo = fcn.trafo();
    let eps2 = trafo.precision().eps2();
    let n = params.vec().len();
    let mut grad = Array1::zeros(n);
    let mut g2 = Array1::zeros(n);
    let mut gstep = Array1::zeros(n);

    for i in 0..n {
        let ext = trafo.ext_of_int(i);
        let p = trafo.parameter(i);
        let var = params.vec()[i];
        let werr = p.error();
        let sav = trafo.int2ext(i, var);

        let mut sav2 = sav + werr;
        if let Some(b) = p.upper_limit() {
            sav2 = sav2.min(b);
        }
        let vplu = trafo.ext2int(ext, sav2) - var;

        sav2 = sav - werr;
        if let Some(a) = p.lower_limit() {
            sav2 = sav2.max(a);
        }
        let vmin = trafo.ext2int(ext, sav2) - var;

        let gsmin = 8.0 * eps2 * (var.abs() + eps2);
        let dirin = (0.5 * (vplu.abs() + vmin.abs())).max(gsmin);
        g2[i] = 2.0 * fcn.errordef() / (dirin * dirin);
        gstep[i] = gsmin.max(0.1 * dirin);
        grad[i] = g2[i] * dirin;
        if p.has_limits() && gstep[i] > 0.5 {
            gstep[i] = 0.5;
        }
    }
    FunctionGradient::numerical(grad, g2, gstep, false)
}

/// Central differences with adaptive steps.
#[derive(Debug, Clone, Copy)]
pub struct Numerical2P {
    pub strategy: Strategy,
}

impl GradientCalculator for Numerical2P {
    fn gradient(
        &self,
        fcn: &WrappedFcn,
        params: &MinimumParameters,
        previous: &FunctionGradient,
    ) -> FunctionGradient {
        let trafo = fcn.trafo();
        let prec = trafo.precision();
        let (eps, eps2) = (prec.eps(), prec.eps2());
        let fcnmin = params.fval();
        let dfmin = 8.0 * eps2 * (fcnmin.abs() + fcn.errordef());
        let vrysml = 8.0 * eps * eps;

        let mut x = params.vec().clone();
        let mut grd = previous.grad().clone();
        let mut g2 = previous.g2().clone();
        let mut gstep = previous.gstep().clone();
        let mut accurate = true;

        for i in 0..x.len() {
            let xtf = x[i];
            let epspri = eps2 + (grd[i] * eps2).abs();
            let has_limits = trafo.parameter(i).has_limits();
            let mut stepb4 = 0.0;
            let mut shrink = 1.0;
            let mut retries = 0;
            let mut settled = false;
            let mut cycle = 0;

            while cycle < self.strategy.grad_ncycles {
                let optstp = (dfmin / (g2[i].abs() + epspri)).sqrt();
                let mut step = optstp.max((0.1 * gstep[i]).abs());
                if has_limits && step > 0.5 {
                    step = 0.5;
                }
                let stpmax = 10.0 * gstep[i].abs();
                if step > stpmax {
                    step = stpmax;
                }
                step *= shrink;
                let stpmin = vrysml.max(8.0 * (eps2 * x[i]).abs());
                if step < stpmin {
                    step = stpmin;
                }
                if ((step - stepb4) / step).abs() < self.strategy.grad_step_tolerance {
                    settled = true;
                    break;
                }
                gstep[i] = step;
                stepb4 = step;

                x[i] = xtf + step;
                let fs1 = fcn.call(x.view());
                x[i] = xtf - step;
                let fs2 = fcn.call(x.view());
                x[i] = xtf;

                if !(fs1.is_finite() && fs2.is_finite()) {
                    if fcn.is_stopped() || retries >= self.strategy.max_nonfinite_retries {
                        log::debug!("gradient component {} gave up on non-finite values", i);
                        break;
                    }
                    retries += 1;
                    shrink *= 0.5;
                    stepb4 = 0.0;
                    log::trace!("non-finite objective at step {}, shrinking", step);
                    continue;
                }

                let grdb4 = grd[i];
                grd[i] = 0.5 * (fs1 - fs2) / step;
                g2[i] = (fs1 + fs2 - 2.0 * fcnmin) / step / step;
                log::trace!("grad[{}] cycle {}: {} (g2 {})", i, cycle, grd[i], g2[i]);

                if (grdb4 - grd[i]).abs() / (grd[i].abs() + dfmin / step)
                    < self.strategy.grad_tolerance
                {
                    settled = true;
                    break;
                }
                cycle += 1;
            }
            if !settled || retries > 0 {
                accurate = false;
            }
        }
        FunctionGradient::numerical(grd, g2, gstep, accurate)
    }
}

/// Gradient supplied by the objective, with curvature carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct Analytical;

impl GradientCalculator for Analytical {
    fn gradient(
        &self,
        fcn: &WrappedFcn,
        params: &MinimumParameters,
        previous: &FunctionGradient,
    ) -> FunctionGradient {
        match fcn.gradient(params.vec().view()) {
            Some(g) => FunctionGradient::analytical(g, previous.g2().clone(), previous.gstep().clone()),
            None => previous.clone(),
        }
    }
}

/// Picks the analytic gradient when the objective provides one.
pub fn calculator_for(fcn: &WrappedFcn, strategy: Strategy) -> Box<dyn GradientCalculator> {
    if fcn.has_gradient() {
        Box::new(Analytical)
    } else {
        Box::new(Numerical2P { strategy })
    }
}

/// Refines first derivatives with shrinking steps, using the diagonal
/// second derivatives HESSE has just measured.
pub fn refine_for_hessian(
    fcn: &WrappedFcn,
    params: &MinimumParameters,
    gradient: &FunctionGradient,
    strategy: &Strategy,
) -> FunctionGradient {
    let prec = fcn.trafo().precision();
    let (eps, eps2) = (prec.eps(), prec.eps2());
    let fcnmin = params.fval();
    let dfmin = 4.0 * eps2 * (fcnmin.abs() + fcn.errordef());

    let mut x = params.vec().clone();
    let mut grd = gradient.grad().clone();
    let g2 = gradient.g2().clone();
    let mut gstep = gradient.gstep().clone();
    let mut accurate = true;

    for i in 0..x.len() {
        let xtf = x[i];
        let dmin = 4.0 * eps2 * (xtf.abs() + eps2);
        let epspri = eps2 + (grd[i] * eps2).abs();
        let optstp = (dfmin / (g2[i].abs() + epspri)).sqrt();
        let mut d = (0.2 * gstep[i].abs()).min(optstp).max(dmin);
        let mut chgold = 10000.0;

        for j in 0..strategy.hessian_grad_ncycles {
            x[i] = xtf + d;
            let fs1 = fcn.call(x.view());
            x[i] = xtf - d;
            let fs2 = fcn.call(x.view());
            x[i] = xtf;
            if !(fs1.is_finite() && fs2.is_finite()) {
                accurate = false;
                break;
            }

            let grdold = grd[i];
            let grdnew = (fs1 - fs2) / (2.0 * d);
            let dgmin = eps * (fs1.abs() + fs2.abs()) / d;
            if grdnew == 0.0 {
                break;
            }
            let change = ((grdold - grdnew) / grdnew).abs();
            if change > chgold && j > 1 {
                break;
            }
            chgold = change;
            grd[i] = grdnew;
            gstep[i] = d;
            if change < 0.05 || (grdold - grdnew).abs() < dgmin || d < dmin {
                break;
            }
            d *= 0.2;
        }
    }
    FunctionGradient::numerical(grd, g2, gstep, accurate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSet;
    use crate::precision::MachinePrecision;
    use crate::transform::Transformation;
    use float_cmp::approx_eq;

    fn setup(values: &[f64]) -> Transformation {
        let names: Vec<String> = (0..values.len()).map(|i| format!("x{}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let steps = vec![0.1; values.len()];
        let set = ParameterSet::from_values(&names, values, &steps).unwrap();
        Transformation::new(&set, MachinePrecision::computed())
    }

    #[test]
    fn gradient() {
        let t = setup(&[1.0, 1.0]);
        let function = |x: ArrayView1<f64>| 1.0 * x[0].powi(2) + 200. * x[1].powi(2);
        let fcn = WrappedFcn::new(&function, &t, 1.0);
        let x = t.initial_internal();
        let p = MinimumParameters::new(x.clone(), fcn.call(x.view()));
        let g0 = initial_gradient(&fcn, &p);
        let g = Numerical2P {
            strategy: Strategy::medium(),
        }
        .gradient(&fcn, &p, &g0);

        assert!(approx_eq!(f64, g.grad()[0], 2.0, epsilon = 1e-4));
        assert!(approx_eq!(f64, g.grad()[1], 400.0, epsilon = 1e-3));
        assert!(approx_eq!(f64, g.g2()[0], 2.0, epsilon = 1e-3));
        assert!(approx_eq!(f64, g.g2()[1], 400.0, epsilon = 1e-1));
    }

    #[test]
    fn initial_gradient_from_steps() {
        let t = setup(&[0.0]);
        let f = |x: ArrayView1<f64>| x[0] * x[0];
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let p = MinimumParameters::new(arr1(&[0.0]), 0.0);
        let g = initial_gradient(&fcn, &p);
        // step 0.1 taken as one sigma: g2 = 2 up / 0.1²
        assert!(approx_eq!(f64, g.g2()[0], 200.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, g.gstep()[0], 0.01, epsilon = 1e-12));
        assert_eq!(fcn.num_calls(), 0);
    }

    #[test]
    fn non_finite_region_marks_inaccurate() {
        let t = setup(&[0.0]);
        // not finite just right of the point
        let f = |x: ArrayView1<f64>| if x[0] > 1e-3 { f64::NAN } else { x[0] };
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let p = MinimumParameters::new(arr1(&[0.0]), 0.0);
        let g0 = initial_gradient(&fcn, &p);
        let g = Numerical2P {
            strategy: Strategy::medium(),
        }
        .gradient(&fcn, &p, &g0);
        assert!(!g.is_accurate());
        assert!(g.grad()[0].is_finite());
    }

    #[test]
    fn analytical_gradient_keeps_curvature() {
        let t = setup(&[3.0]);
        let f = crate::fcn::with_gradient(
            |x: ArrayView1<f64>| x[0] * x[0],
            |x: ArrayView1<f64>| arr1(&[2.0 * x[0]]),
        );
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let p = MinimumParameters::new(arr1(&[3.0]), 9.0);
        let g0 = initial_gradient(&fcn, &p);
        let g = calculator_for(&fcn, Strategy::medium()).gradient(&fcn, &p, &g0);
        assert!(g.is_analytical());
        assert_eq!(g.grad()[0], 6.0);
        assert_eq!(g.g2(), g0.g2());
        assert_eq!(fcn.num_calls(), 0);
    }

    #[test]
    fn hessian_refinement() {
        let t = setup(&[0.5]);
        let f = |x: ArrayView1<f64>| x[0].powi(4);
        let fcn = WrappedFcn::new(&f, &t, 1.0);
        let p = MinimumParameters::new(arr1(&[0.5]), 0.0625);
        let g0 = FunctionGradient::numerical(arr1(&[0.4]), arr1(&[3.0]), arr1(&[0.05]), true);
        let g = refine_for_hessian(&fcn, &p, &g0, &Strategy::high());
        assert!(approx_eq!(f64, g.grad()[0], 0.5, epsilon = 1e-5));
    }
}
