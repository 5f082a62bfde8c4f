//! Parabolic line search along a descent direction.
//!
//! Starting from the full quasi-Newton step (`λ = 1`), the objective along
//! `x0 + λ·step` is modelled first by the parabola through `f(0)`, the slope
//! `gdel` at zero and `f(λ)`, then by parabolas through the three best
//! points seen so far. The search never fails hard: it returns the best
//! point it found, which is `λ = 0` when nothing improved.
//!
//! Trial points where the objective is NaN or infinite are treated as walls.
//! The step is pulled back geometrically towards the best point, and the
//! wall position caps all later trial steps.

use crate::fcn::WrappedFcn;
use crate::scalar::{Parabola, ParabolaPoint};
use crate::state::MinimumParameters;
use ndarray::prelude::*;

const SLAMBG: f64 = 5.0;
const ALPHA: f64 = 2.0;

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
/// Settings of the line search.
pub struct LineSearch {
    /// Maximum number of objective evaluations.
    #[builder(default = "12")]
    pub max_iter: usize,

    /// Relative resolution in the step length.
    #[builder(default = "0.05")]
    pub tolerance: f64,

    /// How often a step that hit a non-finite value may be pulled back.
    #[builder(default = "8")]
    pub max_shrink: usize,

    /// Factor applied to a step that hit a non-finite value.
    #[builder(default = "0.5")]
    pub shrink_factor: f64,

    /// Sufficient decrease constant, `f(λ) <= f(0) + c λ gdel`. MIGRAD
    /// stops iterating when the best point misses it.
    #[builder(default = "1e-4")]
    pub armijo: f64,
}

impl Default for LineSearch {
    fn default() -> Self {
        LineSearch {
            max_iter: 12,
            tolerance: 0.05,
            max_shrink: 8,
            shrink_factor: 0.5,
            armijo: 1e-4,
        }
    }
}

/// Outcome of a line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchResult {
    /// Best step length found, 0 if no trial point improved.
    pub step: f64,
    /// Objective value at the best step.
    pub fval: f64,
    /// Whether the best point satisfies the sufficient decrease condition.
    pub sufficient_decrease: bool,
    /// False if every trial point gave a non-finite objective.
    pub found_finite: bool,
}

impl LineSearchResult {
    pub fn improved(&self) -> bool {
        self.step != 0.0
    }
}

impl LineSearch {
    /// Searches along `step` from `start`, where `gdel = g·step < 0` is the
    /// directional derivative at the start point.
    pub fn search(
        &self,
        fcn: &WrappedFcn,
        start: &MinimumParameters,
        step: ArrayView1<f64>,
        gdel: f64,
    ) -> LineSearchResult {
        let prec = fcn.trafo().precision();
        let (eps, eps2) = (prec.eps(), prec.eps2());
        let x0 = start.vec();
        let f0 = start.fval();
        let eval = |slam: f64| {
            let x = x0 + &(&step * slam);
            let f = fcn.call(x.view());
            log::trace!("line search: f({}) = {}", slam, f);
            f
        };
        let finish = |xvmin: f64, fvmin: f64| LineSearchResult {
            step: xvmin,
            fval: fvmin,
            sufficient_decrease: xvmin != 0.0 && fvmin <= f0 + self.armijo * xvmin * gdel,
            found_finite: true,
        };

        let mut slamin = 0.0f64;
        for (xi, si) in x0.iter().zip(step.iter()) {
            if *si == 0.0 {
                continue;
            }
            let ratio = (xi / si).abs();
            if slamin == 0.0 || ratio < slamin {
                slamin = ratio;
            }
        }
        if slamin.abs() < eps {
            slamin = eps;
        }
        slamin *= eps2;

        let mut shrinks = 0;
        let mut s1 = 1.0;
        let mut f1 = eval(s1);
        let mut niter = 1;
        while !f1.is_finite() && !fcn.is_stopped() && shrinks < self.max_shrink {
            s1 *= self.shrink_factor;
            f1 = eval(s1);
            niter += 1;
            shrinks += 1;
        }
        if !f1.is_finite() {
            log::debug!("line search found no finite point along the step");
            return LineSearchResult {
                step: 0.0,
                fval: f0,
                sufficient_decrease: false,
                found_finite: false,
            };
        }

        let (mut xvmin, mut fvmin) = if f1 < f0 { (s1, f1) } else { (0.0, f0) };
        let mut overal = if shrinks > 0 {
            s1 / self.shrink_factor
        } else {
            1000.0
        };
        let mut undral = -100.0;
        let mut toler8 = self.tolerance;
        let mut slamax = SLAMBG * s1;
        let mut flast = f1;
        let mut slam = s1;

        let mut p0 = ParabolaPoint::new(0.0, f0);
        let mut p1 = ParabolaPoint::new(s1, f1);
        let mut f2;

        loop {
            let mut iterate = false;
            let denom = 2.0 * (flast - f0 - gdel * slam) / (slam * slam);
            slam = if denom != 0.0 { -gdel / denom } else { 1.0 };
            if slam < 0.0 || slam > slamax {
                slam = slamax;
            }
            if slam < toler8 {
                slam = toler8;
            }
            if slam < slamin {
                return finish(xvmin, fvmin);
            }
            if (slam - s1).abs() < toler8 && p1.y < p0.y {
                return finish(xvmin, fvmin);
            }
            if (slam - s1).abs() < toler8 {
                slam = s1 + toler8;
            }

            f2 = eval(slam);
            niter += 1;
            while !f2.is_finite() && !fcn.is_stopped() && shrinks < self.max_shrink {
                overal = overal.min(slam);
                slam = xvmin + (slam - xvmin) * self.shrink_factor;
                f2 = eval(slam);
                niter += 1;
                shrinks += 1;
            }
            if !f2.is_finite() {
                return finish(xvmin, fvmin);
            }
            if f2 < fvmin {
                fvmin = f2;
                xvmin = slam;
            }
            if (p0.y - fvmin).abs() < fvmin.abs() * eps {
                // flat so far, look closer
                iterate = true;
                flast = f2;
                toler8 = self.tolerance * slam;
                overal = slam - toler8;
                slamax = overal;
                p1 = ParabolaPoint::new(slam, flast);
            }
            if !(iterate && niter < self.max_iter) {
                break;
            }
        }
        if niter >= self.max_iter {
            return finish(xvmin, fvmin);
        }

        let mut p2 = ParabolaPoint::new(slam, f2);

        loop {
            slamax = slamax.max(ALPHA * xvmin.abs());
            let pb = Parabola::through(p0, p1, p2);
            if pb.a < eps2 {
                slam = if pb.slope(xvmin) < 0.0 {
                    xvmin + slamax
                } else {
                    xvmin - slamax
                };
            } else {
                slam = pb.x_min().min(xvmin + slamax).max(xvmin - slamax);
            }
            if slam > 0.0 {
                slam = slam.min(overal);
            } else {
                slam = slam.max(undral);
            }

            let mut f3;
            loop {
                let toler9 = toler8.max((toler8 * slam).abs());
                if (p0.x - slam).abs() < toler9
                    || (p1.x - slam).abs() < toler9
                    || (p2.x - slam).abs() < toler9
                {
                    return finish(xvmin, fvmin);
                }
                f3 = eval(slam);
                niter += 1;
                if fcn.is_stopped() {
                    return finish(xvmin, fvmin);
                }
                let f3c = if f3.is_finite() { f3 } else { f64::INFINITY };
                let iterate = if f3c > p0.y && f3c > p1.y && f3c > p2.y {
                    // worse than everything seen, cut the step
                    if slam > xvmin {
                        overal = overal.min(slam - toler8);
                    }
                    if slam < xvmin {
                        undral = undral.max(slam + toler8);
                    }
                    slam = 0.5 * (slam + xvmin);
                    niter += 1;
                    true
                } else {
                    false
                };
                if !(iterate && niter < self.max_iter) {
                    break;
                }
            }
            if niter >= self.max_iter || !f3.is_finite() {
                return finish(xvmin, fvmin);
            }

            let p3 = ParabolaPoint::new(slam, f3);
            if p0.y > p1.y && p0.y > p2.y {
                p0 = p3;
            } else if p1.y > p0.y && p1.y > p2.y {
                p1 = p3;
            } else {
                p2 = p3;
            }
            if f3 < fvmin {
                fvmin = f3;
                xvmin = slam;
            } else {
                if slam > xvmin {
                    overal = overal.min(slam - toler8);
                }
                if slam < xvmin {
                    undral = undral.max(slam + toler8);
                }
            }
            niter += 1;
            if niter >= self.max_iter {
                break;
            }
        }
        finish(xvmin, fvmin)
    }
}
