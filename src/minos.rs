//! Asymmetric errors from the profile of the objective.
//!
//! For a parameter `p` MINOS looks for the values where the objective,
//! minimized over all other free parameters with `p` held fixed, rises by
//! `errordef` above the minimum. Each side is searched separately. Trial
//! points are written as `p = pmid + a · pdir`, where `pmid` lies one
//! parabolic error away from the minimum and `pdir` is that error, so the
//! search runs in units of the parabolic error and `a = 0` is the parabolic
//! guess:
//!
//! ```text
//!   f
//!   |  *                          *
//!   |   *                      *
//!   +----x-------------------x-------- fmin + errordef
//!   |      *              *
//!   |          *  *  *
//!   +-----------------------------------> p
//!      lower      min       upper
//! ```
//!
//! The crossing is bracketed with secant steps and then refined by fitting a
//! parabola through the last three trial points.

use crate::errors::{Error, Result};
use crate::fcn::{Fcn, WrappedFcn};
use crate::minimum::{default_max_fcn, FunctionMinimum, Minimizer};
use crate::parameter::ParameterSet;
use crate::precision::MachinePrecision;
use crate::scalar::{Parabola, ParabolaPoint};
use crate::strategy::Strategy;
use crate::transform::Transformation;
use crate::vector::Migrad;

/// Trial points allowed per side.
const MAX_ITER: usize = 15;

/// Relative tolerance on the function value and position of a crossing.
const CROSS_TOLERANCE: f64 = 0.01;

/// Largest step, in units of the parabolic error, when no limit is closer.
const MAX_STEP: f64 = 100.0;

/// Outcome of the search on one side of the minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinosSide {
    /// Signed distance from the minimum to the crossing. When the search
    /// failed this is the parabolic error, and at a limit it is the distance
    /// to that limit.
    pub error: f64,
    /// The crossing was found within tolerance.
    pub is_valid: bool,
    /// The parameter limit was reached before the objective rose by `errordef`.
    pub at_limit: bool,
    /// The call limit was exhausted.
    pub at_max_fcn: bool,
    /// A point below the minimum was found while scanning.
    pub new_minimum: bool,
    /// Objective calls spent on this side.
    pub nfcn: usize,
}

/// Asymmetric confidence interval of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MinosError {
    pub name: String,
    /// External index of the parameter.
    pub index: usize,
    /// Parameter value at the minimum.
    pub min: f64,
    /// Confidence level in standard deviations.
    pub cl: f64,
    pub lower: MinosSide,
    pub upper: MinosSide,
}

impl MinosError {
    /// Both crossings found.
    pub fn is_valid(&self) -> bool {
        self.lower.is_valid && self.upper.is_valid
    }

    /// Negative distance to the lower crossing.
    pub fn lower(&self) -> f64 {
        self.lower.error
    }

    /// Positive distance to the upper crossing.
    pub fn upper(&self) -> f64 {
        self.upper.error
    }

    /// Interval `[min + lower, min + upper]`.
    pub fn interval(&self) -> (f64, f64) {
        (self.min + self.lower.error, self.min + self.upper.error)
    }

    pub fn nfcn(&self) -> usize {
        self.lower.nfcn + self.upper.nfcn
    }
}

/// One point of a profile scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    pub value: f64,
    /// Objective minimized over the other free parameters.
    pub fval: f64,
    /// Whether that minimization converged.
    pub is_valid: bool,
}

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
/// Settings of the MINOS error search.
pub struct Minos {
    /// Strategy of the fit; the re-minimizations run one level lower.
    #[builder(default = "Strategy::default()")]
    pub strategy: Strategy,

    /// Tolerance of the fit. The re-minimizations use half of it.
    #[builder(default = "0.1")]
    pub tolerance: f64,
}

impl MinosBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        match self.tolerance {
            Some(t) if !(t.is_finite() && t > 0.0) => {
                Err(format!("tolerance must be positive, got {}", t))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Minos {
    fn default() -> Self {
        Minos {
            strategy: Strategy::default(),
            tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Lower,
    Upper,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Lower => -1.0,
            Direction::Upper => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossStatus {
    Found,
    AtLimit,
    CallLimit,
    NewMinimum,
    Invalid,
}

#[derive(Debug, Clone, Copy)]
struct CrossEnd {
    status: CrossStatus,
    aopt: f64,
}

enum Trial {
    Fval(f64),
    Stop(CrossStatus),
}

impl Minos {
    /// Lower and upper error of external parameter `par` at `cl` standard
    /// deviations.
    ///
    /// `max_fcn` limits the calls spent on each side and defaults to
    /// `2 (n + 1) (200 + 100n + 5n²)` for `n` free parameters.
    pub fn errors(
        &self,
        fcn: &dyn Fcn,
        minimum: &FunctionMinimum,
        par: usize,
        cl: f64,
        max_fcn: Option<usize>,
    ) -> Result<MinosError> {
        let lower = self.side(fcn, minimum, par, cl, max_fcn, Direction::Lower)?;
        let upper = self.side(fcn, minimum, par, cl, max_fcn, Direction::Upper)?;
        let p = &minimum.trafo().parameters()[par];
        log::info!(
            "minos: {} = {} {:+} {:+} ({} calls)",
            p.name(),
            minimum.user_values()[par],
            lower.error,
            upper.error,
            lower.nfcn + upper.nfcn
        );
        Ok(MinosError {
            name: p.name().to_string(),
            index: par,
            min: minimum.user_values()[par],
            cl,
            lower,
            upper,
        })
    }

    /// Lower side only.
    pub fn lower(
        &self,
        fcn: &dyn Fcn,
        minimum: &FunctionMinimum,
        par: usize,
        cl: f64,
        max_fcn: Option<usize>,
    ) -> Result<MinosSide> {
        self.side(fcn, minimum, par, cl, max_fcn, Direction::Lower)
    }

    /// Upper side only.
    pub fn upper(
        &self,
        fcn: &dyn Fcn,
        minimum: &FunctionMinimum,
        par: usize,
        cl: f64,
        max_fcn: Option<usize>,
    ) -> Result<MinosSide> {
        self.side(fcn, minimum, par, cl, max_fcn, Direction::Upper)
    }

    fn side(
        &self,
        fcn: &dyn Fcn,
        minimum: &FunctionMinimum,
        par: usize,
        cl: f64,
        max_fcn: Option<usize>,
        direction: Direction,
    ) -> Result<MinosSide> {
        let trafo = minimum.trafo();
        if par >= trafo.n_external() {
            return Err(Error::IndexOutOfRange {
                index: par,
                len: trafo.n_external(),
            });
        }
        if !(cl.is_finite() && cl > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "confidence level must be positive, got {}",
                cl
            )));
        }
        let ind = match trafo.int_of_ext(par) {
            Some(ind) => ind,
            None => {
                return Err(Error::InvalidConfig(format!(
                    "parameter '{}' is fixed",
                    trafo.parameters()[par].name()
                )))
            }
        };
        if !minimum.is_valid() || !minimum.has_covariance() {
            return Err(Error::InvalidMinimum);
        }

        let n = trafo.n_internal();
        let max_fcn = max_fcn.unwrap_or_else(|| 2 * (n + 1) * default_max_fcn(n));
        let up = minimum.errordef() * cl * cl;
        let sign = direction.sign();
        let values = minimum.user_values();
        let errors = minimum.user_errors();
        let param = &trafo.parameters()[par];
        let limit = match direction {
            Direction::Lower => param.lower_limit(),
            Direction::Upper => param.upper_limit(),
        };

        let mut val = values[par] + sign * errors[par];
        if let Some(l) = limit {
            val = match direction {
                Direction::Lower => val.max(l),
                Direction::Upper => val.min(l),
            };
        }
        let err = val - values[par];

        // the other parameters start where a quadratic objective would put
        // them for this shift
        let m = minimum.state().error().matrix();
        let x = minimum.state().vec();
        let xunit = (up / m[[ind, ind]]).sqrt();
        let mut shifted = values.clone();
        for i in (0..n).filter(|&i| i != ind) {
            let xnew = x[i] + sign * xunit * m[[ind, i]];
            shifted[trafo.ext_of_int(i)] = trafo.int2ext(i, xnew);
        }
        let mut start = trafo.parameters().clone();
        start.assign_values(shifted.view());
        start.assign_errors(errors.view());

        log::debug!(
            "minos: {:?} side of {}, start at {}, up = {}",
            direction,
            param.name(),
            val,
            up
        );

        let mut cross = Cross {
            fcn,
            migrad: Migrad {
                strategy: self.strategy.lowered(),
                tolerance: 0.5 * self.tolerance,
                ..Migrad::default()
            },
            precision: *trafo.precision(),
            par,
            state: start,
            limit,
            pmid: val,
            pdir: err,
            fmin: minimum.fval(),
            up,
            aim: minimum.fval() + up,
            tlf: CROSS_TOLERANCE * up,
            max_fcn,
            nfcn: 0,
        };
        let end = cross.find()?;

        let mut side = MinosSide {
            error: sign * errors[par],
            is_valid: false,
            at_limit: false,
            at_max_fcn: false,
            new_minimum: false,
            nfcn: cross.nfcn,
        };
        match end.status {
            CrossStatus::Found => {
                side.error = err * (1.0 + end.aopt);
                side.is_valid = true;
            }
            CrossStatus::AtLimit => {
                side.at_limit = true;
                side.error = limit.map_or(err * (1.0 + end.aopt), |l| l - values[par]);
            }
            CrossStatus::CallLimit => side.at_max_fcn = true,
            CrossStatus::NewMinimum => side.new_minimum = true,
            CrossStatus::Invalid => {}
        }
        if !side.is_valid {
            log::warn!(
                "minos: {:?} side of {} ended with {:?}",
                direction,
                param.name(),
                end.status
            );
        }
        Ok(side)
    }
}

/// Objective minimized over the free parameters of `set` with `par` held at
/// `value`.
fn minimize_fixed(
    fcn: &dyn Fcn,
    set: &ParameterSet,
    par: usize,
    value: f64,
    migrad: &Migrad,
    precision: MachinePrecision,
    errordef: f64,
    max_fcn: usize,
) -> Result<FunctionMinimum> {
    let mut set = set.clone();
    set.set_value(par, value)?;
    set.fix(par)?;
    let trafo = Transformation::new(&set, precision);
    let wrapped = WrappedFcn::new(fcn, &trafo, errordef);
    Ok(migrad.minimize(&wrapped, max_fcn))
}

/// Search for the crossing of the profile with `aim` along one direction.
struct Cross<'a> {
    fcn: &'a dyn Fcn,
    migrad: Migrad,
    precision: MachinePrecision,
    par: usize,
    /// Start values of the next re-minimization, updated after each one.
    state: ParameterSet,
    limit: Option<f64>,
    pmid: f64,
    pdir: f64,
    fmin: f64,
    up: f64,
    aim: f64,
    tlf: f64,
    max_fcn: usize,
    nfcn: usize,
}

macro_rules! trial {
    ($cross:expr, $aopt:expr, $limset:expr) => {
        match $cross.trial($aopt, $limset)? {
            Trial::Fval(f) => f,
            Trial::Stop(status) => {
                return Ok(CrossEnd {
                    status,
                    aopt: $aopt,
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Stepping outwards until the profile rises.
    Slope,
    /// Secant step through the last two points.
    Line,
    /// Parabola through three points bracketing the crossing.
    Parabola,
}

impl<'a> Cross<'a> {
    fn trial(&mut self, aopt: f64, limset: bool) -> Result<Trial> {
        let value = self.pmid + aopt * self.pdir;
        if !value.is_finite() {
            return Ok(Trial::Stop(CrossStatus::Invalid));
        }
        let remaining = self.max_fcn.saturating_sub(self.nfcn);
        if remaining == 0 {
            return Ok(Trial::Stop(CrossStatus::CallLimit));
        }
        let fm = minimize_fixed(
            self.fcn,
            &self.state,
            self.par,
            value,
            &self.migrad,
            self.precision,
            self.up,
            remaining,
        )?;
        self.nfcn += fm.nfcn();
        log::debug!(
            "minos: {} = {} -> fval = {} ({} calls)",
            self.state[self.par].name(),
            value,
            fm.fval(),
            fm.nfcn()
        );

        if fm.fval() < self.fmin - self.tlf {
            log::warn!(
                "minos: new minimum {} below {} while scanning {}",
                fm.fval(),
                self.fmin,
                self.state[self.par].name()
            );
            return Ok(Trial::Stop(CrossStatus::NewMinimum));
        }
        if fm.has_reached_call_limit() {
            return Ok(Trial::Stop(CrossStatus::CallLimit));
        }
        if !fm.is_valid() {
            return Ok(Trial::Stop(CrossStatus::Invalid));
        }
        self.state.assign_values(fm.user_values().view());
        if fm.has_covariance() {
            self.state.assign_errors(fm.user_errors().view());
        }
        if limset && fm.fval() < self.aim {
            return Ok(Trial::Stop(CrossStatus::AtLimit));
        }
        Ok(Trial::Fval(fm.fval()))
    }

    fn find(&mut self) -> Result<CrossEnd> {
        let tlr = CROSS_TOLERANCE;
        let tlf = self.tlf;
        let aim = self.aim;
        let found = |aopt: f64| CrossEnd {
            status: CrossStatus::Found,
            aopt,
        };
        let invalid = |aopt: f64| CrossEnd {
            status: CrossStatus::Invalid,
            aopt,
        };

        let mut aulim = MAX_STEP;
        if let Some(zlim) = self.limit {
            let eps = self.precision.eps() * self.pmid.abs().max(1.0);
            if self.pdir.abs() < eps {
                if (zlim - self.pmid).abs() < eps {
                    return Ok(CrossEnd {
                        status: CrossStatus::AtLimit,
                        aopt: 0.0,
                    });
                }
            } else {
                aulim = aulim.min((zlim - self.pmid) / self.pdir);
            }
        }
        let clip = |aopt: f64| {
            if aopt > aulim {
                (aulim, true)
            } else {
                (aopt, false)
            }
        };

        let mut aopt = 0.0;
        let limset = aulim < aopt + tlr;
        let mut alsb = [0.0; 3];
        let mut flsb = [0.0; 3];

        let f = trial!(self, aopt, limset);
        alsb[0] = aopt;
        flsb[0] = f.max(self.fmin + 0.1 * self.up);
        let mut ipt = 1;
        aopt = (self.up / (flsb[0] - self.fmin)).sqrt() - 1.0;
        if (flsb[0] - aim).abs() < tlf {
            return Ok(found(aopt));
        }

        let (a, limset) = clip(aopt.max(-0.5).min(1.0));
        aopt = a;
        let f = trial!(self, aopt, limset);
        alsb[1] = aopt;
        flsb[1] = f;
        let mut dfda = (flsb[1] - flsb[0]) / (alsb[1] - alsb[0]);

        let mut ibest = 2;
        let mut phase = Phase::Slope;
        loop {
            match phase {
                Phase::Slope => {
                    if dfda < 0.0 {
                        for it in 0..MAX_ITER.saturating_sub(ipt) {
                            alsb[0] = alsb[1];
                            flsb[0] = flsb[1];
                            let (a, limset) = clip(alsb[0] + 0.2 * (it + 1) as f64);
                            aopt = a;
                            let f = trial!(self, aopt, limset);
                            ipt += 1;
                            alsb[1] = aopt;
                            flsb[1] = f;
                            dfda = (flsb[1] - flsb[0]) / (alsb[1] - alsb[0]);
                            if dfda > 0.0 {
                                break;
                            }
                        }
                        if !(dfda > 0.0) {
                            log::debug!("minos: profile does not rise within {} points", ipt);
                            return Ok(invalid(aopt));
                        }
                    }
                    phase = Phase::Line;
                }
                Phase::Line => {
                    aopt = alsb[1] + (aim - flsb[1]) / dfda;
                    let fdist = (aim - flsb[0]).abs().min((aim - flsb[1]).abs());
                    let adist = (aopt - alsb[0]).abs().min((aopt - alsb[1]).abs());
                    let tla = if aopt.abs() > 1.0 { tlr * aopt.abs() } else { tlr };
                    if adist < tla && fdist < tlf {
                        return Ok(found(aopt));
                    }
                    if ipt > MAX_ITER {
                        return Ok(invalid(aopt));
                    }
                    let bmin = alsb[0].min(alsb[1]) - 1.0;
                    let bmax = alsb[0].max(alsb[1]) + 1.0;
                    let (a, limset) = clip(aopt.max(bmin).min(bmax));
                    aopt = a;
                    let f = trial!(self, aopt, limset);
                    ipt += 1;
                    alsb[2] = aopt;
                    flsb[2] = f;

                    let mut ecarmn = (flsb[2] - aim).abs();
                    let mut ecarmx = 0.0;
                    let mut iworst = 0;
                    let mut noless = 0;
                    ibest = 2;
                    for i in 0..3 {
                        let ecart = (flsb[i] - aim).abs();
                        if ecart > ecarmx {
                            ecarmx = ecart;
                            iworst = i;
                        }
                        if ecart < ecarmn {
                            ecarmn = ecart;
                            ibest = i;
                        }
                        if flsb[i] < aim {
                            noless += 1;
                        }
                    }

                    match noless {
                        1 | 2 => phase = Phase::Parabola,
                        // all above and the newest point is not the closest
                        0 if ibest != 2 => return Ok(invalid(aopt)),
                        // all below: the slope turned, look for the rise again
                        3 if ibest != 2 => {
                            alsb[1] = alsb[2];
                            flsb[1] = flsb[2];
                            dfda = (flsb[1] - flsb[0]) / (alsb[1] - alsb[0]);
                            phase = Phase::Slope;
                        }
                        _ => {
                            alsb[iworst] = alsb[2];
                            flsb[iworst] = flsb[2];
                            dfda = (flsb[1] - flsb[0]) / (alsb[1] - alsb[0]);
                        }
                    }
                }
                Phase::Parabola => {
                    let parabola = Parabola::through(
                        ParabolaPoint::new(alsb[0], flsb[0]),
                        ParabolaPoint::new(alsb[1], flsb[1]),
                        ParabolaPoint::new(alsb[2], flsb[2]),
                    );
                    let (x1, x2) = match parabola.crossings(aim, self.precision.eps()) {
                        Some(roots) => roots,
                        None => {
                            log::debug!("minos: parabola does not reach the crossing level");
                            return Ok(invalid(aopt));
                        }
                    };
                    // the crossing on the rising branch
                    let (s1, s2) = (parabola.slope(x1), parabola.slope(x2));
                    let (mut a, slope) = if s2 > 0.0 { (x2, s2) } else { (x1, s1) };

                    let tla = if a.abs() > 1.0 { tlr * a.abs() } else { tlr };
                    if (a - alsb[ibest]).abs() < tla && (flsb[ibest] - aim).abs() < tlf {
                        return Ok(found(a));
                    }
                    if ipt > MAX_ITER {
                        return Ok(invalid(a));
                    }

                    let mut ileft = None;
                    let mut iright = None;
                    let mut iout = None;
                    let mut ecarmx = 0.0f64;
                    for i in 0..3 {
                        ecarmx = ecarmx.max((flsb[i] - aim).abs());
                        if flsb[i] > aim {
                            match iright {
                                None => iright = Some(i),
                                Some(r) if flsb[i] > flsb[r] => iout = Some(i),
                                Some(r) => {
                                    iout = Some(r);
                                    iright = Some(i);
                                }
                            }
                        } else {
                            match ileft {
                                None => ileft = Some(i),
                                Some(l) if flsb[i] < flsb[l] => iout = Some(i),
                                Some(l) => {
                                    iout = Some(l);
                                    ileft = Some(i);
                                }
                            }
                        }
                    }
                    let (ileft, iright, iout) = match (ileft, iright, iout) {
                        (Some(l), Some(r), Some(o)) => (l, r, o),
                        _ => return Ok(invalid(a)),
                    };

                    // do not keep a bad point around for the next parabola
                    if ecarmx > 10.0 * (flsb[iout] - aim).abs() {
                        a = 0.5 * (a + 0.5 * (alsb[iright] + alsb[ileft]));
                    }

                    // stay strictly between the bracketing points
                    let mut smalla = 0.1 * tla;
                    if slope * smalla > tlf {
                        smalla = tlf / slope;
                    }
                    let aleft = alsb[ileft] + smalla;
                    let aright = alsb[iright] - smalla;
                    if a < aleft {
                        a = aleft;
                    }
                    if a > aright {
                        a = aright;
                    }
                    if aleft > aright {
                        a = 0.5 * (aleft + aright);
                    }

                    let (a, limset) = clip(a);
                    aopt = a;
                    let f = trial!(self, aopt, limset);
                    ipt += 1;
                    alsb[iout] = aopt;
                    flsb[iout] = f;
                    ibest = iout;
                    if ipt >= MAX_ITER {
                        return Ok(invalid(aopt));
                    }
                }
            }
        }
    }
}

/// Profile of the objective along external parameter `par`: at each of
/// `values` the parameter is fixed and the others are minimized, each fit
/// starting from the result of the previous one.
pub fn profile(
    fcn: &dyn Fcn,
    minimum: &FunctionMinimum,
    par: usize,
    values: &[f64],
    migrad: &Migrad,
    max_fcn: Option<usize>,
) -> Result<Vec<ProfilePoint>> {
    let trafo = minimum.trafo();
    if par >= trafo.n_external() {
        return Err(Error::IndexOutOfRange {
            index: par,
            len: trafo.n_external(),
        });
    }
    let mut state = trafo.parameters().clone();
    state.assign_values(minimum.user_values().view());
    state.assign_errors(minimum.user_errors().view());
    let max_fcn = max_fcn.unwrap_or_else(|| default_max_fcn(trafo.n_internal()));

    let mut points = Vec::with_capacity(values.len());
    for &value in values {
        let fm = minimize_fixed(
            fcn,
            &state,
            par,
            value,
            migrad,
            *trafo.precision(),
            minimum.errordef(),
            max_fcn,
        )?;
        if fm.is_valid() {
            state.assign_values(fm.user_values().view());
        }
        log::trace!("profile: {} -> {}", value, fm.fval());
        points.push(ProfilePoint {
            value,
            fval: fm.fval(),
            is_valid: fm.is_valid(),
        });
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::MigradBuilder;
    use float_cmp::approx_eq;
    use ndarray::prelude::*;

    fn fit(f: &dyn Fcn, set: &ParameterSet, errordef: f64) -> FunctionMinimum {
        let trafo = Transformation::new(set, MachinePrecision::computed());
        let wrapped = WrappedFcn::new(f, &trafo, errordef);
        MigradBuilder::default()
            .tolerance(0.01)
            .build()
            .unwrap()
            .minimize(&wrapped, 10_000)
    }

    #[test]
    fn symmetric_for_a_quadratic() {
        // A = [[2, 1], [1, 4]], A⁻¹ = [[4, -1], [-1, 2]] / 7
        let f = |x: ArrayView1<f64>| {
            let (a, b) = (x[0] - 1.0, x[1] + 2.0);
            2.0 * a * a + 2.0 * a * b + 4.0 * b * b
        };
        let set = ParameterSet::from_values(&["a", "b"], &[0.0, 0.0], &[0.1, 0.1]).unwrap();
        let fm = fit(&f, &set, 1.0);
        assert!(fm.is_valid());

        let me = Minos::default().errors(&f, &fm, 0, 1.0, None).unwrap();
        let expected = (4.0f64 / 7.0).sqrt();
        assert!(me.is_valid());
        assert!(approx_eq!(f64, me.upper(), expected, epsilon = 0.01 * expected));
        assert!(approx_eq!(f64, me.lower(), -expected, epsilon = 0.01 * expected));
        assert!(me.nfcn() > 0);
        let (lo, hi) = me.interval();
        assert!(lo < 1.0 && hi > 1.0);
    }

    #[test]
    fn asymmetric_profile() {
        // profile over y is (e^x - 1)², which crosses 1/2 at ln(1 ± 1/√2)
        let f = |x: ArrayView1<f64>| (x[0].exp() - 1.0).powi(2) + (x[1] - x[0]).powi(2);
        let set = ParameterSet::from_values(&["x", "y"], &[0.3, 0.3], &[0.1, 0.1]).unwrap();
        let fm = fit(&f, &set, 0.5);
        assert!(fm.is_valid());

        let me = Minos::default().errors(&f, &fm, 0, 1.0, None).unwrap();
        assert!(me.is_valid());
        let half = 0.5f64.sqrt();
        assert!(approx_eq!(f64, me.upper(), (1.0 + half).ln(), epsilon = 0.01));
        assert!(approx_eq!(f64, me.lower(), (1.0 - half).ln(), epsilon = 0.03));
        assert!(me.lower().abs() > me.upper());
    }

    #[test]
    fn wider_at_two_sigma() {
        let f = |x: ArrayView1<f64>| (x[0] / 0.5).powi(2) + x[1] * x[1];
        let set = ParameterSet::from_values(&["x", "y"], &[0.4, 0.4], &[0.1, 0.1]).unwrap();
        let fm = fit(&f, &set, 1.0);
        let me = Minos::default().errors(&f, &fm, 0, 2.0, None).unwrap();
        assert!(me.is_valid());
        assert!(approx_eq!(f64, me.upper(), 1.0, epsilon = 0.02));
        assert!(approx_eq!(f64, me.lower(), -1.0, epsilon = 0.02));
    }

    #[test]
    fn stops_at_parameter_limit() {
        let f = |x: ArrayView1<f64>| ((x[0] - 0.2) / 0.1).powi(2) + (x[1] - 1.0).powi(2);
        let mut set = ParameterSet::new();
        set.add_limited("x", 0.15, 0.01, Some(0.0), Some(0.25)).unwrap();
        set.add("y", 0.0, 0.1).unwrap();
        let fm = fit(&f, &set, 1.0);
        assert!(fm.is_valid());

        let me = Minos::default().errors(&f, &fm, 0, 1.0, None).unwrap();
        assert!(me.upper.at_limit);
        assert!(!me.upper.is_valid);
        assert!(!me.is_valid());
        assert!(approx_eq!(f64, me.upper(), 0.25 - me.min, epsilon = 1e-9));
        assert!(me.lower.is_valid);
        assert!(approx_eq!(f64, me.lower(), -0.1, epsilon = 0.005));
    }

    #[test]
    fn call_limit_per_side() {
        let f = |x: ArrayView1<f64>| (x[0].exp() - 1.0).powi(2) + (x[1] - x[0]).powi(2);
        let set = ParameterSet::from_values(&["x", "y"], &[0.3, 0.3], &[0.1, 0.1]).unwrap();
        let fm = fit(&f, &set, 0.5);
        let side = Minos::default().lower(&f, &fm, 0, 1.0, Some(5)).unwrap();
        assert!(side.at_max_fcn);
        assert!(!side.is_valid);
        assert!(side.error < 0.0);
    }

    #[test]
    fn rejects_fixed_and_unknown_parameters() {
        let f = |x: ArrayView1<f64>| x[0] * x[0] + x[1] * x[1];
        let mut set = ParameterSet::from_values(&["x", "y"], &[0.3, 0.3], &[0.1, 0.1]).unwrap();
        set.fix(1usize).unwrap();
        let fm = fit(&f, &set, 1.0);
        let minos = Minos::default();
        assert!(matches!(
            minos.errors(&f, &fm, 1, 1.0, None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            minos.errors(&f, &fm, 7, 1.0, None),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(minos.errors(&f, &fm, 0, -1.0, None).is_err());
    }

    #[test]
    fn invalid_minimum_is_rejected() {
        let f = |x: ArrayView1<f64>| x[0] * x[0] + x[1] * x[1];
        let set = ParameterSet::from_values(&["x", "y"], &[3.0, 3.0], &[0.1, 0.1]).unwrap();
        let trafo = Transformation::new(&set, MachinePrecision::computed());
        let wrapped = WrappedFcn::new(&f, &trafo, 1.0);
        let fm = Migrad::default().minimize(&wrapped, 1);
        assert!(!fm.is_valid());
        assert_eq!(
            Minos::default().errors(&f, &fm, 0, 1.0, None),
            Err(Error::InvalidMinimum)
        );
    }

    #[test]
    fn profile_of_correlated_quadratic() {
        // profile in a is (a - 1)² · 7/4 for A = [[2, 1], [1, 4]]
        let f = |x: ArrayView1<f64>| {
            let (a, b) = (x[0] - 1.0, x[1] + 2.0);
            2.0 * a * a + 2.0 * a * b + 4.0 * b * b
        };
        let set = ParameterSet::from_values(&["a", "b"], &[0.0, 0.0], &[0.1, 0.1]).unwrap();
        let fm = fit(&f, &set, 1.0);
        let points = profile(&f, &fm, 0, &[0.0, 1.0, 2.5], &Migrad::default(), None).unwrap();
        assert_eq!(points.len(), 3);
        for p in &points {
            assert!(p.is_valid);
            let expected = 1.75 * (p.value - 1.0).powi(2);
            assert!(approx_eq!(f64, p.fval, expected, epsilon = 1e-3));
        }
    }

    #[test]
    fn builder_validation() {
        assert!(MinosBuilder::default().tolerance(0.0).build().is_err());
        let m = MinosBuilder::default().strategy(Strategy::high()).build().unwrap();
        assert_eq!(m.tolerance, 0.1);
    }
}
