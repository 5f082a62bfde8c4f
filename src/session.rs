//! A fitting session: one objective, its parameters and the latest minimum.
//!
//! [`Minuit`] owns the parameter set and drives the minimizers over it.
//! Every minimization starts from the current parameter values and writes
//! its result back, so repeated calls resume where the previous one ended.
//! Editing a parameter marks the stored minimum as stale; HESSE then works
//! at the edited point and MINOS refuses to run until the next fit.
//!
//! # Examples
//!
//! ```
//! # extern crate ndarray;
//! # extern crate minuit;
//! # use ndarray::prelude::*;
//! # use minuit::{Minuit, ParameterSet};
//!
//! let f = |x: ArrayView1<f64>| (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2);
//! let params = ParameterSet::from_values(&["a", "b"], &[0.0, 0.0], &[0.1, 0.1]).unwrap();
//! let mut m = Minuit::new(f, params).unwrap();
//! assert!(m.migrad(None).unwrap().is_valid());
//! m.hesse(None).unwrap();
//! let me = m.minos("b", 1.0).unwrap();
//! println!("b = {} {:+} {:+}", m.values()[1], me.lower(), me.upper());
//! ```

use crate::errors::{Error, Result};
use crate::fcn::{Fcn, WrappedFcn};
use crate::gradient::{calculator_for, initial_gradient};
use crate::hesse::Hesse;
use crate::minimum::{default_max_fcn, edm_goal, FunctionMinimum, Minimizer};
use crate::minos::{profile, Minos, MinosError, ProfilePoint};
use crate::parameter::{Limits, ParameterKey, ParameterSet};
use crate::precision::MachinePrecision;
use crate::state::{estimate_edm, MinimumError, MinimumParameters, MinimumState};
use crate::strategy::Strategy;
use crate::transform::Transformation;
use crate::vector::{Migrad, Simplex};
use ndarray::prelude::*;
use std::collections::BTreeMap;

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
/// Settings of a fitting session.
pub struct MinuitConfig {
    /// Rise of the objective that corresponds to one standard deviation,
    /// see [`LEAST_SQUARES`](crate::LEAST_SQUARES) and
    /// [`LIKELIHOOD`](crate::LIKELIHOOD).
    #[builder(default = "1.0")]
    pub errordef: f64,

    /// Convergence tolerance; minimization stops at `edm < 0.002 · tol · errordef`.
    #[builder(default = "0.1")]
    pub tol: f64,

    /// Call limit. `None` means `200 + 100n + 5n²` for `n` free parameters.
    #[builder(default = "None", setter(strip_option))]
    pub ncall: Option<usize>,

    /// Strategy level 0, 1 or 2.
    #[builder(default = "1")]
    pub strategy: u32,

    /// Relative precision of the objective. `None` measures the `f64` precision.
    #[builder(default = "None", setter(strip_option))]
    pub precision: Option<f64>,

    /// How often MIGRAD restarts from its last state while the result is invalid.
    #[builder(default = "5")]
    pub migrad_iterate: usize,
}

impl Default for MinuitConfig {
    fn default() -> Self {
        MinuitConfig {
            errordef: 1.0,
            tol: 0.1,
            ncall: None,
            strategy: 1,
            precision: None,
            migrad_iterate: 5,
        }
    }
}

impl MinuitConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let d = MinuitConfig::default();
        MinuitConfig {
            errordef: self.errordef.unwrap_or(d.errordef),
            tol: self.tol.unwrap_or(d.tol),
            ncall: self.ncall.unwrap_or(d.ncall),
            strategy: self.strategy.unwrap_or(d.strategy),
            precision: self.precision.unwrap_or(d.precision),
            migrad_iterate: self.migrad_iterate.unwrap_or(d.migrad_iterate),
        }
        .check()
    }
}

impl MinuitConfig {
    fn check(&self) -> std::result::Result<(), String> {
        if !(self.errordef.is_finite() && self.errordef > 0.0) {
            return Err(format!("errordef must be positive, got {}", self.errordef));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(format!("tol must be non-negative, got {}", self.tol));
        }
        if self.ncall == Some(0) {
            return Err("ncall must be at least 1".to_string());
        }
        if self.strategy > 2 {
            return Err(format!("strategy must be 0, 1 or 2, got {}", self.strategy));
        }
        if let Some(eps) = self.precision {
            if !(eps.is_finite() && eps > 0.0 && eps < 1.0) {
                return Err(format!("precision must be in (0, 1), got {}", eps));
            }
        }
        if self.migrad_iterate == 0 {
            return Err("migrad_iterate must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Covariance matrix of all parameters in external coordinates.
///
/// Rows and columns of fixed parameters are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    names: Vec<String>,
    fixed: Vec<bool>,
    matrix: Array2<f64>,
    accurate: bool,
    pos_def: bool,
    made_pos_def: bool,
}

impl Covariance {
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[[i, j]]
    }

    /// Element addressed by parameter names.
    pub fn get_by_name(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.matrix[[i, j]])
    }

    /// Correlation coefficients, zero for fixed parameters.
    pub fn correlation(&self) -> Array2<f64> {
        let d = self.matrix.diag().mapv(f64::sqrt);
        Array2::from_shape_fn(self.matrix.dim(), |(i, j)| {
            if d[i] > 0.0 && d[j] > 0.0 {
                self.matrix[[i, j]] / (d[i] * d[j])
            } else {
                0.0
            }
        })
    }

    /// Submatrix of the free parameters.
    pub fn free(&self) -> Array2<f64> {
        let idx: Vec<usize> = (0..self.names.len()).filter(|&i| !self.fixed[i]).collect();
        Array2::from_shape_fn((idx.len(), idx.len()), |(i, j)| self.matrix[[idx[i], idx[j]]])
    }

    /// Positive definite and from a converged update series or HESSE.
    pub fn is_accurate(&self) -> bool {
        self.accurate
    }

    pub fn is_pos_def(&self) -> bool {
        self.pos_def
    }

    pub fn is_made_pos_def(&self) -> bool {
        self.made_pos_def
    }
}

/// Fitting session over an objective `F`.
pub struct Minuit<F> {
    fcn: F,
    params: ParameterSet,
    init: ParameterSet,
    config: MinuitConfig,
    strategy: Strategy,
    precision: MachinePrecision,
    fmin: Option<FunctionMinimum>,
    stale: bool,
    merrors: BTreeMap<usize, MinosError>,
}

impl<F: Fcn> Minuit<F> {
    /// Session with default settings.
    pub fn new(fcn: F, params: ParameterSet) -> Result<Self> {
        Self::with_config(fcn, params, MinuitConfig::default())
    }

    pub fn with_config(fcn: F, params: ParameterSet, config: MinuitConfig) -> Result<Self> {
        config.check().map_err(Error::InvalidConfig)?;
        let strategy = Strategy::level(config.strategy)?;
        let precision = match config.precision {
            Some(eps) => MachinePrecision::with_eps(eps)?,
            None => MachinePrecision::computed(),
        };
        Ok(Minuit {
            fcn,
            init: params.clone(),
            params,
            config,
            strategy,
            precision,
            fmin: None,
            stale: false,
            merrors: BTreeMap::new(),
        })
    }

    pub fn fcn(&self) -> &F {
        &self.fcn
    }

    pub fn config(&self) -> &MinuitConfig {
        &self.config
    }

    /// Replaces all settings at once.
    pub fn set_config(&mut self, config: MinuitConfig) -> Result<()> {
        config.check().map_err(Error::InvalidConfig)?;
        // custom strategy settings survive until the level itself changes
        let strategy = if config.strategy != self.config.strategy {
            Strategy::level(config.strategy)?
        } else {
            self.strategy
        };
        let precision = match config.precision {
            Some(eps) => MachinePrecision::with_eps(eps)?,
            None => MachinePrecision::computed(),
        };
        if config.errordef != self.config.errordef || config.precision != self.config.precision {
            self.invalidate();
        }
        self.config = config;
        self.strategy = strategy;
        self.precision = precision;
        Ok(())
    }

    pub fn set_errordef(&mut self, errordef: f64) -> Result<()> {
        self.set_config(MinuitConfig {
            errordef,
            ..self.config
        })
    }

    pub fn set_tol(&mut self, tol: f64) -> Result<()> {
        self.set_config(MinuitConfig { tol, ..self.config })
    }

    pub fn set_strategy(&mut self, strategy: u32) -> Result<()> {
        self.set_config(MinuitConfig {
            strategy,
            ..self.config
        })
    }

    pub fn set_ncall(&mut self, ncall: Option<usize>) -> Result<()> {
        self.set_config(MinuitConfig { ncall, ..self.config })
    }

    pub fn set_precision(&mut self, precision: Option<f64>) -> Result<()> {
        self.set_config(MinuitConfig {
            precision,
            ..self.config
        })
    }

    /// Overrides the derivative settings of the current strategy level. They
    /// are kept until [`set_strategy`](Self::set_strategy) picks another level.
    pub fn set_strategy_settings(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    // parameter editing

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn fix<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        self.params.fix(key)?;
        self.invalidate();
        Ok(())
    }

    pub fn release<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        self.params.release(key)?;
        self.invalidate();
        Ok(())
    }

    /// Sets a value and fixes the parameter there.
    pub fn fixto<K: ParameterKey>(&mut self, key: K, value: f64) -> Result<()> {
        let i = self.params.index_of(key)?;
        self.params.set_value(i, value)?;
        self.params.fix(i)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_value<K: ParameterKey>(&mut self, key: K, value: f64) -> Result<()> {
        self.params.set_value(key, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_error<K: ParameterKey>(&mut self, key: K, error: f64) -> Result<()> {
        self.params.set_error(key, error)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_limits<K: ParameterKey>(
        &mut self,
        key: K,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<()> {
        self.params.set_limits(key, lower, upper)?;
        self.invalidate();
        Ok(())
    }

    pub fn remove_limits<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        self.params.remove_limits(key)?;
        self.invalidate();
        Ok(())
    }

    /// Restores the parameters the session was created with and forgets
    /// the minimum.
    pub fn reset(&mut self) {
        self.params = self.init.clone();
        self.fmin = None;
        self.stale = false;
        self.merrors.clear();
    }

    fn invalidate(&mut self) {
        if self.fmin.is_some() {
            self.stale = true;
        }
        self.merrors.clear();
    }

    // minimization

    /// Runs MIGRAD from the current values.
    ///
    /// While the result is invalid and calls remain, MIGRAD is restarted
    /// from its last state up to `migrad_iterate` times in total.
    pub fn migrad(&mut self, ncall: Option<usize>) -> Result<&FunctionMinimum> {
        let max_fcn = self.max_fcn(ncall)?;
        let (fm, _) = self.run_migrad(max_fcn);
        Ok(self.store(fm))
    }

    /// Runs the simplex minimizer from the current values. The result has
    /// no covariance until HESSE is run.
    pub fn simplex(&mut self, ncall: Option<usize>) -> Result<&FunctionMinimum> {
        let max_fcn = self.max_fcn(ncall)?;
        let simplex = Simplex {
            tolerance: self.config.tol,
            ..Simplex::default()
        };
        let fm = self.run(&simplex, max_fcn);
        Ok(self.store(fm))
    }

    /// MIGRAD, and if that fails, SIMPLEX from the same start followed by
    /// MIGRAD from the simplex result.
    pub fn minimize(&mut self, ncall: Option<usize>) -> Result<&FunctionMinimum> {
        let max_fcn = self.max_fcn(ncall)?;
        let start = self.params.clone();
        let (mut fm, mut used) = self.run_migrad(max_fcn);
        if !fm.is_valid() && used < max_fcn {
            log::info!("minimize: migrad failed, falling back to simplex");
            self.params = start;
            let simplex = Simplex {
                tolerance: self.config.tol,
                ..Simplex::default()
            };
            fm = self.run(&simplex, max_fcn - used);
            used += fm.nfcn();
            if used < max_fcn && !fm.is_aborted() {
                let (again, _) = self.run_migrad(max_fcn - used);
                fm = again;
            }
        }
        Ok(self.store(fm))
    }

    /// Computes the error matrix with a full numerical Hessian.
    ///
    /// With a current minimum the matrix is recomputed at its point, so
    /// repeated calls give identical results. After parameter edits, or
    /// before any fit, it is computed at the current values.
    pub fn hesse(&mut self, ncall: Option<usize>) -> Result<&FunctionMinimum> {
        if self.params.nfree() == 0 {
            return Err(Error::NoFreeParameters);
        }
        let hesse = Hesse {
            strategy: self.strategy,
        };
        let fm = match (&self.fmin, self.stale) {
            (Some(fm), false) => {
                let trafo = fm.trafo().clone();
                let wrapped = WrappedFcn::new(&self.fcn, &trafo, fm.errordef());
                hesse.update(&wrapped, fm, ncall)
            }
            _ => self.hesse_at_values(&hesse, ncall),
        };
        if fm.hesse_failed() {
            log::warn!("hesse: failed, errors are not reliable");
        }
        self.params.assign_errors(fm.user_errors().view());
        Ok(self.store(fm))
    }

    fn hesse_at_values(&self, hesse: &Hesse, ncall: Option<usize>) -> FunctionMinimum {
        let trafo = Transformation::new(&self.params, self.precision);
        let errordef = self.config.errordef;
        let wrapped = WrappedFcn::new(&self.fcn, &trafo, errordef);
        let n = trafo.n_internal();
        let max_fcn = ncall
            .or(self.config.ncall)
            .unwrap_or_else(|| default_max_fcn(n));

        let x = trafo.initial_internal();
        let fval = wrapped.call(x.view());
        let params = MinimumParameters::new(x, fval);
        let gradient = calculator_for(&wrapped, self.strategy).gradient(
            &wrapped,
            &params,
            &initial_gradient(&wrapped, &params),
        );
        let error = MinimumError::not_computed(n);
        let edm = estimate_edm(&gradient, &error);
        let base = MinimumState::new(params, error, gradient, edm, wrapped.num_calls());

        let state = hesse.compute(&wrapped, &base, max_fcn);
        let state = state.with_nfcn(wrapped.num_calls());
        let goal = edm_goal(self.config.tol, errordef, &self.precision);
        FunctionMinimum::new(trafo.clone(), base.clone(), vec![base], errordef, goal)
            .with_hesse(state, wrapped.is_stopped())
    }

    /// MINOS error of one parameter at `cl` standard deviations.
    ///
    /// Needs a valid, current minimum. HESSE is run first if the minimum
    /// has no error matrix. Results are cached until the minimum changes.
    pub fn minos<K: ParameterKey>(&mut self, key: K, cl: f64) -> Result<MinosError> {
        self.minos_with_ncall(key, cl, None)
    }

    /// [`minos`](Self::minos) with a call limit for each side.
    pub fn minos_with_ncall<K: ParameterKey>(
        &mut self,
        key: K,
        cl: f64,
        ncall: Option<usize>,
    ) -> Result<MinosError> {
        let par = self.params.index_of(key)?;
        let needs_hesse = match (&self.fmin, self.stale) {
            (Some(fm), false) if fm.is_valid() => !fm.has_covariance(),
            (Some(_), false) => return Err(Error::InvalidMinimum),
            _ => return Err(Error::NoMinimum),
        };
        if needs_hesse {
            self.hesse(None)?;
        }
        if let Some(me) = self.merrors.get(&par) {
            if me.cl == cl {
                return Ok(me.clone());
            }
        }
        let fm = match &self.fmin {
            Some(fm) => fm,
            None => return Err(Error::NoMinimum),
        };
        let minos = Minos {
            strategy: self.strategy,
            tolerance: self.config.tol,
        };
        let me = minos.errors(&self.fcn, fm, par, cl, ncall)?;
        self.merrors.insert(par, me.clone());
        Ok(me)
    }

    /// MINOS errors of all free parameters.
    pub fn minos_all(&mut self, cl: f64) -> Result<Vec<MinosError>> {
        let free: Vec<usize> = (0..self.params.len())
            .filter(|&i| !self.params[i].is_fixed())
            .collect();
        free.into_iter().map(|i| self.minos(i, cl)).collect()
    }

    /// Profile of the objective along one parameter over `size` points.
    ///
    /// The range defaults to two errors around the minimum, clipped to the
    /// parameter limits.
    pub fn profile<K: ParameterKey>(
        &self,
        key: K,
        size: usize,
        bound: Option<(f64, f64)>,
    ) -> Result<Vec<ProfilePoint>> {
        let par = self.params.index_of(key)?;
        let fm = match (&self.fmin, self.stale) {
            (Some(fm), false) => fm,
            _ => return Err(Error::NoMinimum),
        };
        if size < 2 {
            return Err(Error::InvalidConfig(format!(
                "profile needs at least 2 points, got {}",
                size
            )));
        }
        let p = &self.params[par];
        let (lo, hi) = match bound {
            Some((lo, hi)) if lo.is_finite() && hi.is_finite() && lo < hi => (lo, hi),
            Some((lo, hi)) => {
                return Err(Error::InvalidConfig(format!(
                    "profile bound ({}, {}) is not an interval",
                    lo, hi
                )))
            }
            None => (
                p.limits().clamp(p.value() - 2.0 * p.error()),
                p.limits().clamp(p.value() + 2.0 * p.error()),
            ),
        };
        let values: Vec<f64> = Array1::linspace(lo, hi, size).to_vec();
        let migrad = Migrad {
            strategy: self.strategy,
            tolerance: self.config.tol,
            ..Migrad::default()
        };
        profile(&self.fcn, fm, par, &values, &migrad, self.config.ncall)
    }

    fn max_fcn(&self, ncall: Option<usize>) -> Result<usize> {
        let n = self.params.nfree();
        if n == 0 {
            return Err(Error::NoFreeParameters);
        }
        match ncall.or(self.config.ncall) {
            Some(0) => Err(Error::InvalidConfig("ncall must be at least 1".to_string())),
            Some(ncall) => Ok(ncall),
            None => Ok(default_max_fcn(n)),
        }
    }

    /// Runs a minimizer from the current values and writes the result back.
    fn run(&mut self, minimizer: &dyn Minimizer, max_fcn: usize) -> FunctionMinimum {
        let trafo = Transformation::new(&self.params, self.precision);
        let fm = {
            let wrapped = WrappedFcn::new(&self.fcn, &trafo, self.config.errordef);
            minimizer.minimize(&wrapped, max_fcn)
        };
        self.params.assign_values(fm.user_values().view());
        self.params.assign_errors(fm.user_errors().view());
        log::info!(
            "fval = {}, edm = {:e}, nfcn = {}, valid = {}",
            fm.fval(),
            fm.edm(),
            fm.nfcn(),
            fm.is_valid()
        );
        fm
    }

    fn run_migrad(&mut self, max_fcn: usize) -> (FunctionMinimum, usize) {
        let migrad = Migrad {
            strategy: self.strategy,
            tolerance: self.config.tol,
            ..Migrad::default()
        };
        let mut fm = self.run(&migrad, max_fcn);
        let mut used = fm.nfcn();
        for _ in 1..self.config.migrad_iterate {
            if fm.is_valid() || fm.has_reached_call_limit() || fm.is_aborted() || used >= max_fcn {
                break;
            }
            log::info!("migrad: minimum not valid, iterating from the last state");
            fm = self.run(&migrad, max_fcn - used);
            used += fm.nfcn();
        }
        (fm, used)
    }

    fn store(&mut self, fm: FunctionMinimum) -> &FunctionMinimum {
        self.stale = false;
        self.merrors.clear();
        self.fmin.insert(fm)
    }

    // results

    /// Latest minimum, possibly stale after parameter edits.
    pub fn fmin(&self) -> Option<&FunctionMinimum> {
        self.fmin.as_ref()
    }

    /// Whether the latest minimum still matches the parameters.
    pub fn is_current(&self) -> bool {
        self.fmin.is_some() && !self.stale
    }

    pub fn is_valid(&self) -> bool {
        self.fmin.as_ref().map_or(false, |fm| fm.is_valid())
    }

    pub fn fval(&self) -> Option<f64> {
        self.fmin.as_ref().map(|fm| fm.fval())
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.names()
    }

    pub fn values(&self) -> Array1<f64> {
        self.params.values()
    }

    /// Parabolic errors after a fit, step sizes before.
    pub fn errors(&self) -> Array1<f64> {
        self.params.errors()
    }

    pub fn fixed(&self) -> Vec<bool> {
        self.params.iter().map(|p| p.is_fixed()).collect()
    }

    pub fn limits(&self) -> Vec<Limits> {
        self.params.iter().map(|p| p.limits()).collect()
    }

    pub fn at_limit(&self) -> Vec<bool> {
        self.params.iter().map(|p| p.at_limit()).collect()
    }

    /// Covariance of the latest minimum, if it has an error matrix.
    pub fn covariance(&self) -> Option<Covariance> {
        let fm = self.fmin.as_ref()?;
        let matrix = fm.user_covariance()?;
        let params = fm.trafo().parameters();
        Some(Covariance {
            names: params.names().iter().map(|s| s.to_string()).collect(),
            fixed: params.iter().map(|p| p.is_fixed()).collect(),
            matrix,
            accurate: fm.has_accurate_covar(),
            pos_def: fm.has_posdef_covar(),
            made_pos_def: fm.has_made_posdef_covar(),
        })
    }

    /// Cached MINOS results of the current minimum.
    pub fn merrors(&self) -> Vec<&MinosError> {
        self.merrors.values().collect()
    }

    pub fn merror<K: ParameterKey>(&self, key: K) -> Option<&MinosError> {
        let i = self.params.index_of(key).ok()?;
        self.merrors.get(&i)
    }

    /// Number of free parameters.
    pub fn nfit(&self) -> usize {
        self.params.nfree()
    }

    /// Degrees of freedom, when the objective reports its data count.
    pub fn ndof(&self) -> Option<usize> {
        self.fcn.ndata()?.checked_sub(self.nfit())
    }

    /// `fval / ndof` for least-squares objectives, NaN otherwise.
    pub fn reduced_chi2(&self) -> f64 {
        if self.config.errordef != crate::LEAST_SQUARES {
            return f64::NAN;
        }
        match (self.fval(), self.ndof()) {
            (Some(fval), Some(ndof)) if ndof > 0 => fval / ndof as f64,
            _ => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcn::{with_gradient, with_ndata, StopRequest};
    use crate::strategy::StrategyBuilder;
    use crate::{LEAST_SQUARES, LIKELIHOOD};
    use float_cmp::approx_eq;
    use std::cell::Cell;

    fn quadratic(x: ArrayView1<f64>) -> f64 {
        // A = [[2, 1], [1, 4]] around (1, -2)
        let (a, b) = (x[0] - 1.0, x[1] + 2.0);
        2.0 * a * a + 2.0 * a * b + 4.0 * b * b
    }

    fn two(a: f64, b: f64) -> ParameterSet {
        ParameterSet::from_values(&["a", "b"], &[a, b], &[0.1, 0.1]).unwrap()
    }

    #[test]
    fn quadratic_converges_with_inverse_covariance() {
        let mut m = Minuit::new(quadratic, two(5.0, 5.0)).unwrap();
        m.set_tol(1e-4).unwrap();
        let fm = m.migrad(None).unwrap();
        assert!(fm.is_valid());
        let v = m.values();
        assert!(approx_eq!(f64, v[0], 1.0, epsilon = 1e-4));
        assert!(approx_eq!(f64, v[1], -2.0, epsilon = 1e-4));

        m.hesse(None).unwrap();
        let cov = m.covariance().unwrap();
        assert!(cov.is_accurate() && cov.is_pos_def());
        // errordef · A⁻¹ = [[4, -1], [-1, 2]] / 7
        assert!(approx_eq!(f64, cov.get(0, 0), 4.0 / 7.0, epsilon = 1e-5));
        assert!(approx_eq!(f64, cov.get(0, 1), -1.0 / 7.0, epsilon = 1e-5));
        assert!(approx_eq!(f64, cov.get(1, 1), 2.0 / 7.0, epsilon = 1e-5));
        assert_eq!(cov.get_by_name("b", "a"), Some(cov.get(1, 0)));
        let corr = cov.correlation();
        assert!(approx_eq!(f64, corr[[0, 0]], 1.0, epsilon = 1e-12));
        assert!(approx_eq!(f64, corr[[0, 1]], -1.0 / 8.0f64.sqrt(), epsilon = 1e-4));
        assert!(approx_eq!(f64, m.errors()[0], (4.0f64 / 7.0).sqrt(), epsilon = 1e-5));
    }

    #[test]
    fn covariance_scales_with_errordef() {
        let mut m = Minuit::new(quadratic, two(0.0, 0.0)).unwrap();
        m.set_errordef(LIKELIHOOD).unwrap();
        m.migrad(None).unwrap();
        m.hesse(None).unwrap();
        let cov = m.covariance().unwrap();
        assert!(approx_eq!(f64, cov.get(0, 0), 2.0 / 7.0, epsilon = 1e-5));
        assert!(m.reduced_chi2().is_nan());
    }

    #[test]
    fn bounds_are_respected() {
        let f = |x: ArrayView1<f64>| (x[0] - 2.0).powi(2) + (x[1] - 0.5).powi(2);
        let mut params = ParameterSet::new();
        params.add_limited("x", 0.5, 0.1, Some(0.0), Some(1.0)).unwrap();
        params.add_limited("y", 3.0, 0.1, Some(0.0), None).unwrap();
        let mut m = Minuit::new(f, params).unwrap();
        m.set_tol(1e-6).unwrap();
        let fm = m.migrad(None).unwrap();
        assert!(fm.has_parameters_at_limit());
        let v = m.values();
        assert!(v[0] <= 1.0 && v[0] > 0.999);
        assert!(approx_eq!(f64, v[1], 0.5, epsilon = 1e-4));
        assert_eq!(m.at_limit(), vec![true, false]);
        assert_eq!(m.limits()[0], Limits::Both(0.0, 1.0));
    }

    #[test]
    fn hesse_is_idempotent() {
        let f = |x: ArrayView1<f64>| (x[0] - 1.0).powi(4) + (x[0] - x[1]).powi(2) + x[1].exp();
        let mut m = Minuit::new(f, two(0.0, 0.0)).unwrap();
        m.migrad(None).unwrap();
        let first = m.hesse(None).unwrap().user_covariance().unwrap();
        let nfcn = m.fmin().unwrap().nfcn();
        let second = m.hesse(None).unwrap().user_covariance().unwrap();
        assert_eq!(first, second);
        assert_eq!(m.fmin().unwrap().nfcn(), nfcn);
        assert!(m.fmin().unwrap().state().error().is_from_hesse());
    }

    #[test]
    fn hesse_before_any_fit() {
        let mut m = Minuit::new(quadratic, two(1.0, -2.0)).unwrap();
        let fm = m.hesse(None).unwrap();
        assert!(fm.has_covariance());
        assert!(approx_eq!(f64, m.errors()[1], (2.0f64 / 7.0).sqrt(), epsilon = 1e-5));
    }

    #[test]
    fn minos_matches_parabolic_errors_for_diagonal_quadratic() {
        // A = diag(4, 0.25)
        let f = |x: ArrayView1<f64>| 4.0 * (x[0] - 1.0).powi(2) + 0.25 * (x[1] - 3.0).powi(2);
        let mut m = Minuit::new(f, two(0.0, 0.0)).unwrap();
        m.migrad(None).unwrap();
        for (key, a) in [("a", 4.0f64), ("b", 0.25)].iter() {
            let me = m.minos(*key, 1.0).unwrap();
            let expected = (LEAST_SQUARES / a).sqrt();
            assert!(me.is_valid());
            assert!(approx_eq!(f64, me.upper(), expected, epsilon = 0.01 * expected));
            assert!(approx_eq!(f64, me.lower(), -expected, epsilon = 0.01 * expected));
        }
        assert_eq!(m.merrors().len(), 2);
        assert!(m.merror("a").is_some());

        // cache is dropped with the minimum
        m.set_value("a", 0.5).unwrap();
        assert!(m.merrors().is_empty());
        assert_eq!(m.minos("a", 1.0), Err(Error::NoMinimum));
    }

    #[test]
    fn minos_needs_valid_minimum() {
        let mut m = Minuit::new(quadratic, two(5.0, 5.0)).unwrap();
        assert_eq!(m.minos("a", 1.0), Err(Error::NoMinimum));
        m.migrad(Some(1)).unwrap();
        assert_eq!(m.minos("a", 1.0), Err(Error::InvalidMinimum));
    }

    #[test]
    fn minos_at_limit() {
        let f = |x: ArrayView1<f64>| ((x[0] - 0.2) / 0.1).powi(2) + x[1] * x[1];
        let mut params = two(0.1, 1.0);
        params.set_limits(0usize, Some(0.0), Some(0.25)).unwrap();
        let mut m = Minuit::new(f, params).unwrap();
        assert!(m.migrad(None).unwrap().is_valid());
        let me = m.minos(0usize, 1.0).unwrap();
        assert!(me.upper.at_limit);
        assert!(!me.lower.at_limit);
        assert!(approx_eq!(f64, me.min + me.upper(), 0.25, epsilon = 1e-9));
    }

    #[test]
    fn line_fit_scenario() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        // y = 1 + 2x plus fixed offsets, unit errors
        let ys = [1.3, 2.5, 5.2, 7.4, 8.6];
        let chi2 = move |p: ArrayView1<f64>| {
            xs.iter()
                .zip(ys.iter())
                .map(|(x, y)| (y - p[0] - p[1] * x).powi(2))
                .sum::<f64>()
        };
        let mut m = Minuit::new(with_ndata(chi2, 5), two(0.0, 0.0)).unwrap();
        let fm = m.migrad(None).unwrap();
        assert!(fm.is_valid());
        assert!(fm.edm() < 1e-4);
        let (v, e) = (m.values(), m.errors());
        assert!((v[0] - 1.0).abs() < 3.0 * e[0]);
        assert!((v[1] - 2.0).abs() < 3.0 * e[1]);
        // least-squares solution a = 1.1, b = 1.95
        assert!(approx_eq!(f64, v[0], 1.1, epsilon = 1e-3));
        assert!(approx_eq!(f64, v[1], 1.95, epsilon = 1e-3));
        m.hesse(None).unwrap();
        assert!(approx_eq!(f64, m.errors()[1], 0.1f64.sqrt(), epsilon = 1e-4));
        assert_eq!(m.nfit(), 2);
        assert_eq!(m.ndof(), Some(3));
        assert!(approx_eq!(f64, m.reduced_chi2(), 0.675 / 3.0, epsilon = 1e-4));
    }

    #[test]
    fn call_limit_keeps_start_point() {
        let mut m = Minuit::new(quadratic, two(5.0, 5.0)).unwrap();
        let fm = m.migrad(Some(1)).unwrap();
        assert!(fm.has_reached_call_limit());
        assert!(!fm.is_valid());
        assert_eq!(fm.user_values(), arr1(&[5.0, 5.0]));
        assert_eq!(m.values(), arr1(&[5.0, 5.0]));
    }

    #[test]
    fn hesse_keeps_call_limit_flag() {
        let mut m = Minuit::new(quadratic, two(1.3, -2.2)).unwrap();
        assert!(m.migrad(Some(10)).unwrap().has_reached_call_limit());
        let fm = m.hesse(None).unwrap();
        assert!(fm.has_covariance());
        assert!(fm.has_reached_call_limit());
        assert!(!fm.is_valid());
        assert!(matches!(m.minos("a", 1.0), Err(Error::InvalidMinimum)));
    }

    #[test]
    fn strategy_settings_survive_other_setters() {
        let mut m = Minuit::new(quadratic, two(0.0, 0.0)).unwrap();
        let custom = StrategyBuilder::default().grad_ncycles(9).build().unwrap();
        m.set_strategy_settings(custom);
        m.set_tol(0.01).unwrap();
        m.set_errordef(0.5).unwrap();
        m.set_ncall(Some(1000)).unwrap();
        m.set_precision(Some(1e-12)).unwrap();
        m.set_strategy(1).unwrap();
        assert_eq!(m.strategy().grad_ncycles, 9);
        m.set_strategy(0).unwrap();
        assert_eq!(m.strategy(), &Strategy::low());
    }

    struct StopAfter {
        calls: Cell<usize>,
        limit: usize,
    }

    impl Fcn for StopAfter {
        fn value(&self, x: ArrayView1<f64>) -> std::result::Result<f64, StopRequest> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() > self.limit {
                return Err(StopRequest("enough".into()));
            }
            Ok(quadratic(x))
        }
    }

    #[test]
    fn stop_request_aborts() {
        let fcn = StopAfter {
            calls: Cell::new(0),
            limit: 20,
        };
        let mut m = Minuit::new(fcn, two(5.0, 5.0)).unwrap();
        let fm = m.migrad(None).unwrap();
        assert!(fm.is_aborted());
        assert!(!fm.is_valid());
        // no restart after an abort
        assert_eq!(m.fcn().calls.get(), 21);
    }

    #[test]
    fn simplex_then_hesse() {
        let mut m = Minuit::new(quadratic, two(3.0, 3.0)).unwrap();
        m.set_tol(1e-3).unwrap();
        let fm = m.simplex(None).unwrap();
        assert!(fm.is_valid());
        assert!(!fm.has_covariance());
        assert!(m.covariance().is_none());
        let v = m.values();
        assert!(approx_eq!(f64, v[0], 1.0, epsilon = 1e-2));
        assert!(approx_eq!(f64, v[1], -2.0, epsilon = 1e-2));
        assert!(m.hesse(None).unwrap().has_covariance());
        assert!(m.covariance().is_some());
    }

    #[test]
    fn minimize_falls_back_to_simplex() {
        // not finite left of zero, where the start point sits
        let f = |x: ArrayView1<f64>| {
            if x[0] < 0.0 {
                f64::NAN
            } else {
                (x[0] - 2.0).powi(2) + (x[1] - 1.0).powi(2)
            }
        };
        let mut m = Minuit::new(f, two(-0.05, 0.0)).unwrap();
        let fm = m.minimize(None).unwrap();
        assert!(fm.is_valid());
        assert!(approx_eq!(f64, m.values()[0], 2.0, epsilon = 1e-3));
    }

    #[test]
    fn analytic_gradient() {
        let f = |x: ArrayView1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let g = |x: ArrayView1<f64>| {
            arr1(&[
                -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0] * x[0]),
                200.0 * (x[1] - x[0] * x[0]),
            ])
        };
        let mut m = Minuit::new(with_gradient(f, g), two(-1.2, 1.0)).unwrap();
        m.set_tol(1e-4).unwrap();
        let fm = m.migrad(None).unwrap();
        assert!(fm.is_valid());
        assert!(fm.ngrad() > 0);
        assert!(approx_eq!(f64, m.values()[0], 1.0, epsilon = 5e-3));
        assert!(approx_eq!(f64, m.values()[1], 1.0, epsilon = 1e-2));
    }

    #[test]
    fn profile_scan() {
        let mut m = Minuit::new(quadratic, two(0.0, 0.0)).unwrap();
        m.migrad(None).unwrap();
        let points = m.profile("a", 5, None).unwrap();
        assert_eq!(points.len(), 5);
        let err = m.errors()[0];
        assert!(approx_eq!(f64, points[0].value, m.values()[0] - 2.0 * err, epsilon = 1e-12));
        // two errors away the profile has risen by 4 errordef
        assert!(approx_eq!(f64, points[0].fval, 4.0, epsilon = 1e-2));
        assert!(approx_eq!(f64, points[2].fval, 0.0, epsilon = 1e-3));
        assert!(m.profile("a", 1, None).is_err());
        assert!(m.profile("a", 3, Some((1.0, 0.0))).is_err());
    }

    #[test]
    fn fix_and_release() {
        let mut m = Minuit::new(quadratic, two(0.0, 0.0)).unwrap();
        m.fixto("b", -1.0).unwrap();
        assert_eq!(m.fixed(), vec![false, true]);
        assert_eq!(m.nfit(), 1);
        m.migrad(None).unwrap();
        // with b = -1, df/da = 4(a - 1) + 2(b + 2) = 0 at a = 0.5
        assert!(approx_eq!(f64, m.values()[0], 0.5, epsilon = 1e-4));
        assert_eq!(m.values()[1], -1.0);
        let cov = m.covariance().unwrap();
        assert_eq!(cov.get(1, 1), 0.0);
        assert_eq!(cov.free().dim(), (1, 1));

        m.release("b").unwrap();
        assert!(!m.is_current());
        m.migrad(None).unwrap();
        assert!(approx_eq!(f64, m.values()[1], -2.0, epsilon = 1e-3));

        m.fix(0usize).unwrap();
        m.fix(1usize).unwrap();
        assert_eq!(m.migrad(None).err(), Some(Error::NoFreeParameters));

        m.reset();
        assert_eq!(m.values(), arr1(&[0.0, 0.0]));
        assert!(m.fmin().is_none());
    }

    #[test]
    fn config_validation() {
        assert!(MinuitConfigBuilder::default().errordef(0.0).build().is_err());
        assert!(MinuitConfigBuilder::default().strategy(3).build().is_err());
        assert!(MinuitConfigBuilder::default().ncall(0).build().is_err());
        let c = MinuitConfigBuilder::default()
            .ncall(500)
            .precision(1e-10)
            .build()
            .unwrap();
        assert_eq!(c.ncall, Some(500));
        assert_eq!(c.tol, 0.1);

        let mut m = Minuit::with_config(quadratic, two(0.0, 0.0), c).unwrap();
        assert!(matches!(m.set_tol(-1.0), Err(Error::InvalidConfig(_))));
        assert!(m.set_strategy(2).is_ok());
        assert_eq!(m.strategy(), &Strategy::high());
        assert!(m.reduced_chi2().is_nan());
    }
}
