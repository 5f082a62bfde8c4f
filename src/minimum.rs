//! The result of a minimization and the trait every minimizer implements.
//!
//! A [`FunctionMinimum`] keeps the seed and every state the minimizer went
//! through, so the run can be inspected afterwards. Convergence problems are
//! reported through its flags, never as errors.

use crate::fcn::WrappedFcn;
use crate::precision::MachinePrecision;
use crate::state::MinimumState;
use crate::transform::Transformation;
use ndarray::prelude::*;

/// Target EDM for a tolerance `tol`: `0.002 · tol · errordef`, where
/// `tol · errordef` is kept above the noise floor `eps2`.
pub fn edm_goal(tol: f64, errordef: f64, prec: &MachinePrecision) -> f64 {
    0.002 * (tol * errordef).max(prec.eps2())
}

/// Default call limit for `n` free parameters.
pub fn default_max_fcn(n: usize) -> usize {
    200 + 100 * n + 5 * n * n
}

/// A general minimizer over the free parameters of a transformation.
pub trait Minimizer {
    /// Minimizes starting from the current values of the parameters behind
    /// `fcn`, spending at most about `max_fcn` objective calls.
    fn minimize(&self, fcn: &WrappedFcn, max_fcn: usize) -> FunctionMinimum;
}

/// Final state of a minimization with its history and status flags.
#[derive(Debug, Clone)]
pub struct FunctionMinimum {
    trafo: Transformation,
    seed: MinimumState,
    states: Vec<MinimumState>,
    base_len: usize,
    errordef: f64,
    edm_goal: f64,
    above_max_edm: bool,
    reached_call_limit: bool,
    aborted: bool,
    ngrad: usize,
}

impl FunctionMinimum {
    /// Minimum made of `states`, which must follow `seed`. An empty list
    /// means the minimizer never got past the seed.
    pub fn new(
        trafo: Transformation,
        seed: MinimumState,
        states: Vec<MinimumState>,
        errordef: f64,
        edm_goal: f64,
    ) -> Self {
        let states = if states.is_empty() {
            vec![seed.clone()]
        } else {
            states
        };
        FunctionMinimum {
            trafo,
            seed,
            base_len: states.len(),
            states,
            errordef,
            edm_goal,
            above_max_edm: false,
            reached_call_limit: false,
            aborted: false,
            ngrad: 0,
        }
    }

    pub(crate) fn set_above_max_edm(&mut self, value: bool) {
        self.above_max_edm = value;
    }

    pub(crate) fn set_reached_call_limit(&mut self, value: bool) {
        self.reached_call_limit = value;
    }

    pub(crate) fn set_aborted(&mut self, value: bool) {
        self.aborted = value;
    }

    pub(crate) fn set_ngrad(&mut self, ngrad: usize) {
        self.ngrad = ngrad;
    }

    /// Same minimum with the error matrix replaced by a HESSE result.
    ///
    /// Earlier HESSE results are dropped, so the history always reads
    /// minimizer states followed by at most one HESSE state. A call limit
    /// the minimizer ran into stays on record.
    pub(crate) fn with_hesse(&self, state: MinimumState, aborted: bool) -> FunctionMinimum {
        let mut fm = self.clone();
        fm.states.truncate(self.base_len);
        fm.reached_call_limit = self.reached_call_limit || state.error().has_reached_call_limit();
        fm.above_max_edm = !edm_acceptable(
            state.edm(),
            state.fval(),
            fm.edm_goal,
            fm.trafo.precision(),
        );
        fm.aborted = self.aborted || aborted;
        fm.states.push(state);
        fm
    }

    /// Current state, including a HESSE update if there is one.
    pub fn state(&self) -> &MinimumState {
        &self.states[self.states.len() - 1]
    }

    /// Last state produced by the minimizer itself.
    pub fn base_state(&self) -> &MinimumState {
        &self.states[self.base_len - 1]
    }

    pub fn seed(&self) -> &MinimumState {
        &self.seed
    }

    pub fn states(&self) -> &[MinimumState] {
        &self.states
    }

    pub fn trafo(&self) -> &Transformation {
        &self.trafo
    }

    pub fn fval(&self) -> f64 {
        self.state().fval()
    }

    pub fn edm(&self) -> f64 {
        self.state().edm()
    }

    pub fn edm_goal(&self) -> f64 {
        self.edm_goal
    }

    pub fn errordef(&self) -> f64 {
        self.errordef
    }

    /// Objective calls consumed, including any HESSE run on this minimum.
    pub fn nfcn(&self) -> usize {
        self.state().nfcn()
    }

    /// Analytic gradient calls consumed.
    pub fn ngrad(&self) -> usize {
        self.ngrad
    }

    /// Converged: valid state, EDM below the goal, call limit not reached
    /// and not aborted.
    pub fn is_valid(&self) -> bool {
        self.state().is_valid() && !self.above_max_edm && !self.reached_call_limit && !self.aborted
    }

    /// Like [`is_valid`](Self::is_valid) but ignoring EDM and call limit.
    pub fn has_valid_parameters(&self) -> bool {
        self.state().is_valid() && !self.aborted
    }

    pub fn has_covariance(&self) -> bool {
        self.state().error().is_available()
    }

    pub fn has_accurate_covar(&self) -> bool {
        self.state().error().is_accurate()
    }

    pub fn has_posdef_covar(&self) -> bool {
        self.state().error().is_pos_def()
    }

    pub fn has_made_posdef_covar(&self) -> bool {
        self.state().error().is_made_pos_def()
    }

    pub fn hesse_failed(&self) -> bool {
        self.state().error().hesse_failed()
    }

    pub fn has_reached_call_limit(&self) -> bool {
        self.reached_call_limit
    }

    pub fn is_above_max_edm(&self) -> bool {
        self.above_max_edm
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Full external parameter vector, fixed parameters included.
    pub fn user_values(&self) -> Array1<f64> {
        self.trafo.int2ext_vec(self.state().vec().view())
    }

    /// Parabolic errors in external coordinates. Fixed parameters keep the
    /// step size they were given.
    pub fn user_errors(&self) -> Array1<f64> {
        let mut errors = self.trafo.parameters().errors();
        if !self.has_covariance() {
            return errors;
        }
        let x = self.state().vec();
        let v = self.state().error().inv_hessian();
        for i in 0..self.trafo.n_internal() {
            let err = (2.0 * self.errordef * v[[i, i]]).sqrt();
            errors[self.trafo.ext_of_int(i)] = self.trafo.int2ext_error(i, x[i], err);
        }
        errors
    }

    /// Covariance of all external parameters, with zero rows and columns for
    /// fixed ones, or `None` if no error matrix was computed.
    pub fn user_covariance(&self) -> Option<Array2<f64>> {
        if !self.has_covariance() {
            return None;
        }
        let x = self.state().vec();
        let v = self.state().error().inv_hessian() * (2.0 * self.errordef);
        let internal = self.trafo.int2ext_covariance(x.view(), v.view());
        let n = self.trafo.n_external();
        let mut cov = Array2::zeros((n, n));
        for i in 0..self.trafo.n_internal() {
            for j in 0..self.trafo.n_internal() {
                cov[[self.trafo.ext_of_int(i), self.trafo.ext_of_int(j)]] = internal[[i, j]];
            }
        }
        Some(cov)
    }

    /// Whether any free parameter sits on one of its limits.
    pub fn has_parameters_at_limit(&self) -> bool {
        let values = self.user_values();
        (0..self.trafo.n_internal()).any(|i| {
            let e = self.trafo.ext_of_int(i);
            let limits = self.trafo.parameter(i).limits();
            limits.at_lower(values[e]) || limits.at_upper(values[e])
        })
    }
}

/// Whether `edm` is close enough to the goal for the minimum to count as
/// converged.
///
/// Up to ten times the goal is accepted. Beyond that only an EDM below the
/// machine resolution of `fval` is accepted.
pub(crate) fn edm_acceptable(edm: f64, fval: f64, goal: f64, prec: &MachinePrecision) -> bool {
    edm.is_finite() && (edm < 10.0 * goal || edm < prec.eps2() * fval.abs())
}
