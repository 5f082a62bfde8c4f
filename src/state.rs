//! Immutable snapshots of the minimization state in internal space.
//!
//! Every iteration produces a new [`MinimumState`]; earlier states stay
//! untouched so a failed step can fall back to its predecessor and the full
//! history can be inspected after the run.

use ndarray::prelude::*;

/// A point in internal space and the objective value there.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumParameters {
    vec: Array1<f64>,
    fval: f64,
}

impl MinimumParameters {
    pub fn new(vec: Array1<f64>, fval: f64) -> Self {
        MinimumParameters { vec, fval }
    }

    pub fn vec(&self) -> &Array1<f64> {
        &self.vec
    }

    pub fn fval(&self) -> f64 {
        self.fval
    }

    pub fn is_valid(&self) -> bool {
        self.fval.is_finite() && self.vec.iter().all(|v| v.is_finite())
    }
}

/// First derivatives with the second derivative estimates and step sizes
/// they were computed with.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionGradient {
    grad: Array1<f64>,
    g2: Array1<f64>,
    gstep: Array1<f64>,
    analytical: bool,
    accurate: bool,
}

impl FunctionGradient {
    pub fn numerical(grad: Array1<f64>, g2: Array1<f64>, gstep: Array1<f64>, accurate: bool) -> Self {
        FunctionGradient {
            grad,
            g2,
            gstep,
            analytical: false,
            accurate,
        }
    }

    /// Analytic gradient; curvature and step estimates are carried over.
    pub fn analytical(grad: Array1<f64>, g2: Array1<f64>, gstep: Array1<f64>) -> Self {
        FunctionGradient {
            grad,
            g2,
            gstep,
            analytical: true,
            accurate: true,
        }
    }

    pub fn grad(&self) -> &Array1<f64> {
        &self.grad
    }

    pub fn g2(&self) -> &Array1<f64> {
        &self.g2
    }

    pub fn gstep(&self) -> &Array1<f64> {
        &self.gstep
    }

    pub fn is_analytical(&self) -> bool {
        self.analytical
    }

    /// False when the numerical refinement ran out of cycles or hit
    /// non-finite function values.
    pub fn is_accurate(&self) -> bool {
        self.accurate
    }

    pub fn is_valid(&self) -> bool {
        self.grad.iter().all(|v| v.is_finite())
    }
}

/// How an error matrix came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// No matrix was computed, as after SIMPLEX.
    NotComputed,
    /// Positive definite as computed.
    Valid,
    /// Had to be forced positive definite.
    MadePosDef,
    /// HESSE could not compute the second derivatives.
    HesseFailed,
    /// HESSE computed the Hessian but could not invert it. The matrix holds
    /// the inverse diagonal, which the minimizers may still step with, but
    /// it is never reported as a covariance.
    InvertFailed,
    /// Call limit reached while HESSE was running.
    ReachedCallLimit,
}

/// Approximate inverse Hessian `V` of the objective in internal space.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumError {
    inv_hessian: Array2<f64>,
    dcovar: f64,
    status: ErrorStatus,
    from_hesse: bool,
}

impl MinimumError {
    /// Matrix built by a minimizer. `dcovar` is its relative uncertainty,
    /// 1 for a pure guess and near 0 for a converged update series.
    pub fn new(inv_hessian: Array2<f64>, dcovar: f64) -> Self {
        MinimumError {
            inv_hessian,
            dcovar,
            status: ErrorStatus::Valid,
            from_hesse: false,
        }
    }

    pub fn with_status(inv_hessian: Array2<f64>, dcovar: f64, status: ErrorStatus) -> Self {
        MinimumError {
            inv_hessian,
            dcovar,
            status,
            from_hesse: false,
        }
    }

    /// Placeholder for minimizers that do not estimate curvature.
    pub fn not_computed(n: usize) -> Self {
        MinimumError {
            inv_hessian: Array2::eye(n),
            dcovar: 1.0,
            status: ErrorStatus::NotComputed,
            from_hesse: false,
        }
    }

    /// Matrix produced by a full second derivative computation.
    pub fn from_hesse(inv_hessian: Array2<f64>, status: ErrorStatus) -> Self {
        MinimumError {
            inv_hessian,
            dcovar: 0.0,
            status,
            from_hesse: true,
        }
    }

    pub fn inv_hessian(&self) -> &Array2<f64> {
        &self.inv_hessian
    }

    /// Hessian-based covariance in internal units for an objective with
    /// `errordef = 1/2`; scale by `2 errordef` for the user covariance.
    pub fn matrix(&self) -> Array2<f64> {
        &self.inv_hessian * 2.0
    }

    pub fn dcovar(&self) -> f64 {
        self.dcovar
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn is_from_hesse(&self) -> bool {
        self.from_hesse
    }

    pub fn is_available(&self) -> bool {
        !matches!(
            self.status,
            ErrorStatus::NotComputed
                | ErrorStatus::HesseFailed
                | ErrorStatus::InvertFailed
                | ErrorStatus::ReachedCallLimit
        )
    }

    pub fn is_valid(&self) -> bool {
        self.is_available() && self.is_pos_def()
    }

    pub fn is_pos_def(&self) -> bool {
        self.status == ErrorStatus::Valid
    }

    pub fn is_made_pos_def(&self) -> bool {
        self.status == ErrorStatus::MadePosDef
    }

    pub fn hesse_failed(&self) -> bool {
        matches!(
            self.status,
            ErrorStatus::HesseFailed | ErrorStatus::InvertFailed
        )
    }

    pub fn invert_failed(&self) -> bool {
        self.status == ErrorStatus::InvertFailed
    }

    pub fn has_reached_call_limit(&self) -> bool {
        self.status == ErrorStatus::ReachedCallLimit
    }

    /// Accurate means positive definite and not a rough approximation.
    pub fn is_accurate(&self) -> bool {
        self.is_pos_def() && self.dcovar < 0.1
    }
}

/// Estimated distance to minimum, `gᵀ V g / 2`.
pub fn estimate_edm(grad: &FunctionGradient, error: &MinimumError) -> f64 {
    let g = grad.grad();
    if g.is_empty() {
        return 0.0;
    }
    0.5 * g.dot(&error.inv_hessian().dot(g))
}

/// Snapshot after one minimizer step.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumState {
    parameters: MinimumParameters,
    error: MinimumError,
    gradient: FunctionGradient,
    edm: f64,
    nfcn: usize,
}

impl MinimumState {
    pub fn new(
        parameters: MinimumParameters,
        error: MinimumError,
        gradient: FunctionGradient,
        edm: f64,
        nfcn: usize,
    ) -> Self {
        MinimumState {
            parameters,
            error,
            gradient,
            edm,
            nfcn,
        }
    }

    pub fn parameters(&self) -> &MinimumParameters {
        &self.parameters
    }

    pub fn error(&self) -> &MinimumError {
        &self.error
    }

    pub fn gradient(&self) -> &FunctionGradient {
        &self.gradient
    }

    pub fn vec(&self) -> &Array1<f64> {
        self.parameters.vec()
    }

    pub fn fval(&self) -> f64 {
        self.parameters.fval()
    }

    pub fn edm(&self) -> f64 {
        self.edm
    }

    /// Objective calls spent up to this state.
    pub fn nfcn(&self) -> usize {
        self.nfcn
    }

    /// Finite point and EDM, and a usable error matrix unless none was
    /// computed at all.
    pub fn is_valid(&self) -> bool {
        self.parameters.is_valid()
            && self.edm.is_finite()
            && self.edm >= 0.0
            && (self.error.is_available() || self.error.status() == ErrorStatus::NotComputed)
    }

    pub fn with_nfcn(mut self, nfcn: usize) -> Self {
        self.nfcn = nfcn;
        self
    }

    /// Same point and gradient with a different error matrix.
    pub fn with_error(&self, error: MinimumError, edm: f64, nfcn: usize) -> Self {
        MinimumState {
            parameters: self.parameters.clone(),
            error,
            gradient: self.gradient.clone(),
            edm,
            nfcn,
        }
    }
}
