//! The objective function contract and the wrapper the minimizers call.
//!
//! Callers hand in anything implementing [`Fcn`]; plain closures
//! `Fn(ArrayView1<f64>) -> f64` do so automatically. Inside the engine every
//! call goes through [`WrappedFcn`], which maps the internal vector to the
//! full external vector, counts calls and records stop requests.

use crate::transform::Transformation;
use ndarray::prelude::*;
use std::cell::{Cell, RefCell};
use thiserror::Error;

/// Returned by an objective to end the current run early.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("stop requested: {0}")]
pub struct StopRequest(pub String);

/// A scalar objective over an ordered parameter vector.
pub trait Fcn {
    /// Objective value at the external parameter vector `x`.
    fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest>;

    /// Gradient with respect to the external parameters, if available.
    fn gradient(&self, _x: ArrayView1<f64>) -> Option<Result<Array1<f64>, StopRequest>> {
        None
    }

    fn has_gradient(&self) -> bool {
        false
    }

    /// Number of data points entering the objective, used for the degrees
    /// of freedom of a fit.
    fn ndata(&self) -> Option<usize> {
        None
    }
}

impl<F> Fcn for F
where
    F: Fn(ArrayView1<f64>) -> f64,
{
    fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest> {
        Ok(self(x))
    }
}

/// Objective with an analytic gradient, see [`with_gradient`].
pub struct GradFcn<F, G> {
    fcn: F,
    grad: G,
}

/// Pairs an objective with its analytic gradient.
pub fn with_gradient<F, G>(fcn: F, grad: G) -> GradFcn<F, G>
where
    F: Fn(ArrayView1<f64>) -> f64,
    G: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    GradFcn { fcn, grad }
}

impl<F, G> Fcn for GradFcn<F, G>
where
    F: Fn(ArrayView1<f64>) -> f64,
    G: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest> {
        Ok((self.fcn)(x))
    }

    fn gradient(&self, x: ArrayView1<f64>) -> Option<Result<Array1<f64>, StopRequest>> {
        Some(Ok((self.grad)(x)))
    }

    fn has_gradient(&self) -> bool {
        true
    }
}

/// Objective that knows how many data points it sums over, see [`with_ndata`].
pub struct DataFcn<F> {
    fcn: F,
    ndata: usize,
}

/// Attaches a data point count to an objective.
pub fn with_ndata<F: Fcn>(fcn: F, ndata: usize) -> DataFcn<F> {
    DataFcn { fcn, ndata }
}

impl<F: Fcn> Fcn for DataFcn<F> {
    fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest> {
        self.fcn.value(x)
    }

    fn gradient(&self, x: ArrayView1<f64>) -> Option<Result<Array1<f64>, StopRequest>> {
        self.fcn.gradient(x)
    }

    fn has_gradient(&self) -> bool {
        self.fcn.has_gradient()
    }

    fn ndata(&self) -> Option<usize> {
        Some(self.ndata)
    }
}

/// Objective seen from internal space.
pub struct WrappedFcn<'a> {
    fcn: &'a dyn Fcn,
    trafo: &'a Transformation,
    errordef: f64,
    nfcn: Cell<usize>,
    ngrad: Cell<usize>,
    stop: RefCell<Option<StopRequest>>,
}

impl<'a> WrappedFcn<'a> {
    pub fn new(fcn: &'a dyn Fcn, trafo: &'a Transformation, errordef: f64) -> Self {
        WrappedFcn {
            fcn,
            trafo,
            errordef,
            nfcn: Cell::new(0),
            ngrad: Cell::new(0),
            stop: RefCell::new(None),
        }
    }

    /// Evaluates at an internal point. After a stop request every call
    /// returns NaN without reaching the objective.
    pub fn call(&self, internal: ArrayView1<f64>) -> f64 {
        if self.is_stopped() {
            return f64::NAN;
        }
        self.nfcn.set(self.nfcn.get() + 1);
        let ext = self.trafo.int2ext_vec(internal);
        match self.fcn.value(ext.view()) {
            Ok(v) => v,
            Err(stop) => {
                log::warn!("{}", stop);
                *self.stop.borrow_mut() = Some(stop);
                f64::NAN
            }
        }
    }

    /// Analytic gradient in internal space, `None` when the objective has none.
    pub fn gradient(&self, internal: ArrayView1<f64>) -> Option<Array1<f64>> {
        if !self.fcn.has_gradient() {
            return None;
        }
        if self.is_stopped() {
            return Some(Array1::from_elem(internal.len(), f64::NAN));
        }
        self.ngrad.set(self.ngrad.get() + 1);
        let ext = self.trafo.int2ext_vec(internal);
        match self.fcn.gradient(ext.view())? {
            Ok(g) if g.len() == self.trafo.n_external() => {
                Some(self.trafo.ext2int_gradient(internal, g.view()))
            }
            Ok(g) => {
                log::warn!(
                    "gradient has {} components, expected {}",
                    g.len(),
                    self.trafo.n_external()
                );
                Some(Array1::from_elem(internal.len(), f64::NAN))
            }
            Err(stop) => {
                log::warn!("{}", stop);
                *self.stop.borrow_mut() = Some(stop);
                Some(Array1::from_elem(internal.len(), f64::NAN))
            }
        }
    }

    pub fn has_gradient(&self) -> bool {
        self.fcn.has_gradient()
    }

    pub fn num_calls(&self) -> usize {
        self.nfcn.get()
    }

    pub fn num_grad_calls(&self) -> usize {
        self.ngrad.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.borrow().is_some()
    }

    pub fn errordef(&self) -> f64 {
        self.errordef
    }

    pub fn trafo(&self) -> &Transformation {
        self.trafo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSet;
    use crate::precision::MachinePrecision;

    struct StopAfter {
        calls: Cell<usize>,
        limit: usize,
    }

    impl Fcn for StopAfter {
        fn value(&self, x: ArrayView1<f64>) -> Result<f64, StopRequest> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() > self.limit {
                Err(StopRequest("enough".into()))
            } else {
                Ok(x.sum())
            }
        }
    }

    fn trafo() -> Transformation {
        let mut set = ParameterSet::from_values(&["a", "b"], &[1.0, 2.0], &[0.1, 0.1]).unwrap();
        set.fix("a").unwrap();
        Transformation::new(&set, MachinePrecision::computed())
    }

    #[test]
    fn counts_and_inserts_fixed_values() {
        let t = trafo();
        let f = |x: ArrayView1<f64>| 10.0 * x[0] + x[1];
        let w = WrappedFcn::new(&f, &t, 1.0);
        assert_eq!(w.call(arr1(&[5.0]).view()), 15.0);
        assert_eq!(w.call(arr1(&[6.0]).view()), 16.0);
        assert_eq!(w.num_calls(), 2);
        assert!(w.gradient(arr1(&[0.0]).view()).is_none());
    }

    #[test]
    fn stop_request_is_sticky() {
        let t = trafo();
        let f = StopAfter {
            calls: Cell::new(0),
            limit: 1,
        };
        let w = WrappedFcn::new(&f, &t, 1.0);
        assert_eq!(w.call(arr1(&[1.0]).view()), 2.0);
        assert!(w.call(arr1(&[1.0]).view()).is_nan());
        assert!(w.is_stopped());
        assert!(w.call(arr1(&[1.0]).view()).is_nan());
        assert_eq!(f.calls.get(), 2);
    }

    #[test]
    fn analytic_gradient_is_reduced_to_free_parameters() {
        let t = trafo();
        let f = with_gradient(
            |x: ArrayView1<f64>| x[0] * x[0] + 3.0 * x[1] * x[1],
            |x: ArrayView1<f64>| arr1(&[2.0 * x[0], 6.0 * x[1]]),
        );
        let w = WrappedFcn::new(&f, &t, 1.0);
        let g = w.gradient(arr1(&[2.0]).view()).unwrap();
        assert_eq!(g, arr1(&[12.0]));
        assert_eq!(w.num_grad_calls(), 1);
    }

    #[test]
    fn ndata_adapter() {
        let f = with_ndata(|x: ArrayView1<f64>| x[0], 7);
        assert_eq!(f.ndata(), Some(7));
        assert_eq!(f.value(arr1(&[3.0]).view()), Ok(3.0));
    }
}
