//! Function minimization and error analysis in the style of MINUIT.
//!
//! The crate finds the minimum of a scalar objective over named, optionally
//! bounded parameters and estimates the parameter uncertainties:
//!
//! * [`vector::Migrad`]: variable-metric minimizer with an EDM stopping rule,
//! * [`vector::Simplex`]: derivative-free Nelder-Mead fallback,
//! * [`Hesse`]: covariance from a full numerical Hessian,
//! * [`Minos`]: asymmetric errors from the profile of the objective.
//!
//! Bounded parameters are mapped to an unbounded internal space, so the
//! minimizers never see the limits. [`Minuit`] ties everything together into
//! a fitting session.
//!
//! # Examples
//!
//! A straight line fitted by least squares:
//!
//! ```
//! # extern crate ndarray;
//! # extern crate minuit;
//! # use ndarray::prelude::*;
//! # use minuit::{with_ndata, Minuit, ParameterSet};
//!
//! let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
//! let ys = [1.3, 2.5, 5.2, 7.4, 8.6];
//! let chi2 = move |p: ArrayView1<f64>| {
//!     xs.iter()
//!         .zip(ys.iter())
//!         .map(|(x, y)| (y - p[0] - p[1] * x).powi(2))
//!         .sum::<f64>()
//! };
//! let params = ParameterSet::from_values(&["a", "b"], &[0.0, 0.0], &[0.1, 0.1]).unwrap();
//! let mut m = Minuit::new(with_ndata(chi2, xs.len()), params).unwrap();
//! assert!(m.migrad(None).unwrap().is_valid());
//! assert_eq!(m.ndof(), Some(3));
//! println!("a = {} ± {}", m.values()[0], m.errors()[0]);
//! ```

#[macro_use]
extern crate derive_builder;

mod errors;
mod fcn;
mod hesse;
mod linalg;
mod minimum;
mod minos;
mod parameter;
mod precision;
mod session;
mod strategy;
mod transform;

pub mod gradient;
pub mod scalar;
pub mod state;
pub mod vector;

pub use crate::errors::{Error, Result};
pub use crate::fcn::{with_gradient, with_ndata, DataFcn, Fcn, GradFcn, StopRequest, WrappedFcn};
pub use crate::hesse::{Hesse, HesseBuilder};
pub use crate::minimum::{default_max_fcn, edm_goal, FunctionMinimum, Minimizer};
pub use crate::minos::{profile, Minos, MinosBuilder, MinosError, MinosSide, ProfilePoint};
pub use crate::parameter::{Limits, Parameter, ParameterKey, ParameterSet};
pub use crate::precision::MachinePrecision;
pub use crate::session::{Covariance, Minuit, MinuitConfig, MinuitConfigBuilder};
pub use crate::strategy::{Strategy, StrategyBuilder};
pub use crate::transform::{SinTransform, SqrtLowTransform, SqrtUpTransform, Transformation};

/// `errordef` for least-squares objectives.
pub const LEAST_SQUARES: f64 = 1.0;

/// `errordef` for negative log-likelihood objectives.
pub const LIKELIHOOD: f64 = 0.5;
