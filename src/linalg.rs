//! Symmetric matrix helpers.
//!
//! Matrices live in `ndarray` throughout the crate; the decompositions are
//! borrowed from `nalgebra` and converted at this boundary.

use crate::precision::MachinePrecision;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::prelude::*;

fn to_nalgebra(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (n, m) = a.dim();
    DMatrix::from_fn(n, m, |i, j| a[[i, j]])
}

fn from_nalgebra(a: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.nrows(), a.ncols()), |(i, j)| a[(i, j)])
}

/// Outer product `a bᵀ`.
pub fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

/// `0.5 (A + Aᵀ)`.
pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in 0..i {
            let m = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = m;
            a[[j, i]] = m;
        }
    }
}

/// Eigenvalues of a symmetric matrix in ascending order.
pub fn eigenvalues(a: ArrayView2<f64>) -> Array1<f64> {
    let eig = SymmetricEigen::new(to_nalgebra(a));
    let mut values: Vec<f64> = eig.eigenvalues.iter().cloned().collect();
    values.sort_by(|x, y| x.total_cmp(y));
    Array1::from(values)
}

/// Inverse of a symmetric matrix, or `None` if it is singular.
///
/// The matrix is scaled to unit diagonal before inverting, which keeps the
/// condition number independent of the parameter units.
pub fn invert_symmetric(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n == 0 {
        return Some(Array2::zeros((0, 0)));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let diag = a.diag();
    if diag.iter().any(|&d| d <= 0.0) {
        let inv = to_nalgebra(a).try_inverse()?;
        let mut out = from_nalgebra(&inv);
        symmetrize(&mut out);
        return finite(out);
    }
    let s: Array1<f64> = diag.mapv(|d| 1.0 / d.sqrt());
    let scaled = Array2::from_shape_fn((n, n), |(i, j)| a[[i, j]] * s[i] * s[j]);
    let m = to_nalgebra(scaled.view());
    let inv = match m.clone().cholesky() {
        Some(c) => c.inverse(),
        None => m.try_inverse()?,
    };
    let mut out = Array2::from_shape_fn((n, n), |(i, j)| inv[(i, j)] * s[i] * s[j]);
    symmetrize(&mut out);
    finite(out)
}

fn finite(a: Array2<f64>) -> Option<Array2<f64>> {
    if a.iter().all(|v| v.is_finite()) {
        Some(a)
    } else {
        None
    }
}

/// Result of [`make_pos_def`].
#[derive(Debug, Clone, PartialEq)]
pub struct PosDef {
    pub matrix: Array2<f64>,
    /// True if the matrix had to be modified.
    pub made_pos_def: bool,
}

/// Forces a symmetric matrix to be positive definite with the smallest
/// diagonal shift that lifts its lowest eigenvalue above the noise floor.
pub fn make_pos_def(a: ArrayView2<f64>, prec: &MachinePrecision) -> PosDef {
    let n = a.nrows();
    let mut err = a.to_owned();
    if n == 0 {
        return PosDef {
            matrix: err,
            made_pos_def: false,
        };
    }
    if n == 1 {
        if err[[0, 0]] > prec.eps() {
            return PosDef {
                matrix: err,
                made_pos_def: false,
            };
        }
        err[[0, 0]] = 1.0;
        return PosDef {
            matrix: err,
            made_pos_def: true,
        };
    }

    let epspdf = prec.eps2().max(1e-6);
    let dgmin = err.diag().fold(f64::INFINITY, |acc, &d| acc.min(d));
    let mut made_pos_def = false;
    if dgmin <= 0.0 {
        let dg = 0.5 + epspdf - dgmin;
        log::debug!("non-positive diagonal element, shifting diagonal by {}", dg);
        for i in 0..n {
            err[[i, i]] += dg;
        }
        made_pos_def = true;
    }

    let s: Array1<f64> = err.diag().mapv(|d| 1.0 / d.sqrt());
    let p = Array2::from_shape_fn((n, n), |(i, j)| err[[i, j]] * s[i] * s[j]);
    let eval = eigenvalues(p.view());
    let pmin = eval[0];
    let pmax = eval[n - 1].abs().max(1.0);
    if pmin > epspdf * pmax {
        return PosDef {
            matrix: err,
            made_pos_def,
        };
    }

    let padd = 0.001 * pmax - pmin;
    log::debug!(
        "matrix forced positive definite, lowest eigenvalue {} raised by {}",
        pmin,
        padd
    );
    for i in 0..n {
        err[[i, i]] *= 1.0 + padd;
    }
    PosDef {
        matrix: err,
        made_pos_def: true,
    }
}
