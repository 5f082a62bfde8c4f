//! Mapping between external (user, possibly bounded) and internal
//! (unconstrained) parameter space.
//!
//! Doubly bounded parameters use `x = a + (b - a)(sin u + 1) / 2`, singly
//! bounded ones use `x = a - 1 + sqrt(u² + 1)` (lower) or
//! `x = b + 1 - sqrt(u² + 1)` (upper). The minimizers only ever see `u`.
//! Fixed parameters do not exist in internal space at all.

use crate::parameter::{Limits, Parameter, ParameterSet};
use crate::precision::MachinePrecision;
use ndarray::prelude::*;
use num_traits::Float;

#[inline]
fn two<T: Float>() -> T {
    T::one() + T::one()
}

/// Transform for parameters with both limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinTransform;

impl SinTransform {
    pub fn int2ext<T: Float>(&self, value: T, upper: T, lower: T) -> T {
        let x = lower + (upper - lower) / two() * (value.sin() + T::one());
        x.max(lower).min(upper)
    }

    /// Values on or outside a limit are pulled in to a finite internal value
    /// `8 sqrt(eps2)` away from `±π/2`.
    pub fn ext2int<T: Float>(&self, value: T, upper: T, lower: T, eps2: T) -> T {
        let piby2 = T::one().asin();
        let eight = two::<T>() * two() * two();
        let distnn = eight * eps2.sqrt();
        let yy = two::<T>() * (value - lower) / (upper - lower) - T::one();
        if yy * yy > T::one() - eps2 {
            if yy < T::zero() {
                -piby2 + distnn
            } else {
                piby2 - distnn
            }
        } else {
            yy.asin()
        }
    }

    pub fn dint2ext<T: Float>(&self, value: T, upper: T, lower: T) -> T {
        (upper - lower) / two() * value.cos()
    }
}

/// Transform for parameters with only a lower limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqrtLowTransform;

impl SqrtLowTransform {
    pub fn int2ext<T: Float>(&self, value: T, lower: T) -> T {
        let x = lower - T::one() + (value * value + T::one()).sqrt();
        x.max(lower)
    }

    pub fn ext2int<T: Float>(&self, value: T, lower: T) -> T {
        let yy = value - lower + T::one();
        let yy2 = yy * yy;
        if yy2 < T::one() {
            T::zero()
        } else {
            (yy2 - T::one()).sqrt()
        }
    }

    pub fn dint2ext<T: Float>(&self, value: T) -> T {
        value / (value * value + T::one()).sqrt()
    }
}

/// Transform for parameters with only an upper limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqrtUpTransform;

impl SqrtUpTransform {
    pub fn int2ext<T: Float>(&self, value: T, upper: T) -> T {
        let x = upper + T::one() - (value * value + T::one()).sqrt();
        x.min(upper)
    }

    pub fn ext2int<T: Float>(&self, value: T, upper: T) -> T {
        let yy = upper - value + T::one();
        let yy2 = yy * yy;
        if yy2 < T::one() {
            T::zero()
        } else {
            (yy2 - T::one()).sqrt()
        }
    }

    pub fn dint2ext<T: Float>(&self, value: T) -> T {
        -value / (value * value + T::one()).sqrt()
    }
}

/// Snapshot of a parameter set together with the index maps between the
/// full external vector and the internal vector of free parameters.
#[derive(Debug, Clone)]
pub struct Transformation {
    params: ParameterSet,
    ext_of_int: Vec<usize>,
    int_of_ext: Vec<Option<usize>>,
    precision: MachinePrecision,
}

impl Transformation {
    pub fn new(params: &ParameterSet, precision: MachinePrecision) -> Self {
        let mut ext_of_int = Vec::with_capacity(params.len());
        let mut int_of_ext = Vec::with_capacity(params.len());
        for (e, p) in params.iter().enumerate() {
            if p.is_fixed() {
                int_of_ext.push(None);
            } else {
                int_of_ext.push(Some(ext_of_int.len()));
                ext_of_int.push(e);
            }
        }
        Transformation {
            params: params.clone(),
            ext_of_int,
            int_of_ext,
            precision,
        }
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn precision(&self) -> &MachinePrecision {
        &self.precision
    }

    /// Number of free parameters.
    pub fn n_internal(&self) -> usize {
        self.ext_of_int.len()
    }

    pub fn n_external(&self) -> usize {
        self.params.len()
    }

    pub fn ext_of_int(&self, i: usize) -> usize {
        self.ext_of_int[i]
    }

    pub fn int_of_ext(&self, e: usize) -> Option<usize> {
        self.int_of_ext[e]
    }

    /// Parameter behind internal index `i`.
    pub fn parameter(&self, i: usize) -> &Parameter {
        &self.params[self.ext_of_int[i]]
    }

    pub fn int2ext(&self, i: usize, value: f64) -> f64 {
        match self.parameter(i).limits() {
            Limits::Unbounded => value,
            Limits::Both(a, b) => SinTransform.int2ext(value, b, a),
            Limits::Lower(a) => SqrtLowTransform.int2ext(value, a),
            Limits::Upper(b) => SqrtUpTransform.int2ext(value, b),
        }
    }

    /// Internal value for external parameter `e`.
    pub fn ext2int(&self, e: usize, value: f64) -> f64 {
        match self.params[e].limits() {
            Limits::Unbounded => value,
            Limits::Both(a, b) => SinTransform.ext2int(value, b, a, self.precision.eps2()),
            Limits::Lower(a) => SqrtLowTransform.ext2int(value, a),
            Limits::Upper(b) => SqrtUpTransform.ext2int(value, b),
        }
    }

    /// `dx/du` of internal parameter `i` at internal value `value`.
    pub fn dint2ext(&self, i: usize, value: f64) -> f64 {
        match self.parameter(i).limits() {
            Limits::Unbounded => 1.0,
            Limits::Both(a, b) => SinTransform.dint2ext(value, b, a),
            Limits::Lower(_) => SqrtLowTransform.dint2ext(value),
            Limits::Upper(_) => SqrtUpTransform.dint2ext(value),
        }
    }

    /// Internal start vector from the current external values.
    pub fn initial_internal(&self) -> Array1<f64> {
        self.ext_of_int
            .iter()
            .map(|&e| self.ext2int(e, self.params[e].value()))
            .collect()
    }

    /// Full external vector, fixed parameters filled in from the snapshot.
    pub fn int2ext_vec(&self, internal: ArrayView1<f64>) -> Array1<f64> {
        let mut ext = self.params.values();
        for (i, &u) in internal.iter().enumerate() {
            ext[self.ext_of_int[i]] = self.int2ext(i, u);
        }
        ext
    }

    /// Chain rule for a gradient given in external coordinates.
    pub fn ext2int_gradient(
        &self,
        internal: ArrayView1<f64>,
        external_grad: ArrayView1<f64>,
    ) -> Array1<f64> {
        Array1::from_shape_fn(self.n_internal(), |i| {
            external_grad[self.ext_of_int[i]] * self.dint2ext(i, internal[i])
        })
    }

    /// Symmetrised external error for an internal value and error.
    pub fn int2ext_error(&self, i: usize, value: f64, error: f64) -> f64 {
        let p = self.parameter(i);
        if !p.has_limits() {
            return error;
        }
        let ui = self.int2ext(i, value);
        let mut du1 = self.int2ext(i, value + error) - ui;
        let du2 = self.int2ext(i, value - error) - ui;
        if let Limits::Both(a, b) = p.limits() {
            if error > 1.0 {
                du1 = b - a;
            }
        }
        0.5 * (du1.abs() + du2.abs())
    }

    /// Propagates an internal covariance to external coordinates of the
    /// free parameters (same dimension as the input).
    pub fn int2ext_covariance(
        &self,
        internal: ArrayView1<f64>,
        cov: ArrayView2<f64>,
    ) -> Array2<f64> {
        let n = self.n_internal();
        let d: Array1<f64> = (0..n).map(|i| self.dint2ext(i, internal[i])).collect();
        Array2::from_shape_fn((n, n), |(i, j)| d[i] * cov[[i, j]] * d[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn prec() -> MachinePrecision {
        MachinePrecision::computed()
    }

    #[test]
    fn sin_round_trip_inside_bounds() {
        let t = SinTransform;
        for &x in [-0.99, -0.5, 0.0, 0.3, 0.9999].iter() {
            let u = t.ext2int(x, 1.0, -1.0, prec().eps2());
            assert!(approx_eq!(f64, t.int2ext(u, 1.0, -1.0), x, epsilon = 1e-12));
        }
    }

    #[test]
    fn sin_is_generic_over_float() {
        let t = SinTransform;
        let u = t.ext2int(0.25f32, 1.0, 0.0, 1e-3);
        assert!((t.int2ext(u, 1.0f32, 0.0) - 0.25).abs() < 1e-5);
    }

    #[test]
    fn sin_clamps_at_the_limit() {
        let t = SinTransform;
        let eps2 = prec().eps2();
        let u = t.ext2int(1.0, 1.0, -1.0, eps2);
        assert!(u.is_finite());
        assert!(u < std::f64::consts::FRAC_PI_2);
        assert!(t.dint2ext(u, 1.0, -1.0) > 0.0);
        let u = t.ext2int(-5.0, 1.0, -1.0, eps2);
        assert!(u > -std::f64::consts::FRAC_PI_2);
        // any internal value maps into the box
        for &u in [-100.0, -1.6, 0.0, 1.5707963267948966, 7.0].iter() {
            let x = t.int2ext(u, 1.0, -1.0);
            assert!(x >= -1.0 && x <= 1.0);
        }
    }

    #[test]
    fn sqrt_round_trips() {
        let lo = SqrtLowTransform;
        let up = SqrtUpTransform;
        for &x in [0.5, 1.0, 3.0, 100.0].iter() {
            let u = lo.ext2int(x, 0.2);
            assert!(approx_eq!(f64, lo.int2ext(u, 0.2), x, epsilon = 1e-10));
            let u = up.ext2int(-x, 0.2);
            assert!(approx_eq!(f64, up.int2ext(u, 0.2), -x, epsilon = 1e-10));
        }
        assert_eq!(lo.ext2int(-1.0, 0.0), 0.0);
        assert!(lo.int2ext(-42.0, 0.0) >= 0.0);
        assert!(up.int2ext(42.0, 0.0) <= 0.0);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let t = SinTransform;
        let u = 0.4;
        let h = 1e-6;
        let fd = (t.int2ext(u + h, 3.0, -1.0) - t.int2ext(u - h, 3.0, -1.0)) / (2.0 * h);
        assert!(approx_eq!(f64, t.dint2ext(u, 3.0, -1.0), fd, epsilon = 1e-8));
        let fd = (SqrtUpTransform.int2ext(u + h, 2.0) - SqrtUpTransform.int2ext(u - h, 2.0))
            / (2.0 * h);
        assert!(approx_eq!(f64, SqrtUpTransform.dint2ext(u), fd, epsilon = 1e-8));
    }

    #[test]
    fn fixed_parameters_are_skipped() {
        let mut set = ParameterSet::new();
        set.add("a", 1.0, 0.1).unwrap();
        set.add_limited("b", 0.5, 0.1, Some(0.0), Some(1.0)).unwrap();
        set.add("c", 3.0, 0.1).unwrap();
        set.fix("a").unwrap();
        let t = Transformation::new(&set, prec());
        assert_eq!(t.n_internal(), 2);
        assert_eq!(t.ext_of_int(0), 1);
        assert_eq!(t.int_of_ext(0), None);
        assert_eq!(t.int_of_ext(2), Some(1));
        let u = t.initial_internal();
        assert!(approx_eq!(f64, u[0], 0.0, epsilon = 1e-15));
        let x = t.int2ext_vec(u.view());
        assert!(approx_eq!(f64, x[0], 1.0));
        assert!(approx_eq!(f64, x[1], 0.5, epsilon = 1e-15));
        assert!(approx_eq!(f64, x[2], 3.0));
    }

    #[test]
    fn gradient_chain_rule() {
        let mut set = ParameterSet::new();
        set.add_limited("b", 0.5, 0.1, Some(0.0), Some(2.0)).unwrap();
        let t = Transformation::new(&set, prec());
        let u = arr1(&[0.3]);
        let g = t.ext2int_gradient(u.view(), arr1(&[2.0]).view());
        assert!(approx_eq!(f64, g[0], 2.0 * 0.3f64.cos(), epsilon = 1e-15));
    }
}
