//! User-facing parameters.
//!
//! A [`ParameterSet`] is the ordered list of named parameters owned by a
//! fitting session. It is edited only through the explicit operations here,
//! each of which validates its input.

use crate::errors::{Error, Result};
use ndarray::prelude::*;

/// Relative distance to a limit below which a parameter counts as sitting on it.
const AT_LIMIT_TOLERANCE: f64 = 1e-6;

/// The limits a parameter may have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limits {
    Unbounded,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Limits {
    /// Builds limits from optional bounds. Infinite bounds count as absent.
    pub fn from_bounds(lower: Option<f64>, upper: Option<f64>) -> Limits {
        let lower = lower.filter(|v| v.is_finite());
        let upper = upper.filter(|v| v.is_finite());
        match (lower, upper) {
            (None, None) => Limits::Unbounded,
            (Some(a), None) => Limits::Lower(a),
            (None, Some(b)) => Limits::Upper(b),
            (Some(a), Some(b)) => Limits::Both(a, b),
        }
    }

    pub fn lower(&self) -> Option<f64> {
        match *self {
            Limits::Lower(a) | Limits::Both(a, _) => Some(a),
            _ => None,
        }
    }

    pub fn upper(&self) -> Option<f64> {
        match *self {
            Limits::Upper(b) | Limits::Both(_, b) => Some(b),
            _ => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        *self != Limits::Unbounded
    }

    /// Moves `value` into the closed interval.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(a) = self.lower() {
            v = v.max(a);
        }
        if let Some(b) = self.upper() {
            v = v.min(b);
        }
        v
    }

    fn scale(&self, bound: f64) -> f64 {
        match *self {
            Limits::Both(a, b) => b - a,
            _ => bound.abs().max(1.0),
        }
    }

    pub fn at_lower(&self, value: f64) -> bool {
        self.lower()
            .map_or(false, |a| value - a <= AT_LIMIT_TOLERANCE * self.scale(a))
    }

    pub fn at_upper(&self, value: f64) -> bool {
        self.upper()
            .map_or(false, |b| b - value <= AT_LIMIT_TOLERANCE * self.scale(b))
    }
}

/// A single named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: f64,
    error: f64,
    limits: Limits,
    fixed: bool,
}

impl Parameter {
    /// Unbounded free parameter. `error` is the initial step size and is
    /// replaced by the parabolic error after a fit.
    pub fn new(name: &str, value: f64, error: f64) -> Result<Self> {
        check_value(name, value)?;
        check_step(name, error)?;
        Ok(Parameter {
            name: name.to_string(),
            value,
            error,
            limits: Limits::Unbounded,
            fixed: false,
        })
    }

    /// Free parameter with limits. Pass `None` or an infinite bound for a
    /// one-sided limit.
    pub fn with_limits(
        name: &str,
        value: f64,
        error: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Self> {
        let mut p = Parameter::new(name, value, error)?;
        p.set_limits(lower, upper)?;
        Ok(p)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn lower_limit(&self) -> Option<f64> {
        self.limits.lower()
    }

    pub fn upper_limit(&self) -> Option<f64> {
        self.limits.upper()
    }

    pub fn has_limits(&self) -> bool {
        self.limits.is_bounded()
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// True if the value sits on one of its limits.
    pub fn at_limit(&self) -> bool {
        self.limits.at_lower(self.value) || self.limits.at_upper(self.value)
    }

    /// Sets the value. Values outside the limits are moved onto the nearest limit.
    pub fn set_value(&mut self, value: f64) -> Result<()> {
        check_value(&self.name, value)?;
        let clamped = self.limits.clamp(value);
        if clamped != value {
            log::warn!(
                "parameter '{}': value {} outside limits, moved to {}",
                self.name,
                value,
                clamped
            );
        }
        self.value = clamped;
        Ok(())
    }

    pub fn set_error(&mut self, error: f64) -> Result<()> {
        check_step(&self.name, error)?;
        self.error = error;
        Ok(())
    }

    pub fn set_limits(&mut self, lower: Option<f64>, upper: Option<f64>) -> Result<()> {
        if lower.map_or(false, f64::is_nan) || upper.map_or(false, f64::is_nan) {
            return Err(Error::InvalidLimits {
                name: self.name.clone(),
                lower: lower.unwrap_or(f64::NEG_INFINITY),
                upper: upper.unwrap_or(f64::INFINITY),
            });
        }
        let limits = Limits::from_bounds(lower, upper);
        if let Limits::Both(a, b) = limits {
            if a >= b {
                return Err(Error::InvalidLimits {
                    name: self.name.clone(),
                    lower: a,
                    upper: b,
                });
            }
        }
        self.limits = limits;
        let value = self.value;
        self.set_value(value)
    }

    pub fn remove_limits(&mut self) {
        self.limits = Limits::Unbounded;
    }

    pub fn fix(&mut self) {
        self.fixed = true;
    }

    pub fn release(&mut self) {
        self.fixed = false;
    }
}

fn check_value(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::NonFiniteValue {
            name: name.to_string(),
            value,
        })
    }
}

fn check_step(name: &str, step: f64) -> Result<()> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidStep {
            name: name.to_string(),
            step,
        })
    }
}

/// Anything that can address a parameter: its index or its name.
pub trait ParameterKey {
    fn index_in(&self, set: &ParameterSet) -> Result<usize>;
}

impl ParameterKey for usize {
    fn index_in(&self, set: &ParameterSet) -> Result<usize> {
        if *self < set.len() {
            Ok(*self)
        } else {
            Err(Error::IndexOutOfRange {
                index: *self,
                len: set.len(),
            })
        }
    }
}

impl<'a> ParameterKey for &'a str {
    fn index_in(&self, set: &ParameterSet) -> Result<usize> {
        set.params
            .iter()
            .position(|p| p.name == *self)
            .ok_or_else(|| Error::UnknownParameter(self.to_string()))
    }
}

impl ParameterKey for String {
    fn index_in(&self, set: &ParameterSet) -> Result<usize> {
        self.as_str().index_in(set)
    }
}

/// Ordered collection of parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        ParameterSet { params: Vec::new() }
    }

    /// Builds a set from names, start values and step sizes.
    pub fn from_values(names: &[&str], values: &[f64], steps: &[f64]) -> Result<Self> {
        if values.len() != names.len() {
            return Err(Error::LengthMismatch {
                expected: names.len(),
                found: values.len(),
            });
        }
        if steps.len() != names.len() {
            return Err(Error::LengthMismatch {
                expected: names.len(),
                found: steps.len(),
            });
        }
        let mut set = ParameterSet::new();
        for ((name, &value), &step) in names.iter().zip(values).zip(steps) {
            set.push(Parameter::new(name, value, step)?)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, param: Parameter) -> Result<usize> {
        if self.params.iter().any(|p| p.name == param.name) {
            return Err(Error::DuplicateName(param.name));
        }
        self.params.push(param);
        Ok(self.params.len() - 1)
    }

    pub fn add(&mut self, name: &str, value: f64, error: f64) -> Result<usize> {
        self.push(Parameter::new(name, value, error)?)
    }

    pub fn add_limited(
        &mut self,
        name: &str,
        value: f64,
        error: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<usize> {
        self.push(Parameter::with_limits(name, value, error, lower, upper)?)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of parameters that are not fixed.
    pub fn nfree(&self) -> usize {
        self.params.iter().filter(|p| !p.fixed).count()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub fn get<K: ParameterKey>(&self, key: K) -> Result<&Parameter> {
        let i = key.index_in(self)?;
        Ok(&self.params[i])
    }

    pub fn index_of<K: ParameterKey>(&self, key: K) -> Result<usize> {
        key.index_in(self)
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name()).collect()
    }

    pub fn values(&self) -> Array1<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn errors(&self) -> Array1<f64> {
        self.params.iter().map(|p| p.error).collect()
    }

    pub fn set_value<K: ParameterKey>(&mut self, key: K, value: f64) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].set_value(value)
    }

    pub fn set_error<K: ParameterKey>(&mut self, key: K, error: f64) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].set_error(error)
    }

    pub fn set_limits<K: ParameterKey>(
        &mut self,
        key: K,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].set_limits(lower, upper)
    }

    pub fn remove_limits<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].remove_limits();
        Ok(())
    }

    pub fn fix<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].fix();
        Ok(())
    }

    pub fn release<K: ParameterKey>(&mut self, key: K) -> Result<()> {
        let i = key.index_in(self)?;
        self.params[i].release();
        Ok(())
    }

    /// Writes a full vector of external values, keeping them inside their limits.
    pub(crate) fn assign_values(&mut self, values: ArrayView1<f64>) {
        for (p, &v) in self.params.iter_mut().zip(values.iter()) {
            if v.is_finite() {
                p.value = p.limits.clamp(v);
            }
        }
    }

    /// Writes errors for free parameters; non-positive or non-finite entries are skipped.
    pub(crate) fn assign_errors(&mut self, errors: ArrayView1<f64>) {
        for (p, &e) in self.params.iter_mut().zip(errors.iter()) {
            if e.is_finite() && e > 0.0 {
                p.error = e;
            }
        }
    }
}

impl std::ops::Index<usize> for ParameterSet {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Parameter {
        &self.params[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            Parameter::new("a", 1.0, 0.0),
            Err(Error::InvalidStep { .. })
        ));
        assert!(matches!(
            Parameter::new("a", f64::NAN, 1.0),
            Err(Error::NonFiniteValue { .. })
        ));
        assert!(matches!(
            Parameter::with_limits("a", 1.0, 0.1, Some(2.0), Some(2.0)),
            Err(Error::InvalidLimits { .. })
        ));
        assert!(matches!(
            Parameter::with_limits("a", 1.0, 0.1, Some(3.0), Some(2.0)),
            Err(Error::InvalidLimits { .. })
        ));
    }

    #[test]
    fn infinite_bounds_are_one_sided() {
        let p = Parameter::with_limits("a", 1.0, 0.1, Some(0.0), Some(f64::INFINITY)).unwrap();
        assert_eq!(p.limits(), Limits::Lower(0.0));
        let p = Parameter::with_limits("a", 1.0, 0.1, None, None).unwrap();
        assert!(!p.has_limits());
    }

    #[test]
    fn value_is_kept_inside_limits() {
        let mut p = Parameter::with_limits("a", 5.0, 0.1, Some(0.0), Some(1.0)).unwrap();
        assert_eq!(p.value(), 1.0);
        assert!(p.at_limit());
        p.set_value(-3.0).unwrap();
        assert_eq!(p.value(), 0.0);
        p.set_value(0.5).unwrap();
        assert!(!p.at_limit());
    }

    #[test]
    fn set_by_name_and_index() {
        let mut set = ParameterSet::from_values(&["a", "b"], &[1.0, 2.0], &[0.1, 0.2]).unwrap();
        assert_eq!(set.index_of("b").unwrap(), 1);
        set.fix("a").unwrap();
        assert_eq!(set.nfree(), 1);
        set.release(0usize).unwrap();
        assert_eq!(set.nfree(), 2);
        set.set_value("b", 4.0).unwrap();
        assert_eq!(set.values(), arr1(&[1.0, 4.0]));
        let names: Vec<&str> = set.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(matches!(set.fix("c"), Err(Error::UnknownParameter(_))));
        assert!(matches!(set.fix(7usize), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(set.add("a", 0.0, 1.0), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn from_values_checks_lengths() {
        assert!(matches!(
            ParameterSet::from_values(&["a", "b"], &[1.0], &[0.1, 0.1]),
            Err(Error::LengthMismatch { .. })
        ));
    }
}
