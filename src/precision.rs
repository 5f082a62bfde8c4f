//! Floating point noise floor used by all numerical tolerances.

use crate::errors::{Error, Result};

/// Relative precision of objective function evaluations.
///
/// `eps` is the smallest relative change of a function value that can be
/// resolved, `eps2 = 2 sqrt(eps)` is the matching tolerance for first
/// derivative step sizes. By default `eps` is measured from the `f64`
/// arithmetic of the machine; callers whose objective carries extra noise
/// can raise it with [`MachinePrecision::with_eps`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachinePrecision {
    eps: f64,
    eps2: f64,
}

impl Default for MachinePrecision {
    fn default() -> Self {
        Self::computed()
    }
}

impl MachinePrecision {
    /// Measures the resolution of `f64` addition around one.
    pub fn computed() -> Self {
        let mut epstry = 0.5f64;
        let one = 1.0f64;
        for _ in 0..100 {
            epstry *= 0.5;
            let epsp1 = std::hint::black_box(one + epstry);
            let epsbak = std::hint::black_box(epsp1 - one);
            if epsbak < epstry {
                let eps = 8.0 * epstry;
                return Self {
                    eps,
                    eps2: 2.0 * eps.sqrt(),
                };
            }
        }
        let eps = 4.0e-7;
        Self {
            eps,
            eps2: 2.0 * eps.sqrt(),
        }
    }

    /// Override the precision, e.g. for objectives computed in single precision.
    pub fn with_eps(eps: f64) -> Result<Self> {
        if !(eps.is_finite() && eps > 0.0 && eps < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "precision must be in (0, 1), got {}",
                eps
            )));
        }
        Ok(Self {
            eps,
            eps2: 2.0 * eps.sqrt(),
        })
    }

    #[inline]
    pub fn eps(&self) -> f64 {
        self.eps
    }

    #[inline]
    pub fn eps2(&self) -> f64 {
        self.eps2
    }
}
