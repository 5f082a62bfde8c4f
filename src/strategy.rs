//! Tuning knobs for numerical derivatives.
//!
//! The three presets trade function calls for reliability. Level 0 is
//! cheapest, level 2 spends the most calls on derivatives and checks the
//! final error matrix with a full Hessian.

use crate::errors::{Error, Result};

#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
/// Cycle counts and tolerances of the derivative calculators.
pub struct Strategy {
    /// Preset this strategy was derived from. Controls the post-MIGRAD
    /// Hessian check: 2 always runs it, 1 runs it when the error matrix
    /// changed substantially in the last update.
    #[builder(default = "1")]
    pub level: u32,

    /// Maximum refinement cycles of each gradient component.
    #[builder(default = "3")]
    pub grad_ncycles: usize,

    /// Relative step change below which gradient refinement stops.
    #[builder(default = "0.3")]
    pub grad_step_tolerance: f64,

    /// Relative gradient change below which gradient refinement stops.
    #[builder(default = "0.05")]
    pub grad_tolerance: f64,

    /// Maximum refinement cycles of each diagonal Hessian element.
    #[builder(default = "5")]
    pub hessian_ncycles: usize,

    /// Relative step change below which diagonal refinement stops.
    #[builder(default = "0.3")]
    pub hessian_step_tolerance: f64,

    /// Relative second derivative change below which diagonal refinement stops.
    #[builder(default = "0.05")]
    pub hessian_g2_tolerance: f64,

    /// Cycles used to refine first derivatives inside HESSE.
    #[builder(default = "2")]
    pub hessian_grad_ncycles: usize,

    /// Times the gradient step may be halved when the objective turns
    /// non-finite at a trial point.
    #[builder(default = "4")]
    pub max_nonfinite_retries: usize,
}

impl StrategyBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let positive = [
            ("grad_step_tolerance", self.grad_step_tolerance),
            ("grad_tolerance", self.grad_tolerance),
            ("hessian_step_tolerance", self.hessian_step_tolerance),
            ("hessian_g2_tolerance", self.hessian_g2_tolerance),
        ];
        for (name, value) in positive.iter() {
            if let Some(v) = value {
                if !(v.is_finite() && *v > 0.0) {
                    return Err(format!("{} must be positive, got {}", name, v));
                }
            }
        }
        if self.grad_ncycles == Some(0) || self.hessian_ncycles == Some(0) {
            return Err("cycle counts must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::medium()
    }
}

impl Strategy {
    /// Preset by level: 0 = low, 1 = medium, 2 = high.
    pub fn level(level: u32) -> Result<Self> {
        match level {
            0 => Ok(Self::low()),
            1 => Ok(Self::medium()),
            2 => Ok(Self::high()),
            other => Err(Error::InvalidConfig(format!(
                "strategy must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }

    pub fn low() -> Self {
        Strategy {
            level: 0,
            grad_ncycles: 2,
            grad_step_tolerance: 0.5,
            grad_tolerance: 0.1,
            hessian_ncycles: 3,
            hessian_step_tolerance: 0.5,
            hessian_g2_tolerance: 0.1,
            hessian_grad_ncycles: 1,
            max_nonfinite_retries: 4,
        }
    }

    pub fn medium() -> Self {
        Strategy {
            level: 1,
            grad_ncycles: 3,
            grad_step_tolerance: 0.3,
            grad_tolerance: 0.05,
            hessian_ncycles: 5,
            hessian_step_tolerance: 0.3,
            hessian_g2_tolerance: 0.05,
            hessian_grad_ncycles: 2,
            max_nonfinite_retries: 4,
        }
    }

    pub fn high() -> Self {
        Strategy {
            level: 2,
            grad_ncycles: 5,
            grad_step_tolerance: 0.1,
            grad_tolerance: 0.02,
            hessian_ncycles: 7,
            hessian_step_tolerance: 0.1,
            hessian_g2_tolerance: 0.02,
            hessian_grad_ncycles: 6,
            max_nonfinite_retries: 4,
        }
    }

    /// Preset one level cheaper, used for the many re-minimizations of MINOS.
    pub fn lowered(&self) -> Self {
        match self.level {
            0 | 1 => Self::low(),
            _ => Self::medium(),
        }
    }
}
