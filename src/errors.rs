//! Error types for caller mistakes.
//!
//! Only malformed input is an error. Numerical trouble during a fit (noisy
//! gradients, saddle points, call limits) is reported through validity flags
//! on [`FunctionMinimum`](crate::FunctionMinimum) and
//! [`MinosError`](crate::MinosError) instead.

use thiserror::Error;

/// Crate error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Lower limit is not strictly below the upper limit.
    #[error("parameter '{name}': lower limit {lower} must be below upper limit {upper}")]
    InvalidLimits { name: String, lower: f64, upper: f64 },

    /// Step size is zero, negative or not finite.
    #[error("parameter '{name}': step size {step} must be positive and finite")]
    InvalidStep { name: String, step: f64 },

    /// A value handed to the engine is NaN or infinite.
    #[error("parameter '{name}': value {value} is not finite")]
    NonFiniteValue { name: String, value: f64 },

    /// Two parameters share a name.
    #[error("duplicate parameter name '{0}'")]
    DuplicateName(String),

    /// No parameter with this name.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Parameter index past the end of the set.
    #[error("parameter index {index} out of range for {len} parameters")]
    IndexOutOfRange { index: usize, len: usize },

    /// Lengths of parallel inputs differ.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    /// Every parameter is fixed.
    #[error("all parameters are fixed")]
    NoFreeParameters,

    /// Operation needs a minimum, but none was computed yet.
    #[error("no function minimum available, run migrad or simplex first")]
    NoMinimum,

    /// MINOS was requested on a minimum that is not valid.
    #[error("function minimum is not valid, minos requires a valid minimum")]
    InvalidMinimum,

    /// Bad session or algorithm setting.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
