//! One-dimensional helpers shared by the line search and MINOS.

mod parabola;

pub use self::parabola::{Parabola, ParabolaPoint};
