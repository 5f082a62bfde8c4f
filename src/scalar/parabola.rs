//! A parabola `y = a x² + b x + c` through three points.
//!
//! Both the line search and the MINOS crossing search model the objective
//! along one direction with a parabola and jump to its minimum (or to where
//! it crosses a target level), then replace the worst of the three points:
//!
//! ```text
//!         +----+---------+--------+
//! iter 1  p0   p1        x*       p2
//!         +----+---------+
//! iter 2  p0   p1        p3 = x*
//! ```
//!
//! The points are centred on their mean before fitting, which keeps the
//! coefficients accurate when all three abscissae are close together.

/// A sampled point `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolaPoint {
    pub x: f64,
    pub y: f64,
}

impl ParabolaPoint {
    pub fn new(x: f64, y: f64) -> Self {
        ParabolaPoint { x, y }
    }
}

/// Coefficients of `a x² + b x + c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parabola {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Parabola {
    /// Interpolates three points with distinct abscissae.
    pub fn through(p1: ParabolaPoint, p2: ParabolaPoint, p3: ParabolaPoint) -> Parabola {
        let xm = (p1.x + p2.x + p3.x) / 3.0;
        let x1 = p1.x - xm;
        let x2 = p2.x - xm;
        let x3 = p3.x - xm;
        let (y1, y2, y3) = (p1.y, p2.y, p3.y);
        let dx12 = x1 - x2;
        let dx13 = x1 - x3;
        let dx23 = x2 - x3;

        let a = y1 / (dx12 * dx13) - y2 / (dx12 * dx23) + y3 / (dx13 * dx23);
        let mut b = -y1 * (x2 + x3) / (dx12 * dx13) + y2 * (x1 + x3) / (dx12 * dx23)
            - y3 * (x1 + x2) / (dx13 * dx23);
        let mut c = y1 - a * x1 * x1 - b * x1;

        c += xm * (xm * a - b);
        b -= 2.0 * xm * a;
        Parabola { a, b, c }
    }

    pub fn y(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }

    /// Abscissa of the extremum.
    pub fn x_min(&self) -> f64 {
        -self.b / (2.0 * self.a)
    }

    pub fn slope(&self, x: f64) -> f64 {
        2.0 * self.a * x + self.b
    }

    /// Solutions of `y(x) = level`, or `None` when the parabola does not
    /// reach the level by a margin of at least `tolerance` in the discriminant.
    pub fn crossings(&self, level: f64, tolerance: f64) -> Option<(f64, f64)> {
        let determ = self.b * self.b - 4.0 * self.a * (self.c - level);
        if determ < tolerance || self.a == 0.0 {
            return None;
        }
        let rt = determ.sqrt();
        Some((
            (-self.b + rt) / (2.0 * self.a),
            (-self.b - rt) / (2.0 * self.a),
        ))
    }
}
